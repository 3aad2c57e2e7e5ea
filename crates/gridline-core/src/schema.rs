//! Column definitions and value validation for the dataset.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::row::{FieldChanges, Value};

pub const STATUS_OPTIONS: &[&str] = &["Active", "Pending", "Blocked", "Archived"];
pub const PRIORITY_OPTIONS: &[&str] = &["High", "Medium", "Low"];
pub const CATEGORY_OPTIONS: &[&str] = &["Tech", "Finance", "Healthcare", "Retail", "Other"];

/// Supported column types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "options")]
pub enum ColumnKind {
    Text,
    /// Closed set of allowed strings.
    Enum(Vec<String>),
    Number,
    Integer,
    /// RFC 3339 timestamp string.
    Timestamp,
}

impl ColumnKind {
    pub fn enumeration(options: &[&str]) -> Self {
        ColumnKind::Enum(options.iter().map(|o| o.to_string()).collect())
    }
}

/// A column within the dataset schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
    pub editable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            editable: true,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.editable = false;
        self
    }

    /// Coerce a proposed value into this column's canonical representation.
    ///
    /// Numeric columns accept numeric strings; `Null` is accepted everywhere
    /// except enumerations.
    pub fn coerce(&self, value: Value) -> Result<Value, ValidationError> {
        let mismatch = |value: &Value, expected: &str| ValidationError::TypeMismatch {
            field: self.name.clone(),
            expected: expected.to_string(),
            got: value.to_string(),
        };

        match (&self.kind, value) {
            (ColumnKind::Enum(options), Value::String(s)) => {
                if options.iter().any(|o| *o == s) {
                    Ok(Value::String(s))
                } else {
                    Err(ValidationError::NotInEnum {
                        field: self.name.clone(),
                        value: s,
                        allowed: options.clone(),
                    })
                }
            }
            (ColumnKind::Enum(_), other) => Err(mismatch(&other, "one of the allowed options")),
            (_, Value::Null) => Ok(Value::Null),
            (ColumnKind::Text, Value::String(s)) => Ok(Value::String(s)),
            (ColumnKind::Text, other) => Err(mismatch(&other, "text")),
            (ColumnKind::Number, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (ColumnKind::Number, Value::Float(f)) if f.is_finite() => Ok(Value::Float(f)),
            (ColumnKind::Number, Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(Value::Float(f)),
                _ => Err(mismatch(&Value::String(s), "number")),
            },
            (ColumnKind::Number, other) => Err(mismatch(&other, "number")),
            (ColumnKind::Integer, Value::Int(i)) => Ok(Value::Int(i)),
            (ColumnKind::Integer, Value::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                Ok(Value::Int(f as i64))
            }
            (ColumnKind::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Ok(Value::Int(i)),
                Err(_) => Err(mismatch(&Value::String(s), "integer")),
            },
            (ColumnKind::Integer, other) => Err(mismatch(&other, "integer")),
            (ColumnKind::Timestamp, Value::String(s)) => match DateTime::parse_from_rfc3339(&s) {
                Ok(_) => Ok(Value::String(s)),
                Err(_) => Err(mismatch(&Value::String(s), "RFC 3339 timestamp")),
            },
            (ColumnKind::Timestamp, other) => Err(mismatch(&other, "RFC 3339 timestamp")),
        }
    }
}

/// The dataset schema shared by the row store and its clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
    /// Column the store stamps with the commit time on every update.
    pub touched_on_update: Option<String>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            touched_on_update: None,
        }
    }

    pub fn with_touched_column(mut self, name: impl Into<String>) -> Self {
        self.touched_on_update = Some(name.into());
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Validate a single proposed edit and return its canonical value.
    pub fn validate_edit(&self, field: &str, value: Value) -> Result<Value, ValidationError> {
        let column = self
            .column(field)
            .ok_or_else(|| ValidationError::UnknownField(field.to_string()))?;
        if !column.editable {
            return Err(ValidationError::ReadOnly(field.to_string()));
        }
        column.coerce(value)
    }

    /// Validate a set of changes as received by the row store.
    pub fn validate_changes(&self, changes: FieldChanges) -> Result<FieldChanges, ValidationError> {
        if changes.is_empty() {
            return Err(ValidationError::EmptyUpdate);
        }
        changes
            .into_iter()
            .map(|(field, value)| {
                let value = self.validate_edit(&field, value)?;
                Ok((field, value))
            })
            .collect()
    }

    /// The tracker dataset: contacts with workflow status, priority and value columns.
    pub fn tracker() -> Self {
        use ColumnKind::*;
        Self::new(vec![
            ColumnDef::new("name", Text),
            ColumnDef::new("title", Text),
            ColumnDef::new("company", Text),
            ColumnDef::new("email", Text),
            ColumnDef::new("phone", Text),
            ColumnDef::new("website", Text),
            ColumnDef::new("status", ColumnKind::enumeration(STATUS_OPTIONS)),
            ColumnDef::new("priority", ColumnKind::enumeration(PRIORITY_OPTIONS)),
            ColumnDef::new("category", ColumnKind::enumeration(CATEGORY_OPTIONS)),
            ColumnDef::new("estimated_value", Number),
            ColumnDef::new("budget", Number),
            ColumnDef::new("expenses", Number),
            ColumnDef::new("rating", Integer),
            ColumnDef::new("notes", Text),
            ColumnDef::new("description", Text),
            ColumnDef::new("address", Text),
            ColumnDef::new("city", Text),
            ColumnDef::new("country", Text),
            ColumnDef::new("zip_code", Text),
            ColumnDef::new("created_at", Timestamp).read_only(),
            ColumnDef::new("updated_at", Timestamp).read_only(),
        ])
        .with_touched_column("updated_at")
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::tracker()
    }
}
