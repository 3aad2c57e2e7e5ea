//! The row store contract and an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{SecondsFormat, Utc};

use crate::error::StoreError;
use crate::row::{FieldChanges, Row, RowId, Value};
use crate::schema::Schema;

/// The trait that all row storage backends implement.
///
/// `patch_row` is the only write on the edit path: it validates the changes,
/// applies them atomically, bumps the row version and returns the full
/// canonical row.
pub trait RowStore: Send + Sync {
    /// Schema that `patch_row` validates against.
    fn schema(&self) -> &Schema;

    /// All rows in ascending id order.
    fn list_rows(&self) -> Result<Vec<Row>, StoreError>;

    /// Get a row by id.
    fn get_row(&self, id: RowId) -> Result<Option<Row>, StoreError>;

    /// Apply a set of field changes to one row.
    fn patch_row(&self, id: RowId, changes: &FieldChanges) -> Result<Row, StoreError>;

    /// Insert rows atomically. Fails if any id already exists.
    fn insert_rows(&self, rows: Vec<Row>) -> Result<usize, StoreError>;

    /// Delete a row by id.
    fn delete_row(&self, id: RowId) -> Result<(), StoreError>;

    fn count(&self) -> Result<usize, StoreError>;
}

/// Current time in the format timestamp columns carry.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Validate `changes` and apply them to `row` in place.
pub(crate) fn apply_changes(
    schema: &Schema,
    row: &mut Row,
    changes: &FieldChanges,
) -> Result<(), StoreError> {
    let validated = schema.validate_changes(changes.clone())?;
    row.fields.extend(validated);
    if let Some(touched) = &schema.touched_on_update {
        row.fields
            .insert(touched.clone(), Value::String(now_timestamp()));
    }
    row.version += 1;
    Ok(())
}

/// Volatile store used by tests and single-process demos.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    schema: Schema,
    rows: RwLock<BTreeMap<RowId, Row>>,
}

impl MemoryRowStore {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_rows(schema: Schema, rows: Vec<Row>) -> Result<Self, StoreError> {
        let store = Self::new(schema);
        store.insert_rows(rows)?;
        Ok(store)
    }
}

impl RowStore for MemoryRowStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn list_rows(&self) -> Result<Vec<Row>, StoreError> {
        let rows = self.rows.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(rows.values().cloned().collect())
    }

    fn get_row(&self, id: RowId) -> Result<Option<Row>, StoreError> {
        let rows = self.rows.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(rows.get(&id).cloned())
    }

    fn patch_row(&self, id: RowId, changes: &FieldChanges) -> Result<Row, StoreError> {
        let mut rows = self.rows.write().map_err(|e| StoreError::Storage(e.to_string()))?;
        let current = rows.get(&id).ok_or(StoreError::NotFound(id))?;

        let mut updated = current.clone();
        apply_changes(&self.schema, &mut updated, changes)?;
        rows.insert(id, updated.clone());
        Ok(updated)
    }

    fn insert_rows(&self, new_rows: Vec<Row>) -> Result<usize, StoreError> {
        let mut rows = self.rows.write().map_err(|e| StoreError::Storage(e.to_string()))?;
        let mut seen = std::collections::HashSet::new();
        for row in &new_rows {
            if rows.contains_key(&row.id) || !seen.insert(row.id) {
                return Err(StoreError::AlreadyExists(row.id));
            }
        }
        let count = new_rows.len();
        for row in new_rows {
            rows.insert(row.id, row);
        }
        Ok(count)
    }

    fn delete_row(&self, id: RowId) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|e| StoreError::Storage(e.to_string()))?;
        rows.remove(&id).map(|_| ()).ok_or(StoreError::NotFound(id))
    }

    fn count(&self) -> Result<usize, StoreError> {
        let rows = self.rows.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(rows.len())
    }
}
