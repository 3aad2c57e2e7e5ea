//! Client-side optimistic mutation pipeline.
//!
//! The coordinator owns the [`LocalRowCache`] and the set of pending
//! [`OptimisticMutation`]s. It never performs I/O: `propose_edit` returns the
//! [`UpdateRequest`] the caller must send, and the caller feeds responses and
//! broadcasts back in whatever order they arrive.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheChange, LocalRowCache, ReplaceOutcome, SubscriptionId};
use crate::error::{StoreError, ValidationError};
use crate::row::{FieldChanges, Row, RowId, Value};
use crate::schema::Schema;

/// Client-local identifier of one issued update request.
pub type Ticket = u64;

type CellKey = (RowId, String);

/// Lifecycle of an optimistic edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    Confirmed,
    RolledBack,
}

/// A locally applied, not yet confirmed edit of one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticMutation {
    pub ticket: Ticket,
    pub row_id: RowId,
    pub field: String,
    pub proposed: Value,
    /// Value visible immediately before this edit.
    pub prior: Value,
    pub status: MutationStatus,
    /// Canonical value from a broadcast that landed after the edit was made.
    confirmed_base: Option<Value>,
}

impl OptimisticMutation {
    /// Value the cell returns to if the update fails.
    pub fn rollback_target(&self) -> &Value {
        self.confirmed_base.as_ref().unwrap_or(&self.prior)
    }
}

/// Durable update the caller must send to the row store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateRequest {
    pub ticket: Ticket,
    pub row_id: RowId,
    /// Only the changed field.
    pub changes: FieldChanges,
}

/// Why a durable update did not commit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateFailure {
    /// The row no longer exists in the store.
    #[error("row no longer exists")]
    NotFound,
    /// The store refused the change.
    #[error("rejected by server: {0}")]
    Rejected(String),
    /// The request never produced a store answer.
    #[error("network error: {0}")]
    Transport(String),
}

impl From<StoreError> for UpdateFailure {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => UpdateFailure::NotFound,
            StoreError::Validation(e) => UpdateFailure::Rejected(e.to_string()),
            other => UpdateFailure::Rejected(other.to_string()),
        }
    }
}

/// Recoverable, user-visible failure message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub row_id: RowId,
    pub field: String,
    pub message: String,
}

/// Outcome of feeding an update response to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The current pending edit committed; the cache holds the canonical row.
    Confirmed(OptimisticMutation),
    /// The current pending edit failed and the cell was restored.
    RolledBack {
        mutation: OptimisticMutation,
        notice: FailureNotice,
    },
    /// The response belonged to a superseded or already confirmed edit.
    Ignored,
    /// The ticket was never issued or was already resolved.
    Unknown,
}

impl Resolution {
    pub fn notice(&self) -> Option<&FailureNotice> {
        match self {
            Resolution::RolledBack { notice, .. } => Some(notice),
            _ => None,
        }
    }
}

/// Accepts user edits, applies them optimistically and reconciles results.
#[derive(Debug)]
pub struct MutationCoordinator {
    schema: Schema,
    cache: LocalRowCache,
    pending: HashMap<CellKey, OptimisticMutation>,
    in_flight: HashMap<Ticket, CellKey>,
    next_ticket: Ticket,
}

impl MutationCoordinator {
    pub fn new(schema: Schema, cache: LocalRowCache) -> Self {
        Self {
            schema,
            cache,
            pending: HashMap::new(),
            in_flight: HashMap::new(),
            next_ticket: 0,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn cache(&self) -> &LocalRowCache {
        &self.cache
    }

    /// Register a cache observer.
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&CacheChange) + Send + 'static,
    {
        self.cache.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.cache.unsubscribe(id)
    }

    /// Pending edit for a cell, if any.
    pub fn pending_for(&self, row_id: RowId, field: &str) -> Option<&OptimisticMutation> {
        self.pending.get(&(row_id, field.to_string()))
    }

    pub fn pending(&self) -> impl Iterator<Item = &OptimisticMutation> {
        self.pending.values()
    }

    /// Number of issued requests still awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Validate and optimistically apply a user edit.
    ///
    /// Returns `Ok(None)` for a no-op edit. Otherwise the cell already shows
    /// the new value and the returned request must be sent to the store.
    pub fn propose_edit(
        &mut self,
        row_id: RowId,
        field: &str,
        new_value: impl Into<Value>,
    ) -> Result<Option<UpdateRequest>, ValidationError> {
        let row = self
            .cache
            .get(row_id)
            .ok_or(ValidationError::UnknownRow(row_id))?;
        let value = self.schema.validate_edit(field, new_value.into())?;

        let prior = row.get(field).cloned().unwrap_or(Value::Null);
        // Stored numbers may be integers where an edit coerces to floats.
        let unchanged = prior == value
            || self
                .schema
                .validate_edit(field, prior.clone())
                .is_ok_and(|current| current == value);
        if unchanged {
            tracing::debug!("No-op edit of row {} field {}", row_id, field);
            return Ok(None);
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.cache.patch(row_id, field, value.clone())?;

        let key = (row_id, field.to_string());
        let mutation = OptimisticMutation {
            ticket,
            row_id,
            field: field.to_string(),
            proposed: value.clone(),
            prior,
            status: MutationStatus::Pending,
            confirmed_base: None,
        };
        if let Some(old) = self.pending.insert(key.clone(), mutation) {
            tracing::debug!(
                "Ticket {} supersedes pending ticket {} on row {} field {}",
                ticket,
                old.ticket,
                row_id,
                field
            );
        }
        self.in_flight.insert(ticket, key);

        let mut changes = FieldChanges::new();
        changes.insert(field.to_string(), value);
        Ok(Some(UpdateRequest {
            ticket,
            row_id,
            changes,
        }))
    }

    /// Apply the store's answer to a previously issued request.
    pub fn on_update_response(
        &mut self,
        ticket: Ticket,
        result: Result<Row, UpdateFailure>,
    ) -> Resolution {
        let Some(key) = self.in_flight.remove(&ticket) else {
            tracing::debug!("Response for unknown ticket {}", ticket);
            return Resolution::Unknown;
        };
        let is_current = self
            .pending
            .get(&key)
            .is_some_and(|m| m.ticket == ticket);

        match result {
            Ok(row) => {
                let resolved = if is_current {
                    self.pending.remove(&key)
                } else {
                    None
                };
                if !self.is_stale(&row) {
                    self.settle_pending(&row);
                }
                self.converge(row);

                match resolved {
                    Some(mut mutation) => {
                        mutation.status = MutationStatus::Confirmed;
                        Resolution::Confirmed(mutation)
                    }
                    None => Resolution::Ignored,
                }
            }
            Err(failure) => {
                if !is_current {
                    tracing::debug!("Ignoring failure of superseded ticket {}: {}", ticket, failure);
                    return Resolution::Ignored;
                }
                let Some(mut mutation) = self.pending.remove(&key) else {
                    return Resolution::Ignored;
                };

                let target = mutation.rollback_target().clone();
                if let Err(e) = self.cache.patch(mutation.row_id, &mutation.field, target) {
                    tracing::warn!("Rollback of ticket {} could not patch cache: {}", ticket, e);
                }
                mutation.status = MutationStatus::RolledBack;
                tracing::warn!(
                    "Rolled back row {} field {} after failed update: {}",
                    mutation.row_id,
                    mutation.field,
                    failure
                );

                let notice = FailureNotice {
                    row_id: mutation.row_id,
                    field: mutation.field.clone(),
                    message: format!("Could not update {}: {}", mutation.field, failure),
                };
                Resolution::RolledBack { mutation, notice }
            }
        }
    }

    /// Apply an inbound broadcast of a canonical row.
    pub fn on_row_changed(&mut self, row: Row) -> ReplaceOutcome {
        if self.is_stale(&row) {
            return self.cache.replace(row);
        }
        self.settle_pending(&row);
        self.converge(row)
    }

    fn is_stale(&self, row: &Row) -> bool {
        self.cache
            .confirmed_version(row.id)
            .is_some_and(|confirmed| row.version < confirmed)
    }

    /// Reconcile pending edits of a row with a canonical version of it.
    ///
    /// Edits the canonical row already carries are confirmed. The others
    /// take the canonical value as their rollback target.
    fn settle_pending(&mut self, row: &Row) {
        let row_id = row.id;
        let confirmed: Vec<CellKey> = self
            .pending
            .iter_mut()
            .filter(|((id, _), _)| *id == row_id)
            .filter_map(|(key, mutation)| {
                let canonical = row.get(&mutation.field).cloned().unwrap_or(Value::Null);
                if canonical == mutation.proposed {
                    Some(key.clone())
                } else {
                    mutation.confirmed_base = Some(canonical);
                    None
                }
            })
            .collect();
        for key in confirmed {
            if let Some(mutation) = self.pending.remove(&key) {
                tracing::debug!(
                    "Canonical row confirmed ticket {} on row {} field {}",
                    mutation.ticket,
                    row_id,
                    mutation.field
                );
            }
        }
    }

    /// Rebuild the cache from a bulk read after a broadcast gap.
    ///
    /// Pending edits stay visible on top of the fresh rows; edits whose row
    /// disappeared are dropped and their responses ignored. Rows the cache
    /// already holds at a newer version than the bulk read are kept.
    pub fn rehydrate(&mut self, rows: Vec<Row>) {
        let kept = self.cache.hydrate(rows);

        let cache = &self.cache;
        self.pending.retain(|(row_id, field), mutation| match cache.get(*row_id) {
            None => {
                tracing::debug!("Dropping pending edit of vanished row {}", row_id);
                false
            }
            // Newer than the bulk read; already reconciled when it arrived.
            Some(_) if kept.contains(row_id) => true,
            Some(row) => {
                let canonical = row.get(field).cloned().unwrap_or(Value::Null);
                if canonical == mutation.proposed {
                    false
                } else {
                    mutation.confirmed_base = Some(canonical);
                    true
                }
            }
        });

        let overlays: Vec<(RowId, String, Value)> = self
            .pending
            .values()
            .map(|m| (m.row_id, m.field.clone(), m.proposed.clone()))
            .collect();
        for (row_id, field, value) in overlays {
            let _ = self.cache.patch(row_id, &field, value);
        }
    }

    /// Replace with the canonical row, then re-apply still pending edits.
    fn converge(&mut self, row: Row) -> ReplaceOutcome {
        let row_id = row.id;
        let outcome = self.cache.replace(row);
        if outcome == ReplaceOutcome::Applied {
            let overlays: Vec<(String, Value)> = self
                .pending
                .values()
                .filter(|m| m.row_id == row_id)
                .map(|m| (m.field.clone(), m.proposed.clone()))
                .collect();
            for (field, value) in overlays {
                let _ = self.cache.patch(row_id, &field, value);
            }
        }
        outcome
    }
}
