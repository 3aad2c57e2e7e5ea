//! Client-side row cache.
//!
//! A single authoritative in-memory table, ordered by insertion (the bulk
//! read order) and indexed by row id. Entries never expire: they are
//! corrected by confirmed writes and broadcasts, and rebuilt only by
//! [`LocalRowCache::hydrate`]. Each entry remembers the highest store
//! version it has seen so late or repeated deliveries can be dropped.

use std::collections::{HashMap, HashSet};

use crate::error::ValidationError;
use crate::row::{Row, RowId, Value};

/// Handle returned by [`LocalRowCache::subscribe`].
pub type SubscriptionId = u64;

/// Notification sent to observers after every effective cache mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheChange {
    /// The whole table was rebuilt from a bulk read.
    Hydrated { len: usize },
    /// A single field was overwritten in place.
    Patched {
        row_id: RowId,
        index: usize,
        field: String,
    },
    /// A row was replaced by its canonical version.
    Replaced { row_id: RowId, index: usize },
}

impl CacheChange {
    /// Sequence index affected by this change, if it touches a single row.
    pub fn index(&self) -> Option<usize> {
        match self {
            CacheChange::Hydrated { .. } => None,
            CacheChange::Patched { index, .. } | CacheChange::Replaced { index, .. } => Some(*index),
        }
    }
}

/// Result of [`LocalRowCache::replace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The row was overwritten and observers notified.
    Applied,
    /// The cache already held exactly this row.
    Unchanged,
    /// The row is older than the last confirmed version.
    Stale,
    /// No row with this id is cached.
    Unknown,
}

type Observer = Box<dyn FnMut(&CacheChange) + Send>;

#[derive(Debug, Clone)]
struct CachedRow {
    row: Row,
    confirmed_version: u64,
}

/// Insertion-ordered mapping from row id to row snapshot.
#[derive(Default)]
pub struct LocalRowCache {
    rows: Vec<CachedRow>,
    index_by_id: HashMap<RowId, usize>,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: SubscriptionId,
}

impl std::fmt::Debug for LocalRowCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRowCache")
            .field("rows", &self.rows.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl LocalRowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from a bulk read.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        let mut cache = Self::new();
        cache.hydrate(rows);
        cache
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, row_id: RowId) -> Option<&Row> {
        self.index_by_id
            .get(&row_id)
            .and_then(|&idx| self.rows.get(idx))
            .map(|entry| &entry.row)
    }

    /// Position of a row in the rendered sequence.
    pub fn position(&self, row_id: RowId) -> Option<usize> {
        self.index_by_id.get(&row_id).copied()
    }

    /// Highest store version seen for this row.
    pub fn confirmed_version(&self, row_id: RowId) -> Option<u64> {
        self.index_by_id
            .get(&row_id)
            .map(|&idx| self.rows[idx].confirmed_version)
    }

    /// Rebuild the whole table, keeping the given order.
    ///
    /// Duplicate ids keep their first position and the highest version. A
    /// cached row already confirmed at a newer version than the incoming one
    /// survives the rebuild; the ids of such rows are returned.
    pub fn hydrate(&mut self, rows: Vec<Row>) -> HashSet<RowId> {
        let mut previous: HashMap<RowId, CachedRow> = self
            .rows
            .drain(..)
            .map(|entry| (entry.row.id, entry))
            .collect();
        self.index_by_id.clear();
        let mut kept = HashSet::new();

        for row in rows {
            let entry = match previous.remove(&row.id) {
                Some(cached) if cached.confirmed_version > row.version => {
                    tracing::debug!(
                        "Keeping row {} at version {} over bulk read version {}",
                        row.id,
                        cached.confirmed_version,
                        row.version
                    );
                    kept.insert(row.id);
                    cached
                }
                _ => CachedRow {
                    confirmed_version: row.version,
                    row,
                },
            };
            match self.index_by_id.get(&entry.row.id) {
                Some(&idx) => {
                    if entry.confirmed_version >= self.rows[idx].confirmed_version {
                        kept.remove(&entry.row.id);
                        self.rows[idx] = entry;
                    }
                }
                None => {
                    self.index_by_id.insert(entry.row.id, self.rows.len());
                    self.rows.push(entry);
                }
            }
        }

        let len = self.rows.len();
        self.notify(CacheChange::Hydrated { len });
        kept
    }

    /// Overwrite one field in place, returning the previous value.
    ///
    /// Writing the value already present is not a change and does not notify.
    pub fn patch(
        &mut self,
        row_id: RowId,
        field: &str,
        value: Value,
    ) -> Result<Option<Value>, ValidationError> {
        let index = self
            .position(row_id)
            .ok_or(ValidationError::UnknownRow(row_id))?;

        let fields = &mut self.rows[index].row.fields;
        if fields.get(field) == Some(&value) {
            return Ok(Some(value));
        }
        let previous = fields.insert(field.to_string(), value);

        self.notify(CacheChange::Patched {
            row_id,
            index,
            field: field.to_string(),
        });
        Ok(previous)
    }

    /// Replace a row with its canonical version.
    pub fn replace(&mut self, row: Row) -> ReplaceOutcome {
        let Some(index) = self.position(row.id) else {
            tracing::debug!("Ignoring canonical row {} not present in cache", row.id);
            return ReplaceOutcome::Unknown;
        };

        let entry = &mut self.rows[index];
        if row.version < entry.confirmed_version {
            tracing::debug!(
                "Dropping stale row {} (version {} < {})",
                row.id,
                row.version,
                entry.confirmed_version
            );
            return ReplaceOutcome::Stale;
        }
        if entry.row.fields == row.fields {
            entry.confirmed_version = row.version;
            entry.row.version = row.version;
            return ReplaceOutcome::Unchanged;
        }

        let row_id = row.id;
        entry.confirmed_version = row.version;
        entry.row = row;

        self.notify(CacheChange::Replaced { row_id, index });
        ReplaceOutcome::Applied
    }

    /// Ordered view of the cached rows for rendering.
    pub fn snapshot(&self) -> RowSequence<'_> {
        RowSequence { rows: &self.rows }
    }

    /// Register an observer called after every effective mutation.
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&CacheChange) + Send + 'static,
    {
        self.next_subscription += 1;
        let id = self.next_subscription;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Remove an observer. Returns false if the id was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    fn notify(&mut self, change: CacheChange) {
        for (_, observer) in self.observers.iter_mut() {
            observer(&change);
        }
    }
}

/// Borrowed, ordered projection of the cache used for rendering.
#[derive(Debug, Clone, Copy)]
pub struct RowSequence<'a> {
    rows: &'a [CachedRow],
}

impl<'a> RowSequence<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'a Row> {
        self.rows.get(index).map(|entry| &entry.row)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Row> + 'a {
        self.rows.iter().map(|entry| &entry.row)
    }

    /// Rows in `start..end`, clamped to the sequence length.
    pub fn slice(&self, start: usize, end: usize) -> impl Iterator<Item = &'a Row> + 'a {
        let end = end.min(self.rows.len());
        let start = start.min(end);
        self.rows[start..end].iter().map(|entry| &entry.row)
    }
}
