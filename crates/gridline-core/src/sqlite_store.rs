use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::row::{FieldChanges, Row, RowId, Value};
use crate::schema::Schema;
use crate::store::{apply_changes, RowStore};

/// SQLite-backed implementation of the RowStore trait.
///
/// Field values live in a JSON column; `version` is a real column so the
/// canonical row can be returned from the same transaction that bumps it.
pub struct SqliteRowStore {
    conn: Mutex<Connection>,
    schema: Schema,
}

impl SqliteRowStore {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path, schema: Schema) -> Result<Self, StoreError> {
        let conn =
            Connection::open(path).map_err(|e| StoreError::Storage(format!("open: {}", e)))?;
        Self::init_with_connection(conn, schema)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory(schema: Schema) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Storage(format!("open_in_memory: {}", e)))?;
        Self::init_with_connection(conn, schema)
    }

    fn init_with_connection(conn: Connection, schema: Schema) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS rows (
                id INTEGER PRIMARY KEY,
                version INTEGER NOT NULL DEFAULT 0,
                fields TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| StoreError::Storage(format!("init_schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            schema,
        })
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(RowId, i64, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }

    fn decode((id, version, fields): (RowId, i64, String)) -> Result<Row, StoreError> {
        let fields: BTreeMap<String, Value> = serde_json::from_str(&fields)?;
        Ok(Row {
            id,
            version: version.max(0) as u64,
            fields,
        })
    }

    fn load(conn: &Connection, id: RowId) -> Result<Option<Row>, StoreError> {
        let raw = conn
            .query_row(
                "SELECT id, version, fields FROM rows WHERE id = ?1",
                params![id],
                Self::read_row,
            )
            .optional()
            .map_err(|e| StoreError::Storage(format!("query get: {}", e)))?;
        raw.map(Self::decode).transpose()
    }
}

impl RowStore for SqliteRowStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn list_rows(&self) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
        let mut stmt = conn
            .prepare("SELECT id, version, fields FROM rows ORDER BY id ASC")
            .map_err(|e| StoreError::Storage(format!("prepare list: {}", e)))?;

        let raw = stmt
            .query_map([], Self::read_row)
            .map_err(|e| StoreError::Storage(format!("query list: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(Self::decode).collect()
    }

    fn get_row(&self, id: RowId) -> Result<Option<Row>, StoreError> {
        let conn = self.conn.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
        Self::load(&conn, id)
    }

    fn patch_row(&self, id: RowId, changes: &FieldChanges) -> Result<Row, StoreError> {
        let conn = self.conn.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StoreError::Storage(format!("begin tx: {}", e)))?;

        let mut row = Self::load(&tx, id)?.ok_or(StoreError::NotFound(id))?;
        apply_changes(&self.schema, &mut row, changes)?;

        let fields = serde_json::to_string(&row.fields)?;
        tx.execute(
            "UPDATE rows SET fields = ?1, version = ?2 WHERE id = ?3",
            params![fields, row.version as i64, id],
        )
        .map_err(|e| StoreError::Storage(format!("update: {}", e)))?;

        tx.commit()
            .map_err(|e| StoreError::Storage(format!("commit: {}", e)))?;
        Ok(row)
    }

    fn insert_rows(&self, rows: Vec<Row>) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StoreError::Storage(format!("begin tx: {}", e)))?;

        for row in &rows {
            let fields = serde_json::to_string(&row.fields)?;
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO rows (id, version, fields) VALUES (?1, ?2, ?3)",
                    params![row.id, row.version as i64, fields],
                )
                .map_err(|e| StoreError::Storage(format!("insert: {}", e)))?;
            if inserted == 0 {
                return Err(StoreError::AlreadyExists(row.id));
            }
        }

        tx.commit()
            .map_err(|e| StoreError::Storage(format!("commit: {}", e)))?;
        Ok(rows.len())
    }

    fn delete_row(&self, id: RowId) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
        let deleted = conn
            .execute("DELETE FROM rows WHERE id = ?1", params![id])
            .map_err(|e| StoreError::Storage(format!("delete: {}", e)))?;
        if deleted == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|e| StoreError::Storage(e.to_string()))?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM rows", [], |row| row.get(0))
            .map_err(|e| StoreError::Storage(format!("count: {}", e)))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> SqliteRowStore {
        let store = SqliteRowStore::open_in_memory(Schema::tracker()).unwrap();
        store
            .insert_rows(vec![
                Row::new(7).with_field("priority", "Low").with_field("budget", 1200.0),
                Row::new(3).with_field("priority", "Medium"),
            ])
            .unwrap();
        store
    }

    fn changes(field: &str, value: impl Into<Value>) -> FieldChanges {
        let mut changes = FieldChanges::new();
        changes.insert(field.to_string(), value.into());
        changes
    }

    #[test]
    fn list_rows_orders_by_id_and_round_trips_values() {
        let rows = seeded().list_rows().unwrap();
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 7]);
        assert_eq!(rows[1].get("budget"), Some(&Value::Float(1200.0)));
    }

    #[test]
    fn patch_bumps_version_and_persists() {
        let store = seeded();
        let row = store.patch_row(7, &changes("priority", "High")).unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(row.get("budget"), Some(&Value::Float(1200.0)));

        let again = store.patch_row(7, &changes("budget", "99.5")).unwrap();
        assert_eq!(again.version, 2);
        assert_eq!(again.get("priority"), Some(&Value::from("High")));
        assert_eq!(store.get_row(7).unwrap(), Some(again));
    }

    #[test]
    fn patch_missing_row_is_not_found() {
        let store = seeded();
        assert_eq!(
            store.patch_row(42, &changes("status", "Blocked")),
            Err(StoreError::NotFound(42))
        );
    }

    #[test]
    fn failed_validation_rolls_back() {
        let store = seeded();
        assert!(matches!(
            store.patch_row(7, &changes("priority", "Urgent")),
            Err(StoreError::Validation(_))
        ));
        assert_eq!(store.get_row(7).unwrap().unwrap().version, 0);
    }

    #[test]
    fn duplicate_insert_fails_without_partial_writes() {
        let store = seeded();
        let err = store.insert_rows(vec![Row::new(8), Row::new(3)]).unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists(3));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.db");
        {
            let store = SqliteRowStore::open(&path, Schema::tracker()).unwrap();
            store.insert_rows(vec![Row::new(1).with_field("status", "Active")]).unwrap();
            store.patch_row(1, &changes("status", "Archived")).unwrap();
        }
        let store = SqliteRowStore::open(&path, Schema::tracker()).unwrap();
        let row = store.get_row(1).unwrap().unwrap();
        assert_eq!(row.version, 1);
        assert_eq!(row.get("status"), Some(&Value::from("Archived")));
    }
}
