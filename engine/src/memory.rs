//! In-memory storage backend.
//!
//! The reference [`SyncStorage`] implementation: per-table row maps plus a
//! deletion ledger, with all-or-nothing batch commits. Backs the test suite
//! and works as an embeddable backend for callers that keep their datastore
//! in memory.

use crate::{
    changes::{RawRecord, CHANGED_COLUMN, STATUS_COLUMN},
    error::{Error, Result},
    storage::{StoredRecord, SyncStorage, WriteBatch, WriteOp},
    LocalId, TableName,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct TableState {
    rows: BTreeMap<LocalId, RawRecord>,
    tombstones: BTreeSet<LocalId>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<TableName, TableState>,
}

impl State {
    fn table(&mut self, name: &str) -> &mut TableState {
        self.tables.entry(name.to_string()).or_default()
    }

    fn row(&self, table: &str, id: &str) -> Option<&RawRecord> {
        self.tables.get(table).and_then(|t| t.rows.get(id))
    }
}

/// In-memory [`SyncStorage`] backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed a record directly, bypassing the batch interface. The raw is
    /// stored exactly as given.
    pub fn insert_record(&self, record: StoredRecord) {
        self.locked()
            .table(&record.table)
            .rows
            .insert(record.id, record.raw);
    }

    /// Add an identifier to a table's deletion ledger.
    pub fn add_tombstone(&self, table: &str, id: impl Into<LocalId>) {
        self.locked().table(table).tombstones.insert(id.into());
    }

    /// Snapshot of one record, if present.
    pub fn record(&self, table: &str, id: &str) -> Option<StoredRecord> {
        self.locked()
            .row(table, id)
            .map(|raw| StoredRecord::new(table, id, raw.clone()))
    }

    /// Number of records in a table.
    pub fn record_count(&self, table: &str) -> usize {
        self.locked()
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Current deletion ledger of a table.
    pub fn tombstones(&self, table: &str) -> Vec<LocalId> {
        self.locked()
            .tables
            .get(table)
            .map(|t| t.tombstones.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn mark_synced(raw: &mut RawRecord) {
    raw.insert(STATUS_COLUMN.to_string(), Value::String("synced".into()));
    raw.insert(CHANGED_COLUMN.to_string(), Value::String(String::new()));
}

#[async_trait]
impl SyncStorage for MemoryStorage {
    async fn records_by_ids(&self, table: &str, ids: &[LocalId]) -> Result<Vec<StoredRecord>> {
        let state = self.locked();
        let Some(table_state) = state.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                table_state
                    .rows
                    .get(id)
                    .map(|raw| StoredRecord::new(table, id.clone(), raw.clone()))
            })
            .collect())
    }

    async fn records_where_in(
        &self,
        table: &str,
        column: &str,
        values: &[String],
    ) -> Result<Vec<StoredRecord>> {
        let state = self.locked();
        let Some(table_state) = state.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(table_state
            .rows
            .iter()
            .filter(|(_, raw)| {
                raw.get(column)
                    .and_then(Value::as_str)
                    .is_some_and(|value| values.iter().any(|v| v == value))
            })
            .map(|(id, raw)| StoredRecord::new(table, id.clone(), raw.clone()))
            .collect())
    }

    async fn all_records(&self, table: &str) -> Result<Vec<StoredRecord>> {
        let state = self.locked();
        let Some(table_state) = state.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(table_state
            .rows
            .iter()
            .map(|(id, raw)| StoredRecord::new(table, id.clone(), raw.clone()))
            .collect())
    }

    async fn tombstoned_ids(&self, table: &str) -> Result<Vec<LocalId>> {
        Ok(self.tombstones(table))
    }

    async fn purge_tombstones(&self, table: &str, ids: &[LocalId]) -> Result<()> {
        let mut state = self.locked();
        let tombstones = &mut state.table(table).tombstones;
        for id in ids {
            tombstones.remove(id);
        }
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut state = self.locked();

        // Validate the whole batch up front so a failure applies nothing.
        for op in &batch {
            match op {
                WriteOp::Create { table, id, .. } => {
                    if state.row(table, id).is_some() {
                        return Err(Error::storage_msg(format!(
                            "create failed: record {table}#{id} already exists"
                        )));
                    }
                }
                WriteOp::Update { table, id, .. }
                | WriteOp::Destroy { table, id }
                | WriteOp::MarkSynced { table, id } => {
                    if state.row(table, id).is_none() {
                        return Err(Error::storage_msg(format!(
                            "write failed: record {table}#{id} does not exist"
                        )));
                    }
                }
                WriteOp::PurgeTombstones { .. } => {}
            }
        }

        for op in batch {
            match op {
                WriteOp::Create { table, id, mut raw } => {
                    mark_synced(&mut raw);
                    state.table(&table).rows.insert(id, raw);
                }
                WriteOp::Update { table, id, mut raw } => {
                    // Engine-staged updates carry remote-authority state.
                    mark_synced(&mut raw);
                    state.table(&table).rows.insert(id, raw);
                }
                WriteOp::Destroy { table, id } => {
                    state.table(&table).rows.remove(&id);
                }
                WriteOp::MarkSynced { table, id } => {
                    if let Some(raw) = state.table(&table).rows.get_mut(&id) {
                        mark_synced(raw);
                    }
                }
                WriteOp::PurgeTombstones { table, ids } => {
                    let tombstones = &mut state.table(&table).tombstones;
                    for id in ids {
                        tombstones.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn commit_applies_all_ops() {
        let storage = MemoryStorage::new();
        storage.add_tombstone("orders", "gone");

        storage
            .commit(vec![
                WriteOp::Create {
                    table: "orders".into(),
                    id: "o1".into(),
                    raw: raw(json!({"id": "o1", "total": 5})),
                },
                WriteOp::PurgeTombstones {
                    table: "orders".into(),
                    ids: vec!["gone".into()],
                },
            ])
            .await
            .unwrap();

        let record = storage.record("orders", "o1").unwrap();
        assert_eq!(record.raw["total"], json!(5));
        assert_eq!(record.raw[STATUS_COLUMN], json!("synced"));
        assert!(storage.tombstones("orders").is_empty());
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let storage = MemoryStorage::new();

        let result = storage
            .commit(vec![
                WriteOp::Create {
                    table: "orders".into(),
                    id: "o1".into(),
                    raw: raw(json!({"id": "o1"})),
                },
                WriteOp::Update {
                    table: "orders".into(),
                    id: "missing".into(),
                    raw: raw(json!({"id": "missing"})),
                },
            ])
            .await;

        assert!(result.is_err());
        assert_eq!(storage.record_count("orders"), 0);
    }

    #[tokio::test]
    async fn where_in_matches_string_columns() {
        let storage = MemoryStorage::new();
        storage.insert_record(StoredRecord::new(
            "orders",
            "o1",
            raw(json!({"id": "o1", "customer_id": "c1"})),
        ));
        storage.insert_record(StoredRecord::new(
            "orders",
            "o2",
            raw(json!({"id": "o2", "customer_id": "c2"})),
        ));

        let matched = storage
            .records_where_in("orders", "customer_id", &["c2".into()])
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, "o2");

        let none = storage
            .records_where_in("orders", "customer_id", &["c9".into()])
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn mark_synced_clears_pending_state() {
        let storage = MemoryStorage::new();
        storage.insert_record(StoredRecord::new(
            "orders",
            "o1",
            raw(json!({"id": "o1", "_status": "created", "_changed": "total"})),
        ));

        storage
            .commit(vec![WriteOp::MarkSynced {
                table: "orders".into(),
                id: "o1".into(),
            }])
            .await
            .unwrap();

        let record = storage.record("orders", "o1").unwrap();
        assert_eq!(record.raw[STATUS_COLUMN], json!("synced"));
        assert_eq!(record.raw[CHANGED_COLUMN], json!(""));
    }
}
