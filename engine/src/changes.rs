//! Changeset types exchanged with the transport layer, and the raw-record
//! contract.
//!
//! A raw record is one row's columns as a JSON object map, the shape both
//! the remote authority and the storage layer speak. The reserved
//! synchronization columns belong to the local bookkeeping layer and must
//! never appear in records arriving from the remote side.

use crate::{
    error::{Error, Result},
    storage::StoredRecord,
    LocalId, RemoteId, TableName,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Column carrying a record's identifier.
pub const ID_COLUMN: &str = "id";

/// Reserved column holding a record's synchronization state.
pub const STATUS_COLUMN: &str = "_status";

/// Reserved column holding the set of locally-changed columns.
pub const CHANGED_COLUMN: &str = "_changed";

/// One row's columns as a JSON object map.
pub type RawRecord = serde_json::Map<String, Value>;

/// Mutations for one table over one sync interval.
///
/// Identifiers must be unique across the three sequences; violating this is
/// a caller error the engine does not detect or recover.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableChangeSet {
    /// Full raw records to create
    pub created: Vec<RawRecord>,
    /// Full raw records to update
    pub updated: Vec<RawRecord>,
    /// Identifiers of deleted records
    pub deleted: Vec<String>,
}

impl TableChangeSet {
    /// Whether the changeset carries no mutations at all.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Every record identifier referenced by this changeset: creates and
    /// updates first, then deletions.
    pub fn referenced_ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.created.len() + self.updated.len() + self.deleted.len());
        for raw in self.created.iter().chain(&self.updated) {
            if let Some(id) = record_id(raw) {
                ids.push(id.to_string());
            }
        }
        ids.extend(self.deleted.iter().cloned());
        ids
    }
}

/// Mutations across tables, keyed by table name.
///
/// Ordered so one apply pass visits tables deterministically; in-flight
/// relation references resolve against whatever was staged earlier in that
/// order.
pub type DatabaseChangeSet = BTreeMap<TableName, TableChangeSet>;

/// A local changeset queued for push, together with the storage snapshot of
/// every affected record captured at push time.
///
/// The snapshot backs the optimistic-concurrency check in the
/// acknowledgment path: a record that changed locally after being queued is
/// not marked synchronized.
#[derive(Debug, Clone, Default)]
pub struct LocalChanges {
    /// The pushed changeset, in the local identifier namespace
    pub changes: DatabaseChangeSet,
    /// Push-time snapshots of all records the changeset touches
    pub affected_records: Vec<StoredRecord>,
}

/// Per-table identifiers the server rejected during a push.
pub type RejectedIds = HashMap<TableName, Vec<LocalId>>;

/// Per-table server-assigned identifiers for pushed creates, positionally
/// aligned with the table's `created` entries. An empty or `"0"` entry means
/// the create is not yet confirmed published.
pub type PublishedIds = HashMap<TableName, Vec<RemoteId>>;

/// The identifier carried by a raw record, if present and non-empty.
pub fn record_id(raw: &RawRecord) -> Option<&str> {
    raw.get(ID_COLUMN)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Mint an identifier for a record created on this device.
pub fn fresh_record_id() -> LocalId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Enforce the remote raw-record contract and return the record's
/// identifier.
///
/// Remote raws must carry a non-empty string `id` and must not carry the
/// reserved synchronization columns. Violations are contract errors, raised
/// immediately and never recovered.
pub fn validate_remote_raw(table: &str, raw: &RawRecord) -> Result<String> {
    if raw.contains_key(STATUS_COLUMN) || raw.contains_key(CHANGED_COLUMN) {
        return Err(Error::MalformedRemoteRecord {
            table: table.to_string(),
            detail: format!("carries a reserved '{STATUS_COLUMN}' or '{CHANGED_COLUMN}' column"),
        });
    }
    match record_id(raw) {
        Some(id) => Ok(id.to_string()),
        None => Err(Error::MalformedRemoteRecord {
            table: table.to_string(),
            detail: format!("missing a non-empty string '{ID_COLUMN}' field"),
        }),
    }
}

fn is_reserved(column: &str) -> bool {
    column == STATUS_COLUMN || column == CHANGED_COLUMN
}

/// Structural equality between two raws, ignoring the reserved
/// synchronization columns.
pub fn records_equal(a: &RawRecord, b: &RawRecord) -> bool {
    let significant = |raw: &RawRecord| raw.keys().filter(|k| !is_reserved(k)).count();
    significant(a) == significant(b)
        && a.iter()
            .filter(|(column, _)| !is_reserved(column))
            .all(|(column, value)| b.get(column) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn referenced_ids_cover_all_three_sequences() {
        let changes = TableChangeSet {
            created: vec![raw(json!({"id": "r1"}))],
            updated: vec![raw(json!({"id": "r2"}))],
            deleted: vec!["r3".into()],
        };
        assert_eq!(changes.referenced_ids(), vec!["r1", "r2", "r3"]);
        assert!(!changes.is_empty());
        assert!(TableChangeSet::default().is_empty());
    }

    #[test]
    fn validate_accepts_well_formed_raw() {
        let id = validate_remote_raw("orders", &raw(json!({"id": "r1", "total": 5}))).unwrap();
        assert_eq!(id, "r1");
    }

    #[test]
    fn validate_rejects_missing_or_empty_id() {
        assert!(validate_remote_raw("orders", &raw(json!({"total": 5}))).is_err());
        assert!(validate_remote_raw("orders", &raw(json!({"id": ""}))).is_err());
        assert!(validate_remote_raw("orders", &raw(json!({"id": 7}))).is_err());
    }

    #[test]
    fn validate_rejects_reserved_columns() {
        let result = validate_remote_raw("orders", &raw(json!({"id": "r1", "_status": "synced"})));
        assert!(matches!(
            result,
            Err(Error::MalformedRemoteRecord { table, .. }) if table == "orders"
        ));
        assert!(validate_remote_raw("orders", &raw(json!({"id": "r1", "_changed": ""}))).is_err());
    }

    #[test]
    fn equality_ignores_reserved_columns() {
        let pushed = raw(json!({"id": "l1", "name": "a", "_status": "created", "_changed": ""}));
        let stored = raw(json!({"id": "l1", "name": "a", "_status": "updated", "_changed": "name"}));
        assert!(records_equal(&pushed, &stored));

        let mutated = raw(json!({"id": "l1", "name": "b", "_status": "updated"}));
        assert!(!records_equal(&pushed, &mutated));

        let extra_column = raw(json!({"id": "l1", "name": "a", "note": "x"}));
        assert!(!records_equal(&pushed, &extra_column));
    }

    #[test]
    fn fresh_ids_are_distinct() {
        assert_ne!(fresh_record_id(), fresh_record_id());
    }
}
