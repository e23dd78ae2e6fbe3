//! The narrow storage interface the engine consumes.
//!
//! Reads may be issued concurrently; every mutation is staged as a
//! plain-data intent ([`WriteOp`]) and funneled through [`SyncStorage::commit`],
//! a single all-or-nothing transaction boundary. The engine performs the
//! empty-input shortcuts itself, so implementations never see empty
//! identifier sets.

use crate::{changes::RawRecord, error::Result, LocalId, TableName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One stored row: owning table, record identifier, full column map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// Table the record lives in
    pub table: TableName,
    /// Record identifier (local namespace)
    pub id: LocalId,
    /// The record's columns
    pub raw: RawRecord,
}

impl StoredRecord {
    /// Create a stored-record snapshot.
    pub fn new(table: impl Into<TableName>, id: impl Into<LocalId>, raw: RawRecord) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
            raw,
        }
    }
}

/// A deferred mutation, committed as part of an atomic [`WriteBatch`].
///
/// Records staged with `Create` come from the remote authority (or are
/// bookkeeping rows such as identifier mappings) and are born synchronized:
/// they carry no pending local changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum WriteOp {
    /// Insert a new record.
    Create {
        table: TableName,
        id: LocalId,
        raw: RawRecord,
    },
    /// Replace an existing record's columns.
    Update {
        table: TableName,
        id: LocalId,
        raw: RawRecord,
    },
    /// Permanently destroy a record.
    Destroy { table: TableName, id: LocalId },
    /// Clear a record's dirty/pending flag.
    MarkSynced { table: TableName, id: LocalId },
    /// Remove entries from the table's deletion ledger.
    PurgeTombstones {
        table: TableName,
        ids: Vec<LocalId>,
    },
}

/// An ordered sequence of staged mutations committed atomically.
pub type WriteBatch = Vec<WriteOp>;

/// Storage collaborator contract.
///
/// All methods suspend on the underlying storage. `commit` applies a whole
/// batch or nothing: the engine never observes a partially applied batch,
/// and a failed commit leaves no state behind.
#[async_trait]
pub trait SyncStorage: Send + Sync {
    /// Records of `table` whose identifier is in `ids`.
    async fn records_by_ids(&self, table: &str, ids: &[LocalId]) -> Result<Vec<StoredRecord>>;

    /// Records of `table` whose `column` value is one of `values`.
    async fn records_where_in(
        &self,
        table: &str,
        column: &str,
        values: &[String],
    ) -> Result<Vec<StoredRecord>>;

    /// Every record of `table`.
    async fn all_records(&self, table: &str) -> Result<Vec<StoredRecord>>;

    /// Identifiers currently tombstoned (deleted pending sync) in `table`.
    async fn tombstoned_ids(&self, table: &str) -> Result<Vec<LocalId>>;

    /// Drop entries from `table`'s deletion ledger.
    async fn purge_tombstones(&self, table: &str, ids: &[LocalId]) -> Result<()>;

    /// Apply `batch` as one transaction: all intents or none.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;
}
