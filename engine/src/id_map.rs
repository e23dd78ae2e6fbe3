//! The persisted local↔remote identifier mapping store.
//!
//! Mappings are rows of the reserved `id_mapping` table, read through the
//! ordinary storage interface and written only as staged intents inside the
//! caller's atomic batch. A mapping is created once (when a pushed create
//! is acknowledged with a server-assigned identifier, or defensively when a
//! remote-originated record first needs a stable local identifier) and is
//! never updated or deleted during normal operation. Keeping old mappings
//! around is what lets interrupted sync cycles recover.

use crate::{
    changes::{fresh_record_id, RawRecord},
    error::{Error, Result},
    storage::{SyncStorage, WriteOp},
    LocalId, RemoteId, TableName,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Table holding the identifier mappings.
pub const ID_MAPPING_TABLE: &str = "id_mapping";

const LOCAL_ID_COLUMN: &str = "local_id";
const REMOTE_ID_COLUMN: &str = "remote_id";

/// One `(local, remote, type)` identifier pairing.
///
/// `record_type` names the logical table the mapping applies to; at most
/// one mapping exists per `(remote_id, record_type)` and per
/// `(local_id, record_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub local_id: LocalId,
    pub remote_id: RemoteId,
    pub record_type: TableName,
}

impl IdMapping {
    fn from_raw(raw: &RawRecord) -> Result<Self> {
        serde_json::from_value(Value::Object(raw.clone())).map_err(Error::InvalidMapping)
    }

    fn to_raw(&self) -> RawRecord {
        let mut raw = RawRecord::new();
        raw.insert(
            LOCAL_ID_COLUMN.to_string(),
            Value::String(self.local_id.clone()),
        );
        raw.insert(
            REMOTE_ID_COLUMN.to_string(),
            Value::String(self.remote_id.clone()),
        );
        raw.insert(
            "record_type".to_string(),
            Value::String(self.record_type.clone()),
        );
        raw
    }
}

/// Batch lookup surface over the mapping table, scoped by record type.
///
/// Empty identifier sets short-circuit without a storage round-trip; an
/// unknown `record_type` yields empty results, never an error, since new
/// tables appearing server-side are a normal occurrence.
#[derive(Clone)]
pub struct IdMappingStore {
    storage: Arc<dyn SyncStorage>,
}

impl IdMappingStore {
    /// Create a store reading through `storage`.
    pub fn new(storage: Arc<dyn SyncStorage>) -> Self {
        Self { storage }
    }

    async fn rows_matching(
        &self,
        column: &str,
        values: &[String],
        record_type: &str,
    ) -> Result<Vec<IdMapping>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .storage
            .records_where_in(ID_MAPPING_TABLE, column, values)
            .await?;
        let mut mappings = Vec::with_capacity(rows.len());
        for row in rows {
            let mapping = IdMapping::from_raw(&row.raw)?;
            if mapping.record_type == record_type {
                mappings.push(mapping);
            }
        }
        Ok(mappings)
    }

    /// Local identifier mapped to `remote_id`, if any.
    pub async fn local_id_for(
        &self,
        remote_id: &str,
        record_type: &str,
    ) -> Result<Option<LocalId>> {
        let mappings = self
            .rows_matching(REMOTE_ID_COLUMN, &[remote_id.to_string()], record_type)
            .await?;
        Ok(mappings.into_iter().next().map(|m| m.local_id))
    }

    /// Local identifiers for the mapped subset of `remote_ids`, in no
    /// particular order.
    pub async fn local_ids_for(
        &self,
        remote_ids: &[RemoteId],
        record_type: &str,
    ) -> Result<Vec<LocalId>> {
        let mappings = self
            .rows_matching(REMOTE_ID_COLUMN, remote_ids, record_type)
            .await?;
        Ok(mappings.into_iter().map(|m| m.local_id).collect())
    }

    /// remote→local map for the mapped subset of `remote_ids`.
    pub async fn by_remote_ids(
        &self,
        remote_ids: &[RemoteId],
        record_type: &str,
    ) -> Result<HashMap<RemoteId, LocalId>> {
        let mappings = self
            .rows_matching(REMOTE_ID_COLUMN, remote_ids, record_type)
            .await?;
        Ok(mappings
            .into_iter()
            .map(|m| (m.remote_id, m.local_id))
            .collect())
    }

    /// local→remote map for the mapped subset of `local_ids`.
    pub async fn by_local_ids(
        &self,
        local_ids: &[LocalId],
        record_type: &str,
    ) -> Result<HashMap<LocalId, RemoteId>> {
        let mappings = self
            .rows_matching(LOCAL_ID_COLUMN, local_ids, record_type)
            .await?;
        Ok(mappings
            .into_iter()
            .map(|m| (m.local_id, m.remote_id))
            .collect())
    }

    /// Full local→remote scan across every record type. Diagnostic use.
    pub async fn all_mappings(&self) -> Result<HashMap<LocalId, RemoteId>> {
        let rows = self.storage.all_records(ID_MAPPING_TABLE).await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let mapping = IdMapping::from_raw(&row.raw)?;
            map.insert(mapping.local_id, mapping.remote_id);
        }
        Ok(map)
    }

    /// Stage a new mapping for the caller's atomic batch. Nothing is
    /// written until the batch commits.
    pub fn stage_create(
        &self,
        local_id: impl Into<LocalId>,
        remote_id: impl Into<RemoteId>,
        record_type: impl Into<TableName>,
    ) -> WriteOp {
        let mapping = IdMapping {
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            record_type: record_type.into(),
        };
        WriteOp::Create {
            table: ID_MAPPING_TABLE.to_string(),
            id: fresh_record_id(),
            raw: mapping.to_raw(),
        }
    }
}
