//! The engine facade: schema, storage, mapping store, and the three public
//! reconciliation entry points.

use crate::{
    ack,
    apply::{self, ApplyReport},
    changes::{DatabaseChangeSet, LocalChanges, PublishedIds, RawRecord, RejectedIds},
    error::Result,
    id_map::IdMappingStore,
    log::{LogSink, DEFAULT_SINK},
    push::{self, PushTranslation},
    schema::SyncSchema,
    storage::SyncStorage,
};
use std::sync::Arc;

/// External collaborator invoked when an incoming update must be merged
/// against an existing local record. Field-level merge policy is entirely
/// the implementation's concern; the engine only dispatches to it.
pub trait ConflictResolver: Send + Sync {
    /// Merge `incoming` into `current` and return the raw to persist.
    fn resolve(&self, table: &str, current: &RawRecord, incoming: &RawRecord) -> RawRecord;
}

/// Options for [`SyncEngine::apply_remote_changes`].
#[derive(Default)]
pub struct ApplyOptions<'a> {
    /// Set when the remote authority never emits `created` entries and
    /// sends every surviving record as `updated`.
    pub send_created_as_updated: bool,
    /// Split each table's intents into fixed-size chunks committed as
    /// separate transactions. Bounds transaction size for very large
    /// initial syncs at the cost of cross-chunk atomicity. Not the default.
    pub unsafe_batch_per_table: bool,
    /// Destination for recoverable-inconsistency reports. Defaults to the
    /// `tracing` sink.
    pub log: Option<&'a dyn LogSink>,
    /// Hook invoked when an incoming update meets an existing record.
    pub conflict_resolver: Option<&'a dyn ConflictResolver>,
}

impl ApplyOptions<'_> {
    pub(crate) fn sink(&self) -> &dyn LogSink {
        self.log.unwrap_or(&DEFAULT_SINK)
    }
}

/// The reconciliation engine.
///
/// Owns the identifier-mapping store and consumes record storage through the
/// narrow [`SyncStorage`] interface. Reads fan out concurrently; every
/// mutation is funneled into one atomic batch per call.
///
/// At most one apply/push/acknowledge cycle may be in flight at a time;
/// overlapping cycles must be serialized by the caller.
pub struct SyncEngine {
    schema: SyncSchema,
    storage: Arc<dyn SyncStorage>,
    mappings: IdMappingStore,
}

impl SyncEngine {
    /// Create an engine over `storage` for the locally-known `schema`.
    pub fn new(schema: SyncSchema, storage: Arc<dyn SyncStorage>) -> Self {
        let mappings = IdMappingStore::new(Arc::clone(&storage));
        Self {
            schema,
            storage,
            mappings,
        }
    }

    /// The locally-known tables.
    pub fn schema(&self) -> &SyncSchema {
        &self.schema
    }

    /// The identifier-mapping store.
    pub fn mappings(&self) -> &IdMappingStore {
        &self.mappings
    }

    pub(crate) fn storage(&self) -> &dyn SyncStorage {
        &*self.storage
    }

    /// Apply an incoming remote changeset to local storage.
    ///
    /// Unknown tables are skipped with a warning. Identifier collisions and
    /// other leftovers of interrupted cycles are resolved per the conflict
    /// policy and reported through the log sink; foreign keys that resolve
    /// nowhere are left unconverted and listed in the returned report.
    /// Contract violations and storage failures reject the call, leaving no
    /// partial state.
    pub async fn apply_remote_changes(
        &self,
        changes: DatabaseChangeSet,
        options: &ApplyOptions<'_>,
    ) -> Result<ApplyReport> {
        apply::run(self, changes, options).await
    }

    /// Rewrite a local changeset into the remote identifier namespace for
    /// transmission. No local state is mutated.
    pub async fn translate_local_changes_for_push(
        &self,
        changes: &DatabaseChangeSet,
        log: Option<&dyn LogSink>,
    ) -> Result<PushTranslation> {
        push::run(self, changes, log.unwrap_or(&DEFAULT_SINK)).await
    }

    /// Commit a push acknowledgment: mark accepted records synchronized,
    /// persist mappings for creates the server confirmed published, and
    /// purge acknowledged deletes from the deletion ledger, atomically.
    pub async fn mark_local_changes_as_synced(
        &self,
        local: &LocalChanges,
        rejected: Option<&RejectedIds>,
        published: Option<&PublishedIds>,
        log: Option<&dyn LogSink>,
    ) -> Result<()> {
        ack::run(self, local, rejected, published, log.unwrap_or(&DEFAULT_SINK)).await
    }
}
