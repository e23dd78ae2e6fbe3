//! # Splice Engine
//!
//! The reconciliation core of an offline-first data synchronization engine.
//!
//! Records created while offline carry locally-generated identifiers; the
//! server assigns its own when they are pushed. This crate maintains the
//! persisted mapping between the two identifier namespaces and uses it to
//! reconcile changesets flowing in both directions:
//!
//! - **Pull**: [`SyncEngine::apply_remote_changes`] applies a remote
//!   changeset to local storage, resolving identifier collisions left behind
//!   by interrupted cycles and rewriting foreign keys into the local
//!   namespace.
//! - **Push**: [`SyncEngine::translate_local_changes_for_push`] rewrites an
//!   outgoing changeset into the remote namespace; creates lose their local
//!   identifier entirely.
//! - **Acknowledge**: [`SyncEngine::mark_local_changes_as_synced`] commits
//!   the server's verdict on a push: accepted records are marked
//!   synchronized and newly assigned identifiers are recorded, atomically.
//!
//! ## Design Principles
//!
//! - **Narrow edges**: record storage is consumed only through the
//!   [`SyncStorage`] trait; the network transport is someone else's problem.
//! - **One write funnel**: reads fan out concurrently, but every mutation is
//!   staged as a [`WriteOp`] and committed in one atomic batch per call.
//! - **Resilient to interruption**: leftovers of an interrupted cycle are
//!   recovered with fallback actions and a log line, never a failure. A sync
//!   cycle that died halfway must not wedge the next one.
//! - **No global logging**: callers thread an explicit [`LogSink`]; the
//!   [`TracingSink`] default forwards to the `tracing` facade.
//!
//! ## Quick Start
//!
//! ```rust
//! use splice_engine::{
//!     ApplyOptions, DatabaseChangeSet, MemoryStorage, SyncEngine, SyncSchema,
//!     TableChangeSet, TableSchema,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! // 1. Describe the locally-known tables and their associations
//! let schema = SyncSchema::new()
//!     .with_table(TableSchema::new("customers"))
//!     .with_table(TableSchema::new("orders").with_belongs_to("customers", "customer_id"));
//!
//! // 2. Create an engine over a storage backend
//! let storage = Arc::new(MemoryStorage::new());
//! let engine = SyncEngine::new(schema, storage.clone());
//!
//! // 3. Apply a remote changeset
//! let mut changes = DatabaseChangeSet::new();
//! changes.insert(
//!     "orders".to_string(),
//!     TableChangeSet {
//!         created: vec![json!({"id": "r1", "total": 5}).as_object().unwrap().clone()],
//!         updated: vec![],
//!         deleted: vec![],
//!     },
//! );
//!
//! let report = futures::executor::block_on(
//!     engine.apply_remote_changes(changes, &ApplyOptions::default()),
//! )
//! .unwrap();
//! assert_eq!(report.created, 1);
//! ```
//!
//! ## Concurrency
//!
//! All storage interaction suspends; the engine spawns nothing and owns no
//! runtime. Concurrent invocations of the engine itself are not supported:
//! the caller serializes sync cycles.

pub mod changes;
pub mod engine;
pub mod error;
pub mod id_map;
pub mod log;
pub mod memory;
pub mod relation;
pub mod schema;
pub mod storage;

mod ack;
mod apply;
mod push;

// Re-export main types at crate root
pub use apply::ApplyReport;
pub use changes::{
    fresh_record_id, record_id, records_equal, validate_remote_raw, DatabaseChangeSet,
    LocalChanges, PublishedIds, RawRecord, RejectedIds, TableChangeSet, CHANGED_COLUMN, ID_COLUMN,
    STATUS_COLUMN,
};
pub use engine::{ApplyOptions, ConflictResolver, SyncEngine};
pub use error::{Error, Result};
pub use id_map::{IdMapping, IdMappingStore, ID_MAPPING_TABLE};
pub use log::{LogSink, TracingSink};
pub use memory::MemoryStorage;
pub use push::PushTranslation;
pub use relation::{
    IdDirection, InFlightMappings, RelatedRecord, RelatedRecords, UnresolvedReference,
};
pub use schema::{BelongsTo, SyncSchema, TableSchema};
pub use storage::{StoredRecord, SyncStorage, WriteBatch, WriteOp};

/// Type aliases for clarity
pub type LocalId = String;
pub type RemoteId = String;
pub type TableName = String;
pub type ColumnName = String;
