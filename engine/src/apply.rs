//! Applying a remote changeset to local storage (the pull path).
//!
//! One apply pass runs in four phases per table: identifier resolution,
//! classification against local state, relation rewriting, and an atomic
//! commit. Reads fan out concurrently; all mutations land in one batch so a
//! multi-table changeset is applied all-or-nothing. Conflicting states are
//! what an interrupted earlier cycle leaves behind, so they are resolved
//! with a fallback and a log line rather than a failure.

use crate::{
    changes::{fresh_record_id, validate_remote_raw, DatabaseChangeSet, RawRecord, TableChangeSet, ID_COLUMN},
    engine::{ApplyOptions, ConflictResolver, SyncEngine},
    error::{Error, Result},
    relation::{
        convert_related_ids, related_records_for, IdDirection, InFlightMappings, RelatedRecords,
        UnresolvedReference,
    },
    schema::TableSchema,
    storage::{StoredRecord, WriteBatch, WriteOp},
    LocalId, RemoteId,
};
use futures::future;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Chunk size for the unsafe per-table commit mode.
const UNSAFE_COMMIT_CHUNK: usize = 5000;

/// Outcome of one apply pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Records created locally
    pub created: usize,
    /// Records updated locally
    pub updated: usize,
    /// Records destroyed locally
    pub destroyed: usize,
    /// Foreign keys that resolved to no known identifier and were left
    /// unconverted
    pub unresolved: Vec<UnresolvedReference>,
}

/// Per-table working set for one apply pass. Never persisted.
struct RecordsToApply {
    changes: TableChangeSet,
    /// Local records matching the changeset's resolved identifiers
    records: HashMap<LocalId, StoredRecord>,
    /// Identifiers currently in the table's deletion ledger
    tombstoned: HashSet<LocalId>,
    /// Present local records the remote changeset deletes
    records_to_destroy: Vec<LocalId>,
    /// Ledger entries the remote changeset confirms as deleted
    tombstones_to_purge: Vec<LocalId>,
    remote_to_local: HashMap<RemoteId, LocalId>,
    related: RelatedRecords,
}

pub(crate) async fn run(
    engine: &SyncEngine,
    changes: DatabaseChangeSet,
    options: &ApplyOptions<'_>,
) -> Result<ApplyReport> {
    let log = options.sink();

    // Forward compatibility: the server may introduce tables before this
    // client knows them.
    let mut recognized = Vec::new();
    for (table, table_changes) in changes {
        match engine.schema().table(&table) {
            Some(schema) => recognized.push((table, schema, table_changes)),
            None => log.warn(&format!(
                "incoming changeset references unknown table '{table}'; skipping it"
            )),
        }
    }

    // Phase 1: per-table working sets, fetched concurrently.
    let fetches = recognized
        .into_iter()
        .map(|(table, schema, table_changes)| async move {
            let working = records_to_apply(engine, &table, schema, table_changes).await?;
            Ok::<_, Error>((table, working))
        });
    let mut working_sets = future::try_join_all(fetches).await?;

    // Phases 2-3: classification and relation rewriting, in changeset order
    // so in-flight mappings see creates staged earlier in the same pass.
    let mut report = ApplyReport::default();
    let mut in_flight = InFlightMappings::new();
    let mut batches: Vec<WriteBatch> = Vec::with_capacity(working_sets.len());
    for (table, working) in &mut working_sets {
        let mut batch = WriteBatch::new();
        prepare_table(
            engine,
            table,
            working,
            options,
            &mut in_flight,
            &mut report,
            &mut batch,
        )?;
        batches.push(batch);
    }

    // Phase 4: commit, with remote-confirmed tombstone purges running
    // independently of the main pipeline.
    let purges = async {
        let pending = working_sets
            .iter()
            .filter(|(_, working)| !working.tombstones_to_purge.is_empty())
            .map(|(table, working)| {
                engine
                    .storage()
                    .purge_tombstones(table, &working.tombstones_to_purge)
            });
        future::try_join_all(pending).await.map(|_| ())
    };
    futures::try_join!(purges, commit_batches(engine, batches, options.unsafe_batch_per_table))?;

    Ok(report)
}

async fn records_to_apply(
    engine: &SyncEngine,
    table: &str,
    schema: &TableSchema,
    changes: TableChangeSet,
) -> Result<RecordsToApply> {
    // Everything the changeset references is in the remote namespace.
    let referenced = changes.referenced_ids();
    let remote_to_local = engine.mappings().by_remote_ids(&referenced, table).await?;
    let related = related_records_for(
        engine.mappings(),
        schema,
        &changes,
        IdDirection::RemoteToLocal,
    )
    .await?;

    let local_ids: Vec<LocalId> = remote_to_local.values().cloned().collect();
    let records = async {
        if local_ids.is_empty() {
            Ok(Vec::new())
        } else {
            engine.storage().records_by_ids(table, &local_ids).await
        }
    };
    let tombstones = engine.storage().tombstoned_ids(table);
    let (records, tombstoned) = futures::try_join!(records, tombstones)?;

    let records: HashMap<LocalId, StoredRecord> = records
        .into_iter()
        .map(|record| (record.id.clone(), record))
        .collect();
    let tombstoned: HashSet<LocalId> = tombstoned.into_iter().collect();

    let deleted_local: Vec<LocalId> = changes
        .deleted
        .iter()
        .filter_map(|remote_id| remote_to_local.get(remote_id).cloned())
        .collect();
    let records_to_destroy = deleted_local
        .iter()
        .filter(|id| records.contains_key(*id))
        .cloned()
        .collect();
    let tombstones_to_purge = deleted_local
        .into_iter()
        .filter(|id| tombstoned.contains(id))
        .collect();

    Ok(RecordsToApply {
        changes,
        records,
        tombstoned,
        records_to_destroy,
        tombstones_to_purge,
        remote_to_local,
        related,
    })
}

fn prepare_table(
    engine: &SyncEngine,
    table: &str,
    working: &mut RecordsToApply,
    options: &ApplyOptions<'_>,
    in_flight: &mut InFlightMappings,
    report: &mut ApplyReport,
    batch: &mut WriteBatch,
) -> Result<()> {
    let log = options.sink();

    if options.send_created_as_updated && !working.changes.created.is_empty() {
        log.error(&format!(
            "'send_created_as_updated' is enabled, yet the server sent 'created' \
             entries for table '{table}'"
        ));
    }

    let created = std::mem::take(&mut working.changes.created);
    for mut raw in created {
        let remote_id = validate_remote_raw(table, &raw)?;
        convert_related_ids(
            table,
            &mut raw,
            &working.related,
            IdDirection::RemoteToLocal,
            in_flight,
            log,
            &mut report.unresolved,
        );

        match working.remote_to_local.get(&remote_id).cloned() {
            Some(local_id) if working.records.contains_key(&local_id) => {
                // Likely a partially-completed earlier sync; update instead.
                log.warn(&format!(
                    "server wants to create {table}#{remote_id}, but it already \
                     exists locally; updating the existing record instead"
                ));
                let current = &working.records[&local_id];
                batch.push(prepare_update(current, raw, options.conflict_resolver));
                report.updated += 1;
            }
            Some(local_id) if working.tombstoned.contains(&local_id) => {
                // A local deletion raced the remote creation.
                log.warn(&format!(
                    "server wants to create {table}#{remote_id}, but its local \
                     counterpart is marked deleted; purging the tombstone and recreating"
                ));
                working.tombstones_to_purge.push(local_id.clone());
                batch.push(prepare_create(table, local_id, raw));
                report.created += 1;
            }
            Some(local_id) => {
                // A mapping survives from an earlier cycle but the record is
                // gone; recreate under the mapped identifier so the mapping
                // stays unique.
                batch.push(prepare_create(table, local_id, raw));
                report.created += 1;
            }
            None => {
                stage_fresh_create(engine, table, remote_id, raw, in_flight, batch);
                report.created += 1;
            }
        }
    }

    let updated = std::mem::take(&mut working.changes.updated);
    for mut raw in updated {
        let remote_id = validate_remote_raw(table, &raw)?;
        convert_related_ids(
            table,
            &mut raw,
            &working.related,
            IdDirection::RemoteToLocal,
            in_flight,
            log,
            &mut report.unresolved,
        );

        match working.remote_to_local.get(&remote_id).cloned() {
            Some(local_id) if working.records.contains_key(&local_id) => {
                let current = &working.records[&local_id];
                batch.push(prepare_update(current, raw, options.conflict_resolver));
                report.updated += 1;
            }
            Some(local_id) if working.tombstoned.contains(&local_id) => {
                // The local deletion will itself be pushed upstream later;
                // the remote update is moot.
            }
            Some(local_id) => {
                if !options.send_created_as_updated {
                    log.warn(&format!(
                        "server wants to update {table}#{remote_id}, but it does \
                         not exist locally; creating it instead"
                    ));
                }
                batch.push(prepare_create(table, local_id, raw));
                report.created += 1;
            }
            None => {
                if !options.send_created_as_updated {
                    log.warn(&format!(
                        "server wants to update {table}#{remote_id}, but it does \
                         not exist locally; creating it instead"
                    ));
                }
                stage_fresh_create(engine, table, remote_id, raw, in_flight, batch);
                report.created += 1;
            }
        }
    }

    for local_id in &working.records_to_destroy {
        batch.push(WriteOp::Destroy {
            table: table.to_string(),
            id: local_id.clone(),
        });
        report.destroyed += 1;
    }

    Ok(())
}

/// Create under a fresh local identifier and stage the defensive mapping, so
/// later cycles (and later records in this pass) can find the record.
fn stage_fresh_create(
    engine: &SyncEngine,
    table: &str,
    remote_id: RemoteId,
    raw: RawRecord,
    in_flight: &mut InFlightMappings,
    batch: &mut WriteBatch,
) {
    let local_id = fresh_record_id();
    batch.push(prepare_create(table, local_id.clone(), raw));
    batch.push(
        engine
            .mappings()
            .stage_create(local_id.clone(), remote_id.clone(), table),
    );
    in_flight
        .entry(table.to_string())
        .or_default()
        .insert(remote_id, local_id);
}

fn prepare_create(table: &str, local_id: LocalId, mut raw: RawRecord) -> WriteOp {
    raw.insert(ID_COLUMN.to_string(), Value::String(local_id.clone()));
    WriteOp::Create {
        table: table.to_string(),
        id: local_id,
        raw,
    }
}

/// Stage an update of `current` from an incoming remote raw, dispatching to
/// the conflict-resolution hook when one is installed.
fn prepare_update(
    current: &StoredRecord,
    incoming: RawRecord,
    resolver: Option<&dyn ConflictResolver>,
) -> WriteOp {
    let mut merged = match resolver {
        Some(resolver) => resolver.resolve(&current.table, &current.raw, &incoming),
        None => incoming,
    };
    merged.insert(ID_COLUMN.to_string(), Value::String(current.id.clone()));
    WriteOp::Update {
        table: current.table.clone(),
        id: current.id.clone(),
        raw: merged,
    }
}

async fn commit_batches(
    engine: &SyncEngine,
    batches: Vec<WriteBatch>,
    unsafe_batch_per_table: bool,
) -> Result<()> {
    if unsafe_batch_per_table {
        // Bounds per-transaction size for very large initial syncs, at the
        // cost of cross-chunk atomicity.
        let mut chunks = Vec::new();
        for batch in batches {
            for chunk in batch.chunks(UNSAFE_COMMIT_CHUNK) {
                chunks.push(chunk.to_vec());
            }
        }
        future::try_join_all(
            chunks
                .into_iter()
                .filter(|chunk| !chunk.is_empty())
                .map(|chunk| engine.storage().commit(chunk)),
        )
        .await
        .map(|_| ())
    } else {
        let joint: WriteBatch = batches.into_iter().flatten().collect();
        if joint.is_empty() {
            return Ok(());
        }
        engine.storage().commit(joint).await
    }
}
