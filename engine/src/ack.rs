//! Committing push acknowledgments (the mark-as-synced path).
//!
//! Given the changeset that was pushed and the server's verdict, this stages
//! three kinds of intents into ONE atomic batch: synchronized-flag updates
//! for records the server accepted, identifier mappings for creates the
//! server confirmed published, and deletion-ledger purges for deletes the
//! server did not reject. A mapping is never persisted without the
//! corresponding flag commit, or vice versa.

use crate::{
    changes::{record_id, records_equal, LocalChanges, PublishedIds, RejectedIds, TableChangeSet},
    engine::SyncEngine,
    error::Result,
    log::LogSink,
    storage::{StoredRecord, WriteBatch, WriteOp},
    LocalId, RemoteId,
};
use std::collections::HashSet;

pub(crate) async fn run(
    engine: &SyncEngine,
    local: &LocalChanges,
    rejected: Option<&RejectedIds>,
    published: Option<&PublishedIds>,
    log: &dyn LogSink,
) -> Result<()> {
    let mut batch = WriteBatch::new();

    for (table, table_changes) in &local.changes {
        let rejected_ids: HashSet<&str> = rejected
            .and_then(|all| all.get(table))
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let published_ids = published.and_then(|all| all.get(table));

        stage_synced_flags(
            local,
            table,
            table_changes,
            &rejected_ids,
            published_ids,
            log,
            &mut batch,
        );
        stage_new_mappings(
            engine,
            table,
            table_changes,
            &rejected_ids,
            published_ids,
            &mut batch,
        );

        // Rejected deletes stay in the ledger for the next push.
        let purgeable: Vec<LocalId> = table_changes
            .deleted
            .iter()
            .filter(|id| !rejected_ids.contains(id.as_str()))
            .cloned()
            .collect();
        if !purgeable.is_empty() {
            batch.push(WriteOp::PurgeTombstones {
                table: table.clone(),
                ids: purgeable,
            });
        }
    }

    if batch.is_empty() {
        return Ok(());
    }
    engine.storage().commit(batch).await
}

/// Confirmed server-assigned identifier for the `index`-th created entry,
/// if the published list says so.
fn published_remote_id<'a>(
    published_ids: Option<&'a Vec<RemoteId>>,
    index: usize,
) -> Option<&'a str> {
    let id = published_ids?.get(index)?;
    (!id.is_empty() && id != "0").then_some(id.as_str())
}

fn stage_synced_flags(
    local: &LocalChanges,
    table: &str,
    table_changes: &TableChangeSet,
    rejected_ids: &HashSet<&str>,
    published_ids: Option<&Vec<RemoteId>>,
    log: &dyn LogSink,
    batch: &mut WriteBatch,
) {
    // Creates must be confirmed published when a published list is given;
    // updates carry no publication requirement.
    let creates = table_changes.created.iter().enumerate().map(|(index, raw)| {
        let confirmed =
            published_ids.is_none() || published_remote_id(published_ids, index).is_some();
        (raw, confirmed)
    });
    let updates = table_changes.updated.iter().map(|raw| (raw, true));

    for (raw, confirmed) in creates.chain(updates) {
        let Some(id) = record_id(raw) else {
            continue;
        };
        if rejected_ids.contains(id) || !confirmed {
            continue;
        }
        let Some(record) = find_affected(local, table, id) else {
            log.error(&format!(
                "looking for {table}#{id} to mark it as synchronized, but it \
                 cannot be found; it will sync next time"
            ));
            continue;
        };
        // A record mutated locally after being queued stays dirty.
        if records_equal(&record.raw, raw) {
            batch.push(WriteOp::MarkSynced {
                table: table.to_string(),
                id: id.to_string(),
            });
        }
    }
}

fn stage_new_mappings(
    engine: &SyncEngine,
    table: &str,
    table_changes: &TableChangeSet,
    rejected_ids: &HashSet<&str>,
    published_ids: Option<&Vec<RemoteId>>,
    batch: &mut WriteBatch,
) {
    for (index, raw) in table_changes.created.iter().enumerate() {
        let Some(local_id) = record_id(raw) else {
            continue;
        };
        if rejected_ids.contains(local_id) {
            continue;
        }
        if let Some(remote_id) = published_remote_id(published_ids, index) {
            batch.push(engine.mappings().stage_create(local_id, remote_id, table));
        }
    }
}

fn find_affected<'a>(local: &'a LocalChanges, table: &str, id: &str) -> Option<&'a StoredRecord> {
    local
        .affected_records
        .iter()
        .find(|record| record.table == table && record.id == id)
}
