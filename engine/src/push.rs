//! Translating a local changeset into the remote identifier namespace (the
//! push path).
//!
//! Pure translation: nothing is mutated locally. Creates lose their local
//! identifier (the server assigns one), updates and deletes are rewritten to
//! remote identifiers, and foreign keys are converted local→remote. Records
//! the server cannot address are dropped from the outgoing set.

use crate::{
    changes::{record_id, DatabaseChangeSet, TableChangeSet, ID_COLUMN},
    engine::SyncEngine,
    error::{Error, Result},
    log::LogSink,
    relation::{
        convert_related_ids, related_records_for, IdDirection, InFlightMappings,
        UnresolvedReference,
    },
};
use futures::future;
use serde_json::Value;

/// A changeset rewritten for transmission, plus the foreign keys that could
/// not be mapped.
#[derive(Debug, Clone, Default)]
pub struct PushTranslation {
    /// The outgoing changeset, in the remote identifier namespace
    pub changes: DatabaseChangeSet,
    /// Foreign keys left unconverted because no mapping was found
    pub unresolved: Vec<UnresolvedReference>,
}

pub(crate) async fn run(
    engine: &SyncEngine,
    changes: &DatabaseChangeSet,
    log: &dyn LogSink,
) -> Result<PushTranslation> {
    let mut recognized = Vec::new();
    for (table, table_changes) in changes {
        match engine.schema().table(table) {
            Some(schema) => recognized.push((table.as_str(), schema, table_changes)),
            None => log.warn(&format!(
                "local changeset references unknown table '{table}'; skipping it"
            )),
        }
    }

    // Resolve mappings and relations for every table concurrently.
    let fetches = recognized
        .into_iter()
        .map(|(table, schema, table_changes)| async move {
            let ids = table_changes.referenced_ids();
            let local_to_remote = engine.mappings().by_local_ids(&ids, table).await?;
            let related = related_records_for(
                engine.mappings(),
                schema,
                table_changes,
                IdDirection::LocalToRemote,
            )
            .await?;
            Ok::<_, Error>((table, table_changes, local_to_remote, related))
        });
    let resolved = future::try_join_all(fetches).await?;

    let mut out = DatabaseChangeSet::new();
    let mut unresolved = Vec::new();
    let in_flight = InFlightMappings::new();

    for (table, table_changes, local_to_remote, related) in resolved {
        let mut mapped = TableChangeSet::default();

        // Creates lose their local identifier; the server assigns one and
        // reports it back through the push acknowledgment.
        for raw in &table_changes.created {
            let mut raw = raw.clone();
            raw.remove(ID_COLUMN);
            convert_related_ids(
                table,
                &mut raw,
                &related,
                IdDirection::LocalToRemote,
                &in_flight,
                log,
                &mut unresolved,
            );
            mapped.created.push(raw);
        }

        for raw in &table_changes.updated {
            let Some(local_id) = record_id(raw).map(str::to_string) else {
                log.error(&format!(
                    "local update for '{table}' carries no identifier; dropping it from the push"
                ));
                continue;
            };
            match local_to_remote.get(&local_id) {
                Some(remote_id) => {
                    let mut raw = raw.clone();
                    raw.insert(ID_COLUMN.to_string(), Value::String(remote_id.clone()));
                    convert_related_ids(
                        table,
                        &mut raw,
                        &related,
                        IdDirection::LocalToRemote,
                        &in_flight,
                        log,
                        &mut unresolved,
                    );
                    mapped.updated.push(raw);
                }
                None => {
                    // The record's create was never acknowledged: a
                    // data-integrity signal, not a crash.
                    log.error(&format!(
                        "no remote mapping for {table}#{local_id}; dropping the \
                         update from the push"
                    ));
                }
            }
        }

        // A local delete of a record the server never knew about needs no
        // network round-trip.
        for local_id in &table_changes.deleted {
            if let Some(remote_id) = local_to_remote.get(local_id) {
                mapped.deleted.push(remote_id.clone());
            }
        }

        out.insert(table.to_string(), mapped);
    }

    Ok(PushTranslation {
        changes: out,
        unresolved,
    })
}
