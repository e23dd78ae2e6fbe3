//! Foreign-key resolution between identifier namespaces.
//!
//! For each belongs-to association of a table, the resolver batches one
//! mapping lookup over the foreign-key values a changeset references, then
//! rewrites each raw record's columns into the target namespace. Identifier
//! columns are strings; an absent, null, empty, or `"0"` value means "no
//! relation" and is never looked up.

use crate::{
    changes::{RawRecord, TableChangeSet},
    error::{Error, Result},
    id_map::IdMappingStore,
    log::LogSink,
    schema::TableSchema,
    ColumnName, TableName,
};
use futures::future;
use serde_json::Value;
use std::collections::HashMap;

/// Direction of an identifier conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdDirection {
    /// Incoming changesets: rewrite remote identifiers into local ones.
    RemoteToLocal,
    /// Outgoing changesets: rewrite local identifiers into remote ones.
    LocalToRemote,
}

/// Resolved mappings for one belongs-to association, keyed in the direction
/// of the current conversion.
#[derive(Debug, Clone, Default)]
pub struct RelatedRecord {
    /// Foreign-key column on the owning table
    pub column_name: ColumnName,
    /// source-namespace identifier → target-namespace identifier
    pub mappings: HashMap<String, String>,
}

/// Per-related-table resolved mappings for one table's changeset.
pub type RelatedRecords = HashMap<TableName, RelatedRecord>;

/// Identifier mappings staged earlier in the same apply pass, keyed by
/// table. Lets a record reference a sibling created in the same cycle
/// before the sibling's mapping has been committed.
pub type InFlightMappings = HashMap<TableName, HashMap<String, String>>;

/// A foreign-key value that resolved to no known identifier. The column is
/// left unconverted; callers decide whether to retry or abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    /// Table owning the foreign key
    pub table: TableName,
    /// Foreign-key column
    pub column: ColumnName,
    /// Table the reference points into
    pub related_table: TableName,
    /// The identifier that failed to resolve
    pub id: String,
}

/// A foreign-key value treated as "a relation is set".
fn relation_target(value: Option<&Value>) -> Option<&str> {
    match value? {
        Value::String(id) if !id.is_empty() && id != "0" => Some(id),
        _ => None,
    }
}

/// Non-empty foreign-key values of `column` across creates and updates.
/// Deletions carry no payload and contribute nothing.
fn ids_for_relations(changes: &TableChangeSet, column: &str) -> Vec<String> {
    changes
        .created
        .iter()
        .chain(&changes.updated)
        .filter_map(|raw| relation_target(raw.get(column)))
        .map(str::to_string)
        .collect()
}

/// Resolve every belongs-to association of `table` for `changes`, one
/// batched mapping lookup per association.
pub(crate) async fn related_records_for(
    mappings: &IdMappingStore,
    table: &TableSchema,
    changes: &TableChangeSet,
    direction: IdDirection,
) -> Result<RelatedRecords> {
    let lookups = table.belongs_to.iter().map(|association| async move {
        let ids = ids_for_relations(changes, &association.key);
        let resolved = match direction {
            IdDirection::RemoteToLocal => mappings.by_remote_ids(&ids, &association.table).await?,
            IdDirection::LocalToRemote => mappings.by_local_ids(&ids, &association.table).await?,
        };
        Ok::<_, Error>((
            association.table.clone(),
            RelatedRecord {
                column_name: association.key.clone(),
                mappings: resolved,
            },
        ))
    });
    Ok(future::try_join_all(lookups).await?.into_iter().collect())
}

/// Rewrite `raw`'s foreign-key columns into the target namespace, in place.
///
/// Persisted mappings win; for remote→local conversion, identifiers staged
/// earlier in the same pass are consulted next. A set foreign key that
/// resolves nowhere is reported and left unconverted.
pub(crate) fn convert_related_ids(
    table: &str,
    raw: &mut RawRecord,
    related: &RelatedRecords,
    direction: IdDirection,
    in_flight: &InFlightMappings,
    log: &dyn LogSink,
    unresolved: &mut Vec<UnresolvedReference>,
) {
    for (related_table, relation) in related {
        let Some(current) = relation_target(raw.get(&relation.column_name)).map(str::to_string)
        else {
            continue;
        };

        let mut target = relation.mappings.get(&current);
        if target.is_none() && direction == IdDirection::RemoteToLocal {
            target = in_flight
                .get(related_table)
                .and_then(|staged| staged.get(&current));
        }

        match target {
            Some(target) => {
                let target = target.clone();
                raw.insert(relation.column_name.clone(), Value::String(target));
            }
            None => {
                let side = match direction {
                    IdDirection::RemoteToLocal => "no local counterpart exists",
                    IdDirection::LocalToRemote => "the server has never seen it",
                };
                log.error(&format!(
                    "record in '{table}' references {related_table}#{current} via \
                     '{column}', but {side}; leaving the column unconverted",
                    column = relation.column_name,
                ));
                unresolved.push(UnresolvedReference {
                    table: table.to_string(),
                    column: relation.column_name.clone(),
                    related_table: related_table.clone(),
                    id: current,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturedLog {
        entries: Mutex<Vec<String>>,
    }

    impl LogSink for CapturedLog {
        fn warn(&self, message: &str) {
            self.entries.lock().unwrap().push(message.to_string());
        }

        fn error(&self, message: &str) {
            self.entries.lock().unwrap().push(message.to_string());
        }
    }

    fn raw(value: Value) -> RawRecord {
        value.as_object().unwrap().clone()
    }

    fn customer_relation(mappings: &[(&str, &str)]) -> RelatedRecords {
        let mut related = RelatedRecords::new();
        related.insert(
            "customers".to_string(),
            RelatedRecord {
                column_name: "customer_id".to_string(),
                mappings: mappings
                    .iter()
                    .map(|(from, to)| (from.to_string(), to.to_string()))
                    .collect(),
            },
        );
        related
    }

    #[test]
    fn ids_for_relations_skips_empty_markers() {
        let changes = TableChangeSet {
            created: vec![
                raw(json!({"id": "r1", "customer_id": "c1"})),
                raw(json!({"id": "r2", "customer_id": ""})),
                raw(json!({"id": "r3", "customer_id": "0"})),
                raw(json!({"id": "r4"})),
                raw(json!({"id": "r5", "customer_id": null})),
            ],
            updated: vec![raw(json!({"id": "r6", "customer_id": "c2"}))],
            deleted: vec!["r7".into()],
        };
        assert_eq!(ids_for_relations(&changes, "customer_id"), vec!["c1", "c2"]);
    }

    #[test]
    fn converts_via_persisted_mappings() {
        let related = customer_relation(&[("c-remote", "c-local")]);
        let mut record = raw(json!({"id": "r1", "customer_id": "c-remote"}));
        let mut unresolved = Vec::new();

        convert_related_ids(
            "orders",
            &mut record,
            &related,
            IdDirection::RemoteToLocal,
            &InFlightMappings::new(),
            &CapturedLog::default(),
            &mut unresolved,
        );

        assert_eq!(record["customer_id"], json!("c-local"));
        assert!(unresolved.is_empty());
    }

    #[test]
    fn falls_back_to_in_flight_for_remote_to_local_only() {
        let related = customer_relation(&[]);
        let mut in_flight = InFlightMappings::new();
        in_flight
            .entry("customers".to_string())
            .or_default()
            .insert("c-remote".to_string(), "c-staged".to_string());

        let mut record = raw(json!({"id": "r1", "customer_id": "c-remote"}));
        let mut unresolved = Vec::new();
        convert_related_ids(
            "orders",
            &mut record,
            &related,
            IdDirection::RemoteToLocal,
            &in_flight,
            &CapturedLog::default(),
            &mut unresolved,
        );
        assert_eq!(record["customer_id"], json!("c-staged"));
        assert!(unresolved.is_empty());

        // The outgoing direction never consults in-flight state.
        let mut record = raw(json!({"id": "r1", "customer_id": "c-remote"}));
        convert_related_ids(
            "orders",
            &mut record,
            &related,
            IdDirection::LocalToRemote,
            &in_flight,
            &CapturedLog::default(),
            &mut unresolved,
        );
        assert_eq!(record["customer_id"], json!("c-remote"));
        assert_eq!(unresolved.len(), 1);
    }

    #[test]
    fn unresolved_reference_is_reported_and_left_as_is() {
        let related = customer_relation(&[]);
        let log = CapturedLog::default();
        let mut record = raw(json!({"id": "r1", "customer_id": "c-unknown"}));
        let mut unresolved = Vec::new();

        convert_related_ids(
            "orders",
            &mut record,
            &related,
            IdDirection::RemoteToLocal,
            &InFlightMappings::new(),
            &log,
            &mut unresolved,
        );

        assert_eq!(record["customer_id"], json!("c-unknown"));
        assert_eq!(
            unresolved,
            vec![UnresolvedReference {
                table: "orders".into(),
                column: "customer_id".into(),
                related_table: "customers".into(),
                id: "c-unknown".into(),
            }]
        );
        assert_eq!(log.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn empty_foreign_keys_are_never_touched() {
        let related = customer_relation(&[("0", "never")]);
        let log = CapturedLog::default();
        let mut record = raw(json!({"id": "r1", "customer_id": "0"}));
        let mut unresolved = Vec::new();

        convert_related_ids(
            "orders",
            &mut record,
            &related,
            IdDirection::RemoteToLocal,
            &InFlightMappings::new(),
            &log,
            &mut unresolved,
        );

        assert_eq!(record["customer_id"], json!("0"));
        assert!(unresolved.is_empty());
        assert!(log.entries.lock().unwrap().is_empty());
    }
}
