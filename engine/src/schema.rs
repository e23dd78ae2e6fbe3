//! Table topology the engine needs from the schema layer.
//!
//! Column and type declaration live outside this crate. The engine only
//! needs to know which tables exist locally (incoming changesets for
//! unknown tables are skipped) and, per table, the belongs-to associations
//! whose foreign-key columns must be rewritten between identifier
//! namespaces.

use crate::{ColumnName, TableName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A belongs-to association: `key` holds the identifier of a record in
/// `table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BelongsTo {
    /// Related table the foreign key points into
    pub table: TableName,
    /// Foreign-key column on the owning table
    pub key: ColumnName,
}

impl BelongsTo {
    /// Create a new belongs-to association.
    pub fn new(table: impl Into<TableName>, key: impl Into<ColumnName>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
        }
    }
}

/// Sync-relevant description of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Table name
    pub name: TableName,
    /// Belongs-to associations declared on this table
    pub belongs_to: Vec<BelongsTo>,
}

impl TableSchema {
    /// Create a table description with no associations.
    pub fn new(name: impl Into<TableName>) -> Self {
        Self {
            name: name.into(),
            belongs_to: Vec::new(),
        }
    }

    /// Builder-style method to declare a belongs-to association.
    pub fn with_belongs_to(
        mut self,
        table: impl Into<TableName>,
        key: impl Into<ColumnName>,
    ) -> Self {
        self.belongs_to.push(BelongsTo::new(table, key));
        self
    }
}

/// The closed set of locally-known tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSchema {
    /// Table descriptions by name
    pub tables: HashMap<TableName, TableSchema>,
}

impl SyncSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table to the schema.
    pub fn add_table(&mut self, table: TableSchema) -> &mut Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Builder-style method to add a table.
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.add_table(table);
        self
    }

    /// Get a table description by name.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Whether `name` is a locally-known table.
    pub fn is_known(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_look_up() {
        let schema = SyncSchema::new()
            .with_table(TableSchema::new("customers"))
            .with_table(TableSchema::new("orders").with_belongs_to("customers", "customer_id"));

        assert!(schema.is_known("orders"));
        assert!(!schema.is_known("widgets"));

        let orders = schema.table("orders").unwrap();
        assert_eq!(
            orders.belongs_to,
            vec![BelongsTo::new("customers", "customer_id")]
        );
        assert!(schema.table("customers").unwrap().belongs_to.is_empty());
    }

    #[test]
    fn schema_serialization() {
        let schema = SyncSchema::new()
            .with_table(TableSchema::new("orders").with_belongs_to("customers", "customer_id"));
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: SyncSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }
}
