//! Typed view over the schema provider payload.
//!
//! Every accessor is total: unknown tables yield empty collections so the
//! graph and field-path code never has to special-case a missing name.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Invalid schema payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub typ: String,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub has_default: bool,
    #[serde(default)]
    pub auto_increment: bool,
}

impl ColumnDescriptor {
    pub fn new(name: &str, typ: &str) -> Self {
        Self {
            name: name.to_string(),
            typ: typ.to_string(),
            not_null: false,
            has_default: false,
            auto_increment: false,
        }
    }

    /// Must be supplied by the user when a record is created.
    pub fn is_required_on_create(&self) -> bool {
        self.not_null && !self.has_default && !self.auto_increment
    }
}

/// Directed edge `table.column -> ref_table.ref_column`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyEdge {
    #[serde(default)]
    pub table: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
    #[serde(default)]
    pub on_delete: Option<String>,
    #[serde(default)]
    pub on_update: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ForeignKeyEdge {
    pub fn new(table: &str, column: &str, ref_table: &str, ref_column: &str) -> Self {
        Self {
            table: table.to_string(),
            column: column.to_string(),
            ref_table: ref_table.to_string(),
            ref_column: ref_column.to_string(),
            on_delete: None,
            on_update: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyEdge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    Entity,
    Lookup,
    Junction,
}

impl TableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Lookup => "lookup",
            Self::Junction => "junction",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRoleMeta {
    #[serde(default)]
    pub table_type: Option<TableType>,
    #[serde(default)]
    pub label_column: Option<String>,
}

/// One database as returned by the schema provider. Table order is the
/// payload order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSchema {
    #[serde(default)]
    pub tables: IndexMap<String, TableSchema>,
    #[serde(default)]
    pub table_meta: IndexMap<String, TableRoleMeta>,
}

impl DatabaseSchema {
    pub fn from_json(source: &str) -> Result<Self, SchemaError> {
        let mut schema: DatabaseSchema = serde_json::from_str(source)?;
        schema.fill_owner_names();
        tracing::debug!(tables = schema.tables.len(), "schema loaded");
        Ok(schema)
    }

    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let source = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&source)
    }

    /// Payloads may omit the table name on a table or its foreign keys
    /// since the map key already carries it.
    fn fill_owner_names(&mut self) {
        for (name, table) in self.tables.iter_mut() {
            if table.name.is_empty() {
                table.name = name.clone();
            }
            for fk in table.foreign_keys.iter_mut() {
                if fk.table.is_empty() {
                    fk.table = name.clone();
                }
            }
        }
    }

    pub fn insert_table(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn set_role(&mut self, table: &str, meta: TableRoleMeta) {
        self.table_meta.insert(table.to_string(), meta);
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|k| k.as_str())
    }

    pub fn table(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    pub fn columns_of(&self, table: &str) -> &[ColumnDescriptor] {
        self.tables
            .get(table)
            .map(|t| t.columns.as_slice())
            .unwrap_or(&[])
    }

    pub fn primary_key_of(&self, table: &str) -> &[String] {
        self.tables
            .get(table)
            .map(|t| t.primary_key.as_slice())
            .unwrap_or(&[])
    }

    pub fn foreign_keys_of(&self, table: &str) -> &[ForeignKeyEdge] {
        self.tables
            .get(table)
            .map(|t| t.foreign_keys.as_slice())
            .unwrap_or(&[])
    }

    pub fn role_of(&self, table: &str) -> Option<&TableRoleMeta> {
        self.table_meta.get(table)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns_of(table).iter().any(|c| c.name == column)
    }

    /// Columns that must be filled in before a create is issued.
    pub fn required_on_create(&self, table: &str) -> Vec<&str> {
        self.columns_of(table)
            .iter()
            .filter(|c| c.is_required_on_create())
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn table(name: &str, columns: &[&str], pk: &[&str], fks: &[(&str, &str, &str)]) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|c| ColumnDescriptor::new(c, "int"))
                .collect(),
            primary_key: pk.iter().map(|s| s.to_string()).collect(),
            foreign_keys: fks
                .iter()
                .map(|(col, ref_table, ref_col)| ForeignKeyEdge::new(name, col, ref_table, ref_col))
                .collect(),
        }
    }

    /// Orders / Customers / OrderTags / Tags.
    pub fn shop() -> DatabaseSchema {
        let mut schema = DatabaseSchema::default();
        schema.insert_table(table(
            "Orders",
            &["id", "customer_id", "total"],
            &["id"],
            &[("customer_id", "Customers", "id")],
        ));
        schema.insert_table(table("Customers", &["id", "name", "email"], &["id"], &[]));
        schema.insert_table(table(
            "OrderTags",
            &["order_id", "tag_id"],
            &["order_id", "tag_id"],
            &[("order_id", "Orders", "id"), ("tag_id", "Tags", "id")],
        ));
        schema.insert_table(table("Tags", &["id", "title"], &["id"], &[]));
        schema
    }
}
