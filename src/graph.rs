//! Foreign-key graph: table roles and many-to-many relations through
//! junction tables.

use crate::schema::{DatabaseSchema, ForeignKeyEdge, TableType};
use serde::Serialize;

/// One many-to-many edge seen from an anchor table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JunctionRelation {
    /// `<junction_table>::<main_fk_column>::<far_fk_column>`
    pub key: String,
    pub junction_table: String,
    pub main_fk_column: String,
    pub main_ref_column: String,
    pub far_table: String,
    pub far_fk_column: String,
    pub far_ref_column: String,
}

impl JunctionRelation {
    fn new(junction: &str, main: &ForeignKeyEdge, far: &ForeignKeyEdge) -> Self {
        Self {
            key: format!("{}::{}::{}", junction, main.column, far.column),
            junction_table: junction.to_string(),
            main_fk_column: main.column.clone(),
            main_ref_column: main.ref_column.clone(),
            far_table: far.ref_table.clone(),
            far_fk_column: far.column.clone(),
            far_ref_column: far.ref_column.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleSource {
    /// Taken from the table's role metadata.
    Declared,
    /// Guessed from the table's shape.
    Inferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRole {
    pub table_type: TableType,
    pub source: RoleSource,
}

/// Every foreign key in the schema, in table order.
pub fn all_edges(schema: &DatabaseSchema) -> Vec<&ForeignKeyEdge> {
    schema
        .tables
        .values()
        .flat_map(|t| t.foreign_keys.iter())
        .collect()
}

/// Foreign keys of other tables that point at `table`.
pub fn incoming_edges<'a>(schema: &'a DatabaseSchema, table: &str) -> Vec<&'a ForeignKeyEdge> {
    all_edges(schema)
        .into_iter()
        .filter(|fk| fk.ref_table == table)
        .collect()
}

fn declared_type(schema: &DatabaseSchema, table: &str) -> Option<TableType> {
    schema.role_of(table).and_then(|m| m.table_type)
}

/// Whether `table` is a junction, and if so whether it was declared one
/// or only has the shape of one (two or more foreign keys).
///
/// The fallback also catches entity tables that merely reference two
/// other tables (an order line pointing at product and warehouse).
pub fn junction_source(schema: &DatabaseSchema, table: &str) -> Option<RoleSource> {
    if declared_type(schema, table) == Some(TableType::Junction) {
        Some(RoleSource::Declared)
    } else if schema.foreign_keys_of(table).len() >= 2 {
        Some(RoleSource::Inferred)
    } else {
        None
    }
}

/// Declared junctions plus every table with two or more foreign keys.
pub fn is_junction(schema: &DatabaseSchema, table: &str) -> bool {
    junction_source(schema, table).is_some()
}

pub fn junction_tables(schema: &DatabaseSchema) -> Vec<&str> {
    schema
        .table_names()
        .filter(|name| match junction_source(schema, name) {
            Some(source) => {
                tracing::debug!(table = %name, ?source, "junction detected");
                true
            }
            None => false,
        })
        .collect()
}

fn looks_like_lookup(schema: &DatabaseSchema, table: &str) -> bool {
    if !schema.foreign_keys_of(table).is_empty() {
        return false;
    }
    let pk = schema.primary_key_of(table);
    let payload_columns = schema
        .columns_of(table)
        .iter()
        .filter(|c| !pk.contains(&c.name))
        .count();
    payload_columns <= 2 && !incoming_edges(schema, table).is_empty()
}

pub fn classify(schema: &DatabaseSchema, table: &str) -> TableRole {
    if let Some(source) = junction_source(schema, table) {
        return TableRole {
            table_type: TableType::Junction,
            source,
        };
    }

    let declared = declared_type(schema, table);
    if let Some(table_type) = declared {
        return TableRole {
            table_type,
            source: RoleSource::Declared,
        };
    }

    let table_type = if looks_like_lookup(schema, table) {
        TableType::Lookup
    } else {
        TableType::Entity
    };
    TableRole {
        table_type,
        source: RoleSource::Inferred,
    }
}

/// Many-to-many relations reachable from `anchor`, in schema order.
///
/// For each junction, the foreign keys pointing at the anchor are paired
/// with every other foreign key whose target table exists. A junction
/// whose keys all point at the anchor pairs its keys with each other.
pub fn junction_relations(schema: &DatabaseSchema, anchor: &str) -> Vec<JunctionRelation> {
    let mut relations = Vec::new();

    for junction in junction_tables(schema) {
        let fks = schema.foreign_keys_of(junction);
        let (main_fks, other_fks): (Vec<&ForeignKeyEdge>, Vec<&ForeignKeyEdge>) =
            fks.iter().partition(|fk| fk.ref_table == anchor);

        if main_fks.is_empty() {
            continue;
        }

        let self_referencing = other_fks.is_empty();
        let far_candidates = if self_referencing { &main_fks } else { &other_fks };

        for main in &main_fks {
            for far in far_candidates {
                if self_referencing && far.column == main.column {
                    continue;
                }
                if !schema.has_table(&far.ref_table) {
                    continue;
                }
                relations.push(JunctionRelation::new(junction, main, far));
            }
        }
    }

    tracing::debug!(anchor, count = relations.len(), "junction relations derived");
    relations
}
