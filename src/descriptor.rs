//! Field descriptors and their content-addressed tokens.
//!
//! A token is a pure function of the descriptor's content, so a saved
//! selection can be matched against any later query execution's alias map.

use serde::de::Deserializer;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Key given to a column whose token is absent from the alias map.
pub const MISSING_ALIAS_KEY: &str = "__MISSING_ALIAS__";

const FIELD_PREFIX: &str = "field:";
const LIST_PREFIX: &str = "list:";

/// Token -> key of that value in a result row.
pub type AliasMap = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldDescriptor {
    /// A concrete `table.column`.
    Field { table: String, column: String },
    /// Multi-valued aggregate over `field`.
    List { field: String },
}

impl FieldDescriptor {
    pub fn field(table: &str, column: &str) -> Self {
        Self::Field {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    pub fn list(field: &str) -> Self {
        Self::List {
            field: field.to_string(),
        }
    }

    pub fn token(&self) -> String {
        match self {
            Self::Field { table, column } => format!("{}{}.{}", FIELD_PREFIX, table, column),
            Self::List { field } => format!("{}{}", LIST_PREFIX, field),
        }
    }

    /// Human-readable path.
    pub fn label(&self) -> String {
        match self {
            Self::Field { table, column } => format!("{}.{}", table, column),
            Self::List { field } => format!("{} (list)", field),
        }
    }

    /// Parse a token, a `table.column` path or a bare column of `anchor`.
    pub fn parse(input: &str, anchor: &str) -> Option<Self> {
        let input = input.trim();

        if let Some(rest) = input.strip_prefix(FIELD_PREFIX) {
            return split_path(rest);
        }
        if let Some(rest) = input.strip_prefix(LIST_PREFIX) {
            return Self::list(rest).checked();
        }
        if input.contains('.') {
            return split_path(input);
        }
        if input.is_empty() || anchor.is_empty() {
            return None;
        }
        Some(Self::field(anchor, input))
    }

    /// Trimmed copy, or `None` when a part is empty.
    fn checked(&self) -> Option<Self> {
        match self {
            Self::Field { table, column } => {
                let (table, column) = (table.trim(), column.trim());
                (!table.is_empty() && !column.is_empty()).then(|| Self::field(table, column))
            }
            Self::List { field } => {
                let field = field.trim();
                (!field.is_empty()).then(|| Self::list(field))
            }
        }
    }

    /// Look the token up in `aliases`.
    pub fn resolve_alias(&self, aliases: &AliasMap) -> ColumnDef {
        let token = self.token();
        match aliases.get(&token) {
            Some(key) => ColumnDef {
                key: key.clone(),
                label: self.label(),
                token,
            },
            None => {
                tracing::warn!(%token, "no alias for field in query output");
                ColumnDef {
                    key: MISSING_ALIAS_KEY.to_string(),
                    label: format!("MISSING: {}", self.label()),
                    token,
                }
            }
        }
    }
}

fn split_path(path: &str) -> Option<FieldDescriptor> {
    let (table, column) = path.split_once('.')?;
    FieldDescriptor::field(table, column).checked()
}

impl fmt::Display for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl Serialize for FieldDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Field { table, column } => {
                let mut s = serializer.serialize_struct("FieldItem", 2)?;
                s.serialize_field("table", table)?;
                s.serialize_field("column", column)?;
                s.end()
            }
            Self::List { field } => {
                let mut s = serializer.serialize_struct("ListItem", 2)?;
                s.serialize_field("kind", "list")?;
                s.serialize_field("field", field)?;
                s.end()
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum ListKind {
    List,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StructuredField {
    List {
        #[allow(dead_code)]
        kind: ListKind,
        field: String,
    },
    Field {
        table: String,
        column: String,
    },
}

impl From<StructuredField> for FieldDescriptor {
    fn from(raw: StructuredField) -> Self {
        match raw {
            StructuredField::List { field, .. } => Self::List { field },
            StructuredField::Field { table, column } => Self::Field { table, column },
        }
    }
}

impl<'de> Deserialize<'de> for FieldDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        StructuredField::deserialize(deserializer).map(Into::into)
    }
}

/// One entry of a selection as it arrives from storage or the page:
/// a string, a structured descriptor, or something unusable.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    Text(String),
    Descriptor(FieldDescriptor),
    Other(serde_json::Value),
}

impl RawField {
    pub fn to_descriptor(&self, anchor: &str) -> Option<FieldDescriptor> {
        match self {
            Self::Text(s) => FieldDescriptor::parse(s, anchor),
            Self::Descriptor(d) => d.checked(),
            Self::Other(_) => None,
        }
    }
}

impl From<FieldDescriptor> for RawField {
    fn from(d: FieldDescriptor) -> Self {
        Self::Descriptor(d)
    }
}

impl From<&str> for RawField {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Canonical descriptors, deduplicated by token in first-seen order.
/// Entries that cannot be parsed are dropped.
pub fn normalize(raw: &[RawField], anchor: &str) -> Vec<FieldDescriptor> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|r| r.to_descriptor(anchor))
        .filter(|d| seen.insert(d.token()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub key: String,
    pub label: String,
    #[serde(skip)]
    pub token: String,
}

impl ColumnDef {
    pub fn is_missing(&self) -> bool {
        self.key == MISSING_ALIAS_KEY
    }
}

pub fn build_col_defs(fields: &[FieldDescriptor], aliases: &AliasMap) -> Vec<ColumnDef> {
    fields.iter().map(|f| f.resolve_alias(aliases)).collect()
}

/// Drop the anchor's implicit `<anchor>.id` column from a results grid.
pub fn filter_implicit_id(columns: Vec<ColumnDef>, anchor: &str) -> Vec<ColumnDef> {
    let implicit = format!("{}.id", anchor);
    columns.into_iter().filter(|c| c.label != implicit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_token_formats() {
        assert_eq!(
            FieldDescriptor::field("Customers", "name").token(),
            "field:Customers.name"
        );
        assert_eq!(FieldDescriptor::list("tags").token(), "list:tags");
    }

    #[test]
    fn test_token_ignores_property_order() {
        let a: FieldDescriptor =
            serde_json::from_str(r#"{"table": "Orders", "column": "id"}"#).unwrap();
        let b: FieldDescriptor =
            serde_json::from_str(r#"{"column": "id", "table": "Orders"}"#).unwrap();
        assert_eq!(a.token(), b.token());

        let l1: FieldDescriptor = serde_json::from_str(r#"{"kind": "list", "field": "x"}"#).unwrap();
        let l2: FieldDescriptor = serde_json::from_str(r#"{"field": "x", "kind": "list"}"#).unwrap();
        assert_eq!(l1.token(), l2.token());
    }

    #[test]
    fn test_serialize_shapes() {
        let json = serde_json::to_string(&FieldDescriptor::field("A", "b")).unwrap();
        assert_eq!(json, r#"{"table":"A","column":"b"}"#);
        let json = serde_json::to_string(&FieldDescriptor::list("x")).unwrap();
        assert_eq!(json, r#"{"kind":"list","field":"x"}"#);
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            FieldDescriptor::parse("total", "Orders"),
            Some(FieldDescriptor::field("Orders", "total"))
        );
        assert_eq!(
            FieldDescriptor::parse(" Customers.name ", "Orders"),
            Some(FieldDescriptor::field("Customers", "name"))
        );
        assert_eq!(
            FieldDescriptor::parse("field:Customers.name", "Orders"),
            Some(FieldDescriptor::field("Customers", "name"))
        );
        assert_eq!(
            FieldDescriptor::parse("list:tags", ""),
            Some(FieldDescriptor::list("tags"))
        );
        assert_eq!(FieldDescriptor::parse("", "Orders"), None);
        assert_eq!(FieldDescriptor::parse(".name", "Orders"), None);
        assert_eq!(FieldDescriptor::parse("total", ""), None);
    }

    #[test]
    fn test_normalize_mixed_input() {
        let raw: Vec<RawField> = serde_json::from_str(
            r#"["id", "Orders.id", {"table": "Customers", "column": "name"},
                "Customers.name", 42, {"kind": "list", "field": "tags"}, ""]"#,
        )
        .unwrap();
        let fields = normalize(&raw, "Orders");

        assert_eq!(
            fields,
            vec![
                FieldDescriptor::field("Orders", "id"),
                FieldDescriptor::field("Customers", "name"),
                FieldDescriptor::list("tags"),
            ]
        );
    }

    #[test]
    fn test_structured_input_is_checked_like_text() {
        let raw: Vec<RawField> = serde_json::from_str(
            r#"[{"table": "", "column": ""}, {"table": " Orders ", "column": "total "},
                {"kind": "list", "field": "  "}, ".x"]"#,
        )
        .unwrap();
        let fields = normalize(&raw, "Orders");

        assert_eq!(fields, vec![FieldDescriptor::field("Orders", "total")]);
        assert_eq!(fields[0].token(), "field:Orders.total");
    }

    #[test]
    fn test_normalize_idempotent() {
        let raw: Vec<RawField> = vec!["b".into(), "T.a".into(), "b".into(), "U.c".into()];
        let once = normalize(&raw, "T");
        let again: Vec<RawField> = once.iter().cloned().map(RawField::from).collect();
        assert_eq!(normalize(&again, "T"), once);
    }

    #[test]
    #[traced_test]
    fn test_missing_alias_is_visible() {
        let mut aliases = AliasMap::new();
        aliases.insert("field:Orders.id".to_string(), "c0".to_string());

        let fields = vec![
            FieldDescriptor::field("Orders", "id"),
            FieldDescriptor::field("Customers", "name"),
        ];
        let defs = build_col_defs(&fields, &aliases);

        assert_eq!(defs[0].key, "c0");
        assert_eq!(defs[0].label, "Orders.id");
        assert_eq!(defs[1].key, MISSING_ALIAS_KEY);
        assert_eq!(defs[1].label, "MISSING: Customers.name");
        assert!(defs[1].is_missing());
        assert!(logs_contain("no alias for field in query output"));
    }

    #[test]
    fn test_filter_implicit_id() {
        let mut aliases = AliasMap::new();
        aliases.insert("field:Orders.id".to_string(), "c0".to_string());
        aliases.insert("field:Orders.total".to_string(), "c1".to_string());
        aliases.insert("field:Customers.id".to_string(), "c2".to_string());

        let fields = vec![
            FieldDescriptor::field("Orders", "id"),
            FieldDescriptor::field("Orders", "total"),
            FieldDescriptor::field("Customers", "id"),
        ];
        let defs = filter_implicit_id(build_col_defs(&fields, &aliases), "Orders");
        let keys: Vec<&str> = defs.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["c1", "c2"]);
    }
}
