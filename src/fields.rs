//! Selectable field paths around an anchor table.
//!
//! Paths go exactly one hop along direct foreign keys and two hops through
//! a junction (anchor -> junction -> far table). Nothing deeper is
//! enumerated.

use crate::descriptor::FieldDescriptor;
use crate::graph::{incoming_edges, junction_relations};
use crate::schema::DatabaseSchema;
use indexmap::IndexMap;
use serde::Serialize;

pub const FK_DISPLAY_PRIORITY: i32 = 2;
pub const JUNCTION_DISPLAY_PRIORITY: i32 = 1;

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Columns tried, in order, when a table declares no label column.
    pub label_candidates: Vec<String>,
    /// Append "(FK id)" to anchor columns that are foreign keys.
    pub tag_fk_ids: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            label_candidates: vec!["name".into(), "title".into(), "label".into()],
            tag_fk_ids: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldOption {
    /// `table.column`
    pub value: String,
    pub label: String,
    pub group: String,
    pub priority: i32,
}

impl FieldOption {
    fn new(table: &str, column: &str, label: String, group: String, priority: i32) -> Self {
        Self {
            value: format!("{}.{}", table, column),
            label,
            group,
            priority,
        }
    }

    fn plain(table: &str, column: &str, group: String) -> Self {
        Self::new(table, column, format!("{}.{}", table, column), group, 0)
    }

    pub fn descriptor(&self) -> Option<FieldDescriptor> {
        FieldDescriptor::parse(&self.value, "")
    }
}

/// Column used to represent `table` in friendly displays.
pub fn label_column_of(
    schema: &DatabaseSchema,
    table: &str,
    fallback: &str,
    opts: &ResolverOptions,
) -> String {
    if let Some(label) = schema.role_of(table).and_then(|m| m.label_column.as_deref()) {
        if !label.is_empty() {
            return label.to_string();
        }
    }

    opts.label_candidates
        .iter()
        .find(|candidate| schema.has_column(table, candidate))
        .cloned()
        .unwrap_or_else(|| fallback.to_string())
}

/// Keyed by `value`; a later option replaces an earlier one only with a
/// strictly higher priority.
#[derive(Default)]
struct OptionSet {
    options: IndexMap<String, FieldOption>,
}

impl OptionSet {
    fn push(&mut self, option: FieldOption) {
        match self.options.get_mut(&option.value) {
            Some(existing) if option.priority > existing.priority => *existing = option,
            Some(_) => {}
            None => {
                self.options.insert(option.value.clone(), option);
            }
        }
    }

    fn into_vec(self) -> Vec<FieldOption> {
        self.options.into_values().collect()
    }
}

pub fn field_options(schema: &DatabaseSchema, anchor: &str) -> Vec<FieldOption> {
    field_options_with(schema, anchor, &ResolverOptions::default())
}

pub fn field_options_with(
    schema: &DatabaseSchema,
    anchor: &str,
    opts: &ResolverOptions,
) -> Vec<FieldOption> {
    let mut set = OptionSet::default();
    let outgoing = schema.foreign_keys_of(anchor);

    // Main
    for col in schema.columns_of(anchor) {
        let is_fk = outgoing.iter().any(|fk| fk.column == col.name);
        let option = if is_fk {
            let label = if opts.tag_fk_ids {
                format!("{}.{} (FK id)", anchor, col.name)
            } else {
                format!("{}.{}", anchor, col.name)
            };
            FieldOption::new(anchor, &col.name, label, format!("Main FK (raw): {}", anchor), 0)
        } else {
            FieldOption::plain(anchor, &col.name, format!("Main: {}", anchor))
        };
        set.push(option);
    }

    // FK display
    for fk in outgoing {
        if !schema.has_table(&fk.ref_table) {
            continue;
        }
        let label_col = label_column_of(schema, &fk.ref_table, &fk.ref_column, opts);
        set.push(FieldOption::new(
            &fk.ref_table,
            &label_col,
            format!("{}.{} → {}.{}", anchor, fk.column, fk.ref_table, label_col),
            "FK display".to_string(),
            FK_DISPLAY_PRIORITY,
        ));
    }

    // Linked, outgoing
    for fk in outgoing {
        for col in schema.columns_of(&fk.ref_table) {
            set.push(FieldOption::plain(
                &fk.ref_table,
                &col.name,
                format!("Linked: {}", fk.ref_table),
            ));
        }
    }

    // Linked, incoming
    for fk in incoming_edges(schema, anchor) {
        for col in schema.columns_of(&fk.table) {
            set.push(FieldOption::plain(
                &fk.table,
                &col.name,
                format!("Linked: {}", fk.table),
            ));
        }
    }

    // Junction
    for rel in junction_relations(schema, anchor) {
        for col in schema.columns_of(&rel.junction_table) {
            set.push(FieldOption::plain(
                &rel.junction_table,
                &col.name,
                format!("Junction: {}", rel.junction_table),
            ));
        }

        let via_group = format!("Linked via {}: {}", rel.junction_table, rel.far_table);
        let label_col = label_column_of(schema, &rel.far_table, &rel.far_ref_column, opts);
        set.push(FieldOption::new(
            &rel.far_table,
            &label_col,
            format!("{}.{} (via {})", rel.far_table, label_col, rel.junction_table),
            via_group.clone(),
            JUNCTION_DISPLAY_PRIORITY,
        ));
        for col in schema.columns_of(&rel.far_table) {
            if col.name == label_col {
                continue;
            }
            set.push(FieldOption::plain(&rel.far_table, &col.name, via_group.clone()));
        }
    }

    set.into_vec()
}

/// Options sharing a `group`, as shown under one heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionGroup {
    pub name: String,
    pub options: Vec<FieldOption>,
}

/// Bucket options by group, groups in first-seen order.
pub fn grouped_options(options: &[FieldOption]) -> Vec<OptionGroup> {
    let mut groups: IndexMap<String, Vec<FieldOption>> = IndexMap::new();
    for option in options {
        groups
            .entry(option.group.clone())
            .or_default()
            .push(option.clone());
    }
    groups
        .into_iter()
        .map(|(name, options)| OptionGroup { name, options })
        .collect()
}
