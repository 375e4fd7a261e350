pub mod api;
pub mod config;
pub mod descriptor;
pub mod edit;
pub mod fields;
pub mod graph;
pub mod nav;
pub mod schema;
pub mod session;
pub mod summary;

use wasm_bindgen::prelude::*;

use descriptor::{AliasMap, FieldDescriptor, RawField};
use indexmap::IndexMap;
use schema::DatabaseSchema;

/// Initialize panic hook for better error messages in WASM
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| e.to_string())
}

fn parse_raw_fields(fields: &str) -> Result<Vec<RawField>, String> {
    serde_json::from_str(fields).map_err(|e| e.to_string())
}

/// `{name: value|null}` in the caller's key order.
#[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
fn parse_param_updates(updates: &str) -> Result<IndexMap<String, Option<String>>, String> {
    serde_json::from_str(updates).map_err(|e| e.to_string())
}

/// Many-to-many relations of `anchor`, as JSON
#[wasm_bindgen(js_name = "junctionRelations")]
pub fn junction_relations(schema: &str, anchor: &str) -> Result<String, String> {
    let schema = DatabaseSchema::from_json(schema).map_err(|e| e.to_string())?;
    to_json(&graph::junction_relations(&schema, anchor))
}

/// Selectable field paths around `anchor`, as JSON
#[wasm_bindgen(js_name = "fieldOptions")]
pub fn field_options(schema: &str, anchor: &str) -> Result<String, String> {
    let schema = DatabaseSchema::from_json(schema).map_err(|e| e.to_string())?;
    to_json(&fields::field_options(&schema, anchor))
}

#[wasm_bindgen(js_name = "normalizeFields")]
pub fn normalize_fields(fields: &str, anchor: &str) -> Result<String, String> {
    let raw = parse_raw_fields(fields)?;
    to_json(&descriptor::normalize(&raw, anchor))
}

#[wasm_bindgen(js_name = "fieldToken")]
pub fn field_token(field: &str, anchor: &str) -> Result<String, String> {
    let raw: RawField = serde_json::from_str(field).map_err(|e| e.to_string())?;
    raw.to_descriptor(anchor)
        .map(|d| d.token())
        .ok_or_else(|| format!("Not a field: {}", field))
}

/// Resolve `fields` against a query's alias map. With an anchor, its
/// implicit id column is left out.
#[wasm_bindgen(js_name = "buildColDefs")]
pub fn build_col_defs(
    fields: &str,
    alias_map: &str,
    anchor: Option<String>,
) -> Result<String, String> {
    let fields: Vec<FieldDescriptor> = serde_json::from_str(fields).map_err(|e| e.to_string())?;
    let aliases: AliasMap = serde_json::from_str(alias_map).map_err(|e| e.to_string())?;

    let defs = descriptor::build_col_defs(&fields, &aliases);
    let defs = match anchor.as_deref() {
        Some(anchor) => descriptor::filter_implicit_id(defs, anchor),
        None => defs,
    };
    to_json(&defs)
}

#[cfg(target_arch = "wasm32")]
mod browser_nav {
    use super::{parse_param_updates, to_json};
    use crate::nav::{AddressBar, BrowserLocation};
    use wasm_bindgen::prelude::*;

    fn address_bar() -> AddressBar<BrowserLocation> {
        AddressBar::new(BrowserLocation)
    }

    /// Current navigation state for a table keyed by `pkColumns` (JSON array)
    #[wasm_bindgen(js_name = "navigationState")]
    pub fn navigation_state(pk_columns: &str) -> Result<String, String> {
        let pk_columns: Vec<String> = serde_json::from_str(pk_columns).map_err(|e| e.to_string())?;
        let state = address_bar().state(&pk_columns).map_err(|e| e.to_string())?;
        to_json(&state)
    }

    /// Apply `{name: value|null}` to the address without a history entry
    #[wasm_bindgen(js_name = "setSearchParams")]
    pub fn set_search_params(updates: &str) -> Result<(), String> {
        let updates = parse_param_updates(updates)?;
        let updates: Vec<(&str, Option<&str>)> = updates
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_deref()))
            .collect();
        address_bar().set(&updates).map_err(|e| e.to_string())
    }

    #[wasm_bindgen(js_name = "getSearchParam")]
    pub fn get_search_param(name: &str) -> Result<String, String> {
        address_bar().get(name).map_err(|e| e.to_string())
    }

    #[wasm_bindgen(js_name = "clearPrimaryKeyAndPrefill")]
    pub fn clear_primary_key_and_prefill() -> Result<(), String> {
        address_bar()
            .clear_primary_key_and_prefill()
            .map_err(|e| e.to_string())
    }
}
