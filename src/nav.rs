//! The address bar as the only durable store of navigation state.
//!
//! Nothing here caches `db`, `table` or a primary key: every read parses
//! the current address and every write replaces it in place, so the page
//! re-derives a [`NavigationState`] on each navigation event.

use indexmap::IndexMap;
use serde::Serialize;
use thiserror::Error;
use url::{Url, form_urlencoded};

pub const PK_PREFIX: &str = "pk_";
pub const PREFILL_PREFIX: &str = "prefill_";

#[derive(Debug, Error)]
pub enum NavError {
    #[error("Invalid address {href}: {source}")]
    InvalidAddress {
        href: String,
        source: url::ParseError,
    },
    #[error("No browser window available")]
    NoWindow,
    #[error("Browser rejected address update: {0}")]
    Browser(String),
}

/// Where the address lives.
pub trait Location {
    fn href(&self) -> Result<String, NavError>;

    /// Replace the current address without adding a history entry.
    fn replace(&mut self, href: &str) -> Result<(), NavError>;
}

/// In-memory address with a back stack, for native use and tests.
#[derive(Debug, Clone)]
pub struct MemoryLocation {
    history: Vec<String>,
}

impl MemoryLocation {
    pub fn new(href: &str) -> Self {
        Self {
            history: vec![href.to_string()],
        }
    }

    /// Simulate a user navigation that pushes a history entry.
    pub fn push(&mut self, href: &str) {
        self.history.push(href.to_string());
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

impl Default for MemoryLocation {
    fn default() -> Self {
        Self::new("http://localhost/")
    }
}

impl Location for MemoryLocation {
    fn href(&self) -> Result<String, NavError> {
        Ok(self.history.last().cloned().unwrap_or_default())
    }

    fn replace(&mut self, href: &str) -> Result<(), NavError> {
        match self.history.last_mut() {
            Some(current) => *current = href.to_string(),
            None => self.history.push(href.to_string()),
        }
        Ok(())
    }
}

#[cfg(target_arch = "wasm32")]
pub use browser::BrowserLocation;

#[cfg(target_arch = "wasm32")]
mod browser {
    use super::{Location, NavError};
    use wasm_bindgen::{JsCast, JsValue};

    fn js_error(value: JsValue) -> NavError {
        let message = value
            .dyn_ref::<js_sys::Error>()
            .map(|err| String::from(err.message()))
            .unwrap_or_else(|| format!("{:?}", value));
        NavError::Browser(message)
    }

    /// `window.location`, written through `history.replaceState`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct BrowserLocation;

    impl Location for BrowserLocation {
        fn href(&self) -> Result<String, NavError> {
            let window = web_sys::window().ok_or(NavError::NoWindow)?;
            window.location().href().map_err(js_error)
        }

        fn replace(&mut self, href: &str) -> Result<(), NavError> {
            let window = web_sys::window().ok_or(NavError::NoWindow)?;
            let history = window.history().map_err(js_error)?;
            history
                .replace_state_with_url(&JsValue::NULL, "", Some(href))
                .map_err(js_error)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Browse,
    Edit,
    New,
}

/// Snapshot of the address, rebuilt on every navigation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationState {
    pub db: String,
    pub table: String,
    pub pk: IndexMap<String, String>,
    pub prefill: IndexMap<String, String>,
    pub mode: Mode,
}

/// Which part of the URL holds the parameters. Hash-routed pages keep
/// them after the `?` inside the fragment.
enum ParamSite {
    Query,
    Fragment { route: String },
}

struct Address {
    url: Url,
    site: ParamSite,
    params: Vec<(String, String)>,
    /// The real query string when parameters live in the fragment. Read
    /// as a fallback; a key written or deleted is removed from here.
    outer: Vec<(String, String)>,
}

fn decode_pairs(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn encode_pairs(pairs: &[(String, String)]) -> Option<String> {
    if pairs.is_empty() {
        return None;
    }
    Some(
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter())
            .finish(),
    )
}

impl Address {
    fn parse(href: &str) -> Result<Self, NavError> {
        let url = Url::parse(href).map_err(|source| NavError::InvalidAddress {
            href: href.to_string(),
            source,
        })?;

        let outer_query = url.query().unwrap_or("").to_string();
        let fragment = url.fragment().unwrap_or("").to_string();

        // A bare route only takes the parameters when the query string is
        // empty, otherwise they stay where they already are.
        let (site, query) = match fragment.split_once('?') {
            Some((route, query)) => (
                ParamSite::Fragment {
                    route: route.to_string(),
                },
                query.to_string(),
            ),
            None if fragment.starts_with('/') && outer_query.is_empty() => {
                (ParamSite::Fragment { route: fragment.clone() }, String::new())
            }
            None => (ParamSite::Query, outer_query.clone()),
        };

        let outer = match site {
            ParamSite::Query => Vec::new(),
            ParamSite::Fragment { .. } => decode_pairs(&outer_query),
        };

        Ok(Self {
            url,
            site,
            params: decode_pairs(&query),
            outer,
        })
    }

    fn pairs(&self) -> impl Iterator<Item = &(String, String)> {
        self.params.iter().chain(self.outer.iter())
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.pairs().find(|(k, _)| k == name).map(|(_, v)| v.trim())
    }

    fn apply(&mut self, name: &str, value: Option<&str>) {
        self.outer.retain(|(k, _)| k != name);

        let value = value.map(str::trim).filter(|v| !v.is_empty());
        match value {
            None => self.params.retain(|(k, _)| k != name),
            Some(value) => {
                let mut written = false;
                self.params.retain_mut(|(k, v)| {
                    if k != name {
                        return true;
                    }
                    if written {
                        return false;
                    }
                    *v = value.to_string();
                    written = true;
                    true
                });
                if !written {
                    self.params.push((name.to_string(), value.to_string()));
                }
            }
        }
    }

    fn retain(&mut self, keep: impl Fn(&str) -> bool) {
        self.params.retain(|(k, _)| keep(k));
        self.outer.retain(|(k, _)| keep(k));
    }

    fn into_href(mut self) -> String {
        let query = encode_pairs(&self.params);
        match self.site {
            ParamSite::Query => self.url.set_query(query.as_deref()),
            ParamSite::Fragment { route } => {
                self.url.set_query(encode_pairs(&self.outer).as_deref());
                let fragment = match query {
                    Some(q) => format!("{}?{}", route, q),
                    None => route,
                };
                self.url.set_fragment(Some(&fragment));
            }
        }
        self.url.into()
    }
}

pub struct AddressBar<L: Location> {
    location: L,
}

impl<L: Location> AddressBar<L> {
    pub fn new(location: L) -> Self {
        Self { location }
    }

    pub fn location(&self) -> &L {
        &self.location
    }

    fn address(&self) -> Result<Address, NavError> {
        Address::parse(&self.location.href()?)
    }

    fn write(&mut self, address: Address) -> Result<(), NavError> {
        let href = address.into_href();
        if href != self.location.href()? {
            self.location.replace(&href)?;
        }
        Ok(())
    }

    /// Trimmed value of `name`, empty when absent.
    pub fn get(&self, name: &str) -> Result<String, NavError> {
        Ok(self.address()?.get(name).unwrap_or("").to_string())
    }

    /// Merge `updates` into the address. `None` or a blank value deletes
    /// the parameter.
    pub fn set(&mut self, updates: &[(&str, Option<&str>)]) -> Result<(), NavError> {
        let mut address = self.address()?;
        for (name, value) in updates {
            address.apply(name, *value);
        }
        self.write(address)
    }

    pub fn database(&self) -> Result<String, NavError> {
        self.get("db")
    }

    pub fn table(&self) -> Result<String, NavError> {
        self.get("table")
    }

    /// `pk_<column>` for every key column, or an empty map if any is
    /// missing.
    pub fn primary_key<S: AsRef<str>>(
        &self,
        pk_columns: &[S],
    ) -> Result<IndexMap<String, String>, NavError> {
        let address = self.address()?;
        let mut pk = IndexMap::new();
        for column in pk_columns {
            let column = column.as_ref();
            match address.get(&format!("{}{}", PK_PREFIX, column)) {
                Some(value) if !value.is_empty() => {
                    pk.insert(column.to_string(), value.to_string());
                }
                _ => return Ok(IndexMap::new()),
            }
        }
        Ok(pk)
    }

    /// `prefill_<field>` parameters with the prefix stripped.
    pub fn prefill(&self) -> Result<IndexMap<String, String>, NavError> {
        let address = self.address()?;
        let mut prefill = IndexMap::new();
        for (k, v) in address.pairs() {
            if let Some(field) = k.strip_prefix(PREFILL_PREFIX).filter(|f| !f.is_empty()) {
                prefill
                    .entry(field.to_string())
                    .or_insert_with(|| v.trim().to_string());
            }
        }
        Ok(prefill)
    }

    pub fn clear_primary_key_and_prefill(&mut self) -> Result<(), NavError> {
        let mut address = self.address()?;
        address.retain(|k| !k.starts_with(PK_PREFIX) && !k.starts_with(PREFILL_PREFIX));
        self.write(address)
    }

    /// Switch database; the table and record selection go with it.
    pub fn select_database(&mut self, db: &str) -> Result<(), NavError> {
        self.clear_primary_key_and_prefill()?;
        self.set(&[("db", Some(db)), ("table", None), ("mode", None)])
    }

    pub fn select_table(&mut self, table: &str) -> Result<(), NavError> {
        self.clear_primary_key_and_prefill()?;
        self.set(&[("table", Some(table)), ("mode", None)])
    }

    pub fn edit_record(&mut self, pk: &IndexMap<String, String>) -> Result<(), NavError> {
        self.clear_primary_key_and_prefill()?;
        let names: Vec<String> = pk.keys().map(|c| format!("{}{}", PK_PREFIX, c)).collect();
        let mut updates: Vec<(&str, Option<&str>)> = names
            .iter()
            .zip(pk.values())
            .map(|(name, value)| (name.as_str(), Some(value.as_str())))
            .collect();
        updates.push(("mode", None));
        self.set(&updates)
    }

    pub fn start_new_record(&mut self, prefill: &[(&str, &str)]) -> Result<(), NavError> {
        self.clear_primary_key_and_prefill()?;
        let names: Vec<String> = prefill
            .iter()
            .map(|(field, _)| format!("{}{}", PREFILL_PREFIX, field))
            .collect();
        let mut updates: Vec<(&str, Option<&str>)> = names
            .iter()
            .zip(prefill.iter())
            .map(|(name, (_, value))| (name.as_str(), Some(*value)))
            .collect();
        updates.push(("mode", Some("new")));
        self.set(&updates)
    }

    /// Derive the full state for a table whose key columns are `pk_columns`.
    pub fn state<S: AsRef<str>>(&self, pk_columns: &[S]) -> Result<NavigationState, NavError> {
        let pk = self.primary_key(pk_columns)?;
        let mode = if !pk.is_empty() {
            Mode::Edit
        } else if self.get("mode")? == "new" {
            Mode::New
        } else {
            Mode::Browse
        };

        Ok(NavigationState {
            db: self.database()?,
            table: self.table()?,
            pk,
            prefill: self.prefill()?,
            mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(href: &str) -> AddressBar<MemoryLocation> {
        AddressBar::new(MemoryLocation::new(href))
    }

    #[test]
    fn test_table_round_trip() {
        let mut nav = bar("http://localhost/data");
        nav.set(&[("table", Some("Orders"))]).unwrap();
        assert_eq!(nav.table().unwrap(), "Orders");

        nav.set(&[("table", Some(""))]).unwrap();
        assert_eq!(nav.table().unwrap(), "");
        assert_eq!(nav.location().href().unwrap(), "http://localhost/data");
    }

    #[test]
    fn test_set_replaces_history() {
        let mut nav = bar("http://localhost/");
        nav.set(&[("db", Some("shop"))]).unwrap();
        nav.set(&[("table", Some("Orders"))]).unwrap();
        assert_eq!(nav.location().history_len(), 1);

        let mut location = MemoryLocation::default();
        location.push("http://localhost/?db=shop");
        let mut nav = AddressBar::new(location);
        nav.select_table("Orders").unwrap();
        assert_eq!(nav.location().history_len(), 2);
        assert_eq!(nav.database().unwrap(), "shop");
    }

    #[test]
    fn test_set_is_idempotent() {
        let mut nav = bar("http://localhost/?db=shop&x=1");
        nav.set(&[("table", Some("Orders"))]).unwrap();
        let once = nav.location().href().unwrap();
        nav.set(&[("table", Some("Orders"))]).unwrap();
        assert_eq!(nav.location().href().unwrap(), once);
        assert_eq!(once, "http://localhost/?db=shop&x=1&table=Orders");
    }

    #[test]
    fn test_get_trims() {
        let nav = bar("http://localhost/?table=%20Orders%20");
        assert_eq!(nav.table().unwrap(), "Orders");
    }

    #[test]
    fn test_primary_key_partial_is_empty() {
        let nav = bar("http://localhost/?table=Orders");
        assert!(nav.primary_key(&["id"]).unwrap().is_empty());

        let nav = bar("http://localhost/?pk_order_id=1");
        assert!(nav.primary_key(&["order_id", "tag_id"]).unwrap().is_empty());

        let nav = bar("http://localhost/?pk_order_id=1&pk_tag_id=7");
        let pk = nav.primary_key(&["order_id", "tag_id"]).unwrap();
        assert_eq!(pk.get("order_id").map(String::as_str), Some("1"));
        assert_eq!(pk.get("tag_id").map(String::as_str), Some("7"));
    }

    #[test]
    fn test_clear_primary_key_and_prefill() {
        let mut nav = bar("http://localhost/?db=shop&pk_id=3&prefill_name=x&table=Orders");
        nav.clear_primary_key_and_prefill().unwrap();
        assert_eq!(
            nav.location().href().unwrap(),
            "http://localhost/?db=shop&table=Orders"
        );
    }

    #[test]
    fn test_hash_routed_params() {
        let mut nav = bar("http://localhost/app#/edit?db=shop");
        assert_eq!(nav.database().unwrap(), "shop");

        nav.set(&[("table", Some("Orders"))]).unwrap();
        assert_eq!(
            nav.location().href().unwrap(),
            "http://localhost/app#/edit?db=shop&table=Orders"
        );

        let mut nav = bar("http://localhost/app#/edit");
        nav.set(&[("db", Some("shop"))]).unwrap();
        assert_eq!(
            nav.location().href().unwrap(),
            "http://localhost/app#/edit?db=shop"
        );
    }

    #[test]
    fn test_hash_route_keeps_existing_query() {
        let mut nav = bar("http://localhost/app?db=shop#/edit");
        assert_eq!(nav.database().unwrap(), "shop");

        nav.set(&[("table", Some("Orders"))]).unwrap();
        assert_eq!(
            nav.location().href().unwrap(),
            "http://localhost/app?db=shop&table=Orders#/edit"
        );

        nav.set(&[("db", None)]).unwrap();
        assert_eq!(nav.database().unwrap(), "");
        assert_eq!(
            nav.location().href().unwrap(),
            "http://localhost/app?table=Orders#/edit"
        );
    }

    #[test]
    fn test_fragment_params_fall_back_to_query() {
        let mut nav = bar("http://localhost/app?db=old&pk_id=3#/edit?table=Orders");
        assert_eq!(nav.database().unwrap(), "old");
        assert_eq!(nav.table().unwrap(), "Orders");
        assert_eq!(nav.primary_key(&["id"]).unwrap().get("id").map(String::as_str), Some("3"));

        nav.set(&[("db", Some("shop"))]).unwrap();
        assert_eq!(
            nav.location().href().unwrap(),
            "http://localhost/app?pk_id=3#/edit?table=Orders&db=shop"
        );

        nav.clear_primary_key_and_prefill().unwrap();
        assert_eq!(
            nav.location().href().unwrap(),
            "http://localhost/app#/edit?table=Orders&db=shop"
        );
    }

    #[test]
    fn test_select_table_drops_stale_record() {
        let mut nav = bar("http://localhost/?db=shop&table=Orders&pk_id=3");
        nav.select_table("Tags").unwrap();

        let state = nav.state(&["id"]).unwrap();
        assert_eq!(state.table, "Tags");
        assert!(state.pk.is_empty());
        assert_eq!(state.mode, Mode::Browse);
    }

    #[test]
    fn test_state_modes() {
        let mut nav = bar("http://localhost/?db=shop&table=Orders");
        nav.start_new_record(&[("customer_id", "5")]).unwrap();
        let state = nav.state(&["id"]).unwrap();
        assert_eq!(state.mode, Mode::New);
        assert_eq!(state.prefill.get("customer_id").map(String::as_str), Some("5"));

        let mut pk = IndexMap::new();
        pk.insert("id".to_string(), "9".to_string());
        nav.edit_record(&pk).unwrap();
        let state = nav.state(&["id"]).unwrap();
        assert_eq!(state.mode, Mode::Edit);
        assert!(state.prefill.is_empty());
        assert_eq!(state.db, "shop");
    }

    #[test]
    fn test_select_database_resets_table() {
        let mut nav = bar("http://localhost/?db=shop&table=Orders&pk_id=1");
        nav.select_database("crm").unwrap();
        assert_eq!(nav.location().href().unwrap(), "http://localhost/?db=crm");
    }

    #[test]
    fn test_invalid_address() {
        let nav = bar("not a url");
        assert!(matches!(nav.table(), Err(NavError::InvalidAddress { .. })));
    }
}
