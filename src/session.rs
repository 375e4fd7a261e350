//! Per-page state that is allowed to outlive a render: option caches and
//! a generation counter for discarding stale responses.
//!
//! Caches are write-once per key and are dropped wholesale when the
//! database or table selection changes.

use crate::api::{ApiError, JunctionApi, JunctionSelection, LookupOption, LookupQuery, RecordApi};
use crate::graph::JunctionRelation;
use crate::nav::NavigationState;
use crate::schema::ForeignKeyEdge;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

pub const DEFAULT_LOOKUP_LIMIT: usize = 200;

/// Bumped every time the db/table selection changes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Issued when a load starts; only the latest generation may apply its
/// result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: Generation,
}

/// A response together with the ticket it was requested under. Hand it
/// to [`PageSession::settle`] once the request has finished.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub ticket: LoadTicket,
    pub value: T,
}

/// Current far ids of `relation` for the record whose referenced key
/// value is `main_id`.
///
/// Borrows nothing from the session, so the page may `sync` while the
/// request is in flight; the result is then dropped by `settle`.
pub async fn junction_selection<J: JunctionApi + ?Sized>(
    ticket: LoadTicket,
    junctions: &J,
    relation: &JunctionRelation,
    main_id: Value,
) -> Result<Loaded<Vec<Value>>, ApiError> {
    let selection = JunctionSelection {
        junction_table: relation.junction_table.clone(),
        main_fk_column: relation.main_fk_column.clone(),
        main_id,
        far_fk_column: relation.far_fk_column.clone(),
    };
    let value = junctions.get_selection(&selection).await?;
    Ok(Loaded { ticket, value })
}

#[derive(Debug)]
pub struct PageSession {
    db: String,
    table: String,
    generation: Generation,
    lookup_limit: usize,
    distinct_values: HashMap<String, Vec<Value>>,
    fk_options: HashMap<String, Vec<LookupOption>>,
    junction_options: HashMap<String, Vec<LookupOption>>,
}

impl Default for PageSession {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_LIMIT)
    }
}

impl PageSession {
    pub fn new(lookup_limit: usize) -> Self {
        Self {
            db: String::new(),
            table: String::new(),
            generation: Generation::default(),
            lookup_limit,
            distinct_values: HashMap::new(),
            fk_options: HashMap::new(),
            junction_options: HashMap::new(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Follow the address. Returns true when the selection moved, which
    /// invalidates every cache and every outstanding ticket.
    pub fn sync(&mut self, state: &NavigationState) -> bool {
        if state.db == self.db && state.table == self.table {
            return false;
        }
        self.db = state.db.clone();
        self.table = state.table.clone();
        self.generation = self.generation.next();
        self.distinct_values.clear();
        self.fk_options.clear();
        self.junction_options.clear();
        debug!(db = %self.db, table = %self.table, generation = self.generation.get(), "page selection changed");
        true
    }

    pub fn begin_load(&self) -> LoadTicket {
        LoadTicket {
            generation: self.generation,
        }
    }

    /// Whether a response started under `ticket` still belongs to the
    /// current selection.
    pub fn accept(&self, ticket: LoadTicket) -> bool {
        let current = ticket.generation == self.generation;
        if !current {
            debug!(
                ticket = ticket.generation.get(),
                generation = self.generation.get(),
                "dropping stale response"
            );
        }
        current
    }

    /// The loaded value if its ticket is still current.
    pub fn settle<T>(&self, loaded: Loaded<T>) -> Option<T> {
        self.accept(loaded.ticket).then_some(loaded.value)
    }

    pub async fn distinct_values<R: RecordApi + ?Sized>(
        &mut self,
        records: &R,
        column: &str,
    ) -> Result<&[Value], ApiError> {
        if !self.distinct_values.contains_key(column) {
            let values = records
                .distinct(&self.db, &self.table, column, self.lookup_limit)
                .await?;
            self.distinct_values.insert(column.to_string(), values);
        }
        Ok(self
            .distinct_values
            .get(column)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

    /// Choices for a foreign key column, labelled by `label_column` of the
    /// referenced table.
    pub async fn fk_options<R: RecordApi + ?Sized>(
        &mut self,
        records: &R,
        fk: &ForeignKeyEdge,
        label_column: &str,
    ) -> Result<&[LookupOption], ApiError> {
        let key = format!("{}.{}", fk.table, fk.column);
        if !self.fk_options.contains_key(&key) {
            let query = LookupQuery {
                value_col: fk.ref_column.clone(),
                label_col: label_column.to_string(),
                limit: self.lookup_limit,
                search: None,
            };
            let options = records.lookup(&self.db, &fk.ref_table, &query).await?;
            self.fk_options.insert(key.clone(), options);
        }
        Ok(self.fk_options.get(&key).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Choices for the far side of a junction relation.
    pub async fn junction_options<R: RecordApi + ?Sized>(
        &mut self,
        records: &R,
        relation: &JunctionRelation,
        label_column: &str,
    ) -> Result<&[LookupOption], ApiError> {
        if !self.junction_options.contains_key(&relation.key) {
            let query = LookupQuery {
                value_col: relation.far_ref_column.clone(),
                label_col: label_column.to_string(),
                limit: self.lookup_limit,
                search: None,
            };
            let options = records
                .lookup(&self.db, &relation.far_table, &query)
                .await?;
            self.junction_options.insert(relation.key.clone(), options);
        }
        Ok(self
            .junction_options
            .get(&relation.key)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Row, WriteResult};
    use crate::graph::junction_relations;
    use crate::nav::Mode;
    use crate::schema::fixtures::shop;
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use serde_json::json;
    use std::cell::Cell;

    #[derive(Default)]
    struct CountingRecords {
        distinct_calls: Cell<usize>,
        lookup_calls: Cell<usize>,
    }

    #[async_trait(?Send)]
    impl RecordApi for CountingRecords {
        async fn query(&self, _db: &str, _table: &str, _limit: usize) -> Result<Vec<Row>, ApiError> {
            Ok(vec![])
        }
        async fn get(&self, _db: &str, _table: &str, _pk: &Row) -> Result<Option<Row>, ApiError> {
            Ok(None)
        }
        async fn create(&self, _db: &str, _table: &str, _values: &Row) -> Result<WriteResult, ApiError> {
            Ok(WriteResult::default())
        }
        async fn update(
            &self,
            _db: &str,
            _table: &str,
            _pk: &Row,
            _values: &Row,
        ) -> Result<WriteResult, ApiError> {
            Ok(WriteResult::default())
        }
        async fn remove(&self, _db: &str, _table: &str, _pk: &Row) -> Result<(), ApiError> {
            Ok(())
        }
        async fn distinct(
            &self,
            _db: &str,
            table: &str,
            column: &str,
            _limit: usize,
        ) -> Result<Vec<Value>, ApiError> {
            self.distinct_calls.set(self.distinct_calls.get() + 1);
            Ok(vec![json!(format!("{}.{}", table, column))])
        }
        async fn lookup(
            &self,
            _db: &str,
            table: &str,
            query: &LookupQuery,
        ) -> Result<Vec<LookupOption>, ApiError> {
            self.lookup_calls.set(self.lookup_calls.get() + 1);
            Ok(vec![LookupOption {
                value: json!(1),
                label: format!("{}.{}", table, query.label_col),
            }])
        }
    }

    struct StoredJunctions(Vec<Value>);

    #[async_trait(?Send)]
    impl JunctionApi for StoredJunctions {
        async fn get_selection(&self, _selection: &JunctionSelection) -> Result<Vec<Value>, ApiError> {
            Ok(self.0.clone())
        }
        async fn apply_selection(
            &self,
            _selection: &JunctionSelection,
            _far_ids: &[Value],
        ) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn state(db: &str, table: &str) -> NavigationState {
        NavigationState {
            db: db.into(),
            table: table.into(),
            pk: IndexMap::new(),
            prefill: IndexMap::new(),
            mode: Mode::Browse,
        }
    }

    #[test]
    fn test_stale_ticket_is_rejected() {
        let mut session = PageSession::default();
        session.sync(&state("shop", "Orders"));
        let ticket = session.begin_load();
        assert!(session.accept(ticket));

        assert!(session.sync(&state("shop", "Tags")));
        assert!(!session.accept(ticket));
        assert!(session.accept(session.begin_load()));
    }

    #[test]
    fn test_sync_same_selection_keeps_generation() {
        let mut session = PageSession::default();
        session.sync(&state("shop", "Orders"));
        let generation = session.generation();
        assert!(!session.sync(&state("shop", "Orders")));
        assert_eq!(session.generation(), generation);
    }

    #[tokio::test]
    async fn test_caches_are_write_once_and_cleared_on_switch() {
        let records = CountingRecords::default();
        let mut session = PageSession::default();
        session.sync(&state("shop", "Orders"));

        let values = session.distinct_values(&records, "total").await.unwrap().to_vec();
        assert_eq!(values, vec![json!("Orders.total")]);
        session.distinct_values(&records, "total").await.unwrap();
        assert_eq!(records.distinct_calls.get(), 1);

        let schema = shop();
        let fk = &schema.foreign_keys_of("Orders")[0];
        let options = session.fk_options(&records, fk, "name").await.unwrap();
        assert_eq!(options[0].label, "Customers.name");
        session.fk_options(&records, fk, "name").await.unwrap();

        let relation = &junction_relations(&schema, "Orders")[0];
        let options = session.junction_options(&records, relation, "title").await.unwrap();
        assert_eq!(options[0].label, "Tags.title");
        assert_eq!(records.lookup_calls.get(), 2);

        session.sync(&state("shop", "Tags"));
        session.distinct_values(&records, "total").await.unwrap();
        assert_eq!(records.distinct_calls.get(), 2);
    }

    #[tokio::test]
    async fn test_junction_selection_applies_when_current() {
        let schema = shop();
        let relation = &junction_relations(&schema, "Orders")[0];
        let junctions = StoredJunctions(vec![json!(3), json!(4)]);
        let mut session = PageSession::default();
        session.sync(&state("shop", "Orders"));

        let loaded = junction_selection(session.begin_load(), &junctions, relation, json!(7))
            .await
            .unwrap();
        assert_eq!(session.settle(loaded), Some(vec![json!(3), json!(4)]));
    }

    #[tokio::test]
    async fn test_junction_selection_dropped_after_switch() {
        let schema = shop();
        let relation = &junction_relations(&schema, "Orders")[0];
        let junctions = StoredJunctions(vec![json!(3)]);
        let mut session = PageSession::default();
        session.sync(&state("shop", "Orders"));

        let pending = junction_selection(session.begin_load(), &junctions, relation, json!(7));
        session.sync(&state("shop", "Tags"));
        let loaded = pending.await.unwrap();

        assert_eq!(session.settle(loaded), None);
    }
}
