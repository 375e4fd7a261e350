//! Contracts of the services this crate talks to. Implementations live in
//! the page (fetch-based) or in tests (in-memory).
//!
//! The UI runs on one thread, so futures are not required to be `Send`.

use crate::config::SavedConfig;
use crate::descriptor::AliasMap;
use crate::schema::DatabaseSchema;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Column -> value. Also used for primary keys.
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Malformed response: {0}")]
    Envelope(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupQuery {
    pub value_col: String,
    pub label_col: String,
    pub limit: usize,
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupOption {
    pub value: Value,
    pub label: String,
}

/// What a create or update returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    #[serde(default)]
    pub primary_key: Option<Row>,
}

/// Addresses one anchor record's side of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JunctionSelection {
    pub junction_table: String,
    pub main_fk_column: String,
    pub main_id: Value,
    pub far_fk_column: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    #[serde(default)]
    pub alias_map: AliasMap,
}

#[async_trait(?Send)]
pub trait SchemaProvider {
    async fn schema(&self, db: &str) -> Result<DatabaseSchema, ApiError>;
}

#[async_trait(?Send)]
pub trait RecordApi {
    async fn query(&self, db: &str, table: &str, limit: usize) -> Result<Vec<Row>, ApiError>;
    async fn get(&self, db: &str, table: &str, pk: &Row) -> Result<Option<Row>, ApiError>;
    async fn create(&self, db: &str, table: &str, values: &Row) -> Result<WriteResult, ApiError>;
    async fn update(
        &self,
        db: &str,
        table: &str,
        pk: &Row,
        values: &Row,
    ) -> Result<WriteResult, ApiError>;
    async fn remove(&self, db: &str, table: &str, pk: &Row) -> Result<(), ApiError>;
    async fn distinct(
        &self,
        db: &str,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<Value>, ApiError>;
    async fn lookup(
        &self,
        db: &str,
        table: &str,
        query: &LookupQuery,
    ) -> Result<Vec<LookupOption>, ApiError>;
}

#[async_trait(?Send)]
pub trait JunctionApi {
    async fn get_selection(&self, selection: &JunctionSelection) -> Result<Vec<Value>, ApiError>;

    /// Replace the whole far-id set for `selection`.
    async fn apply_selection(
        &self,
        selection: &JunctionSelection,
        far_ids: &[Value],
    ) -> Result<(), ApiError>;
}

#[async_trait(?Send)]
pub trait QueryExecutor {
    async fn run(&self, config: &SavedConfig) -> Result<QueryOutput, ApiError>;
}

#[async_trait(?Send)]
pub trait ConfigStore {
    async fn list(&self) -> Result<Vec<String>, ApiError>;
    async fn get(&self, config_id: &str) -> Result<SavedConfig, ApiError>;
    async fn save(&self, config_id: &str, config: &SavedConfig) -> Result<(), ApiError>;
    async fn remove(&self, config_id: &str) -> Result<(), ApiError>;
    async fn exists(&self, config_id: &str) -> Result<bool, ApiError>;
}
