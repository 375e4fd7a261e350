//! Saved summary/detail field configurations.

use crate::api::{ApiError, ConfigStore};
use crate::descriptor::{FieldDescriptor, RawField, normalize};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedConfig {
    pub db: String,
    pub main_table: String,
    pub summary_fields: Vec<FieldDescriptor>,
    pub detail_fields: Vec<FieldDescriptor>,
    pub version: u32,
}

/// Stored shape, including older payloads that kept plain strings.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredConfig {
    #[serde(default)]
    db: String,
    main_table: String,
    #[serde(default)]
    summary_fields: Vec<RawField>,
    #[serde(default)]
    detail_fields: Vec<RawField>,
    #[serde(default)]
    version: Option<u32>,
}

impl SavedConfig {
    /// Build a config from a selection as the page holds it; both field
    /// lists are normalized against `main_table`.
    pub fn new(db: &str, main_table: &str, summary: &[RawField], detail: &[RawField]) -> Self {
        Self {
            db: db.to_string(),
            main_table: main_table.to_string(),
            summary_fields: normalize(summary, main_table),
            detail_fields: normalize(detail, main_table),
            version: CURRENT_CONFIG_VERSION,
        }
    }

    /// Parse a stored config of any version and bring it to the current one.
    pub fn upgrade(source: &str) -> Result<Self, serde_json::Error> {
        let stored: StoredConfig = serde_json::from_str(source)?;
        let from = stored.version.unwrap_or(0);
        if from < CURRENT_CONFIG_VERSION {
            tracing::info!(from, to = CURRENT_CONFIG_VERSION, table = %stored.main_table, "upgrading saved config");
        }
        Ok(Self::new(
            &stored.db,
            &stored.main_table,
            &stored.summary_fields,
            &stored.detail_fields,
        ))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl<'de> Deserialize<'de> for SavedConfig {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = StoredConfig::deserialize(deserializer)?;
        Ok(Self::new(
            &stored.db,
            &stored.main_table,
            &stored.summary_fields,
            &stored.detail_fields,
        ))
    }
}

/// Config store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    configs: RefCell<IndexMap<String, SavedConfig>>,
}

#[async_trait(?Send)]
impl ConfigStore for MemoryConfigStore {
    async fn list(&self) -> Result<Vec<String>, ApiError> {
        Ok(self.configs.borrow().keys().cloned().collect())
    }

    async fn get(&self, config_id: &str) -> Result<SavedConfig, ApiError> {
        self.configs
            .borrow()
            .get(config_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(config_id.to_string()))
    }

    async fn save(&self, config_id: &str, config: &SavedConfig) -> Result<(), ApiError> {
        self.configs
            .borrow_mut()
            .insert(config_id.to_string(), config.clone());
        Ok(())
    }

    async fn remove(&self, config_id: &str) -> Result<(), ApiError> {
        self.configs
            .borrow_mut()
            .shift_remove(config_id)
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(config_id.to_string()))
    }

    async fn exists(&self, config_id: &str) -> Result<bool, ApiError> {
        Ok(self.configs.borrow().contains_key(config_id))
    }
}
