//! Local stores and the registry that owns them

use crate::config::DEFAULT_RECORD_ID;
use crate::error::{PipeError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Local persistence for records, keyed by their identifier
pub trait Store: Send + Sync {
    /// Backend kind, e.g. `"MEMORY"`
    fn kind(&self) -> &str;

    fn read_all(&self) -> Vec<Value>;

    fn read(&self, id: &str) -> Option<Value>;

    /// Insert or replace a record. It must carry a non-empty identifier.
    fn save(&self, record: Value) -> Result<()>;

    /// Returns whether a record was removed
    fn remove(&self, id: &str) -> bool;

    fn reset(&self);

    fn is_empty(&self) -> bool {
        self.read_all().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StoreKind {
    #[default]
    Memory,
}

/// How a store is created by `StoreRegistry::add_with_type`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default = "default_record_id")]
    pub record_id: String,
}

fn default_record_id() -> String {
    DEFAULT_RECORD_ID.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            record_id: default_record_id(),
        }
    }
}

/// In-memory store; keeps insertion order
pub struct MemoryStore {
    record_id: String,
    records: RwLock<Vec<(String, Value)>>,
}

impl MemoryStore {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            records: RwLock::new(Vec::new()),
        }
    }

    fn id_of(&self, record: &Value) -> Option<String> {
        match record.get(&self.record_id)? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_RECORD_ID)
    }
}

impl Store for MemoryStore {
    fn kind(&self) -> &str {
        "MEMORY"
    }

    fn read_all(&self) -> Vec<Value> {
        self.records.read().iter().map(|(_, v)| v.clone()).collect()
    }

    fn read(&self, id: &str) -> Option<Value> {
        self.records
            .read()
            .iter()
            .find(|(k, _)| k == id)
            .map(|(_, v)| v.clone())
    }

    fn save(&self, record: Value) -> Result<()> {
        let id = self.id_of(&record).ok_or_else(|| {
            PipeError::MissingIdentifier(self.record_id.clone())
        })?;

        let mut records = self.records.write();
        match records.iter_mut().find(|(k, _)| *k == id) {
            Some((_, slot)) => *slot = record,
            None => records.push((id, record)),
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> bool {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|(k, _)| k != id);
        records.len() != before
    }

    fn reset(&self) {
        self.records.write().clear();
    }
}

/// Name-keyed factory for local stores.
///
/// Owned by whatever composes the application; there is no global instance.
#[derive(Default)]
pub struct StoreRegistry {
    stores: DashMap<String, Arc<dyn Store>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a default in-memory store
    pub fn add(&self, name: &str) -> Arc<dyn Store> {
        self.add_with_type(name, StoreConfig::default())
    }

    /// Add (or replace) a store of the configured kind
    pub fn add_with_type(&self, name: &str, config: StoreConfig) -> Arc<dyn Store> {
        let store: Arc<dyn Store> = match config.kind {
            StoreKind::Memory => Arc::new(MemoryStore::new(config.record_id)),
        };
        self.stores.insert(name.to_string(), store.clone());
        store
    }

    /// Remove a store, handing it back to the caller
    pub fn remove(&self, name: &str) -> Result<Arc<dyn Store>> {
        self.stores
            .remove(name)
            .map(|(_, store)| store)
            .ok_or_else(|| PipeError::StoreNotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Store>> {
        self.stores.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
