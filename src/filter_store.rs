use crate::model::{NsfwMode, QueryPredicate};
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::{Arc, RwLock},
};

pub const FILTER_STATE_KEY: &str = "modelListState";
const LOCAL_STORAGE_FILE: &str = "local_storage.json";

/// Durable string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Key-value pairs kept in one JSON file, rewritten on every `set`.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileKeyValueStore {
    pub fn open_in(state_dir: PathBuf) -> Self {
        let path = state_dir.join(LOCAL_STORAGE_FILE);
        let entries = match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|err| {
                warn!("Ignoring unreadable local storage at {:?}: {err}", path);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .expect("local storage lock poisoned")
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self
            .entries
            .write()
            .expect("local storage lock poisoned for write");
        guard.insert(key.to_string(), value.to_string());
        let data = serde_json::to_vec_pretty(&*guard)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create state directory {parent:?}"))?;
        }
        fs::write(&self.path, data)
            .with_context(|| format!("failed to write local storage to {:?}", self.path))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .read()
            .expect("memory storage lock poisoned")
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .expect("memory storage lock poisoned for write")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Persisted subset of the query predicate plus the current page.
///
/// Every field is optional: a field missing from storage keeps its default
/// when the snapshot is applied.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags_search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_base_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_model_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsfw_filter: Option<String>,
    /// Pre-enum boolean written by older clients; read but never written.
    #[serde(default, skip_serializing)]
    pub hide_nsfw: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_filter: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl FilterSnapshot {
    pub fn capture(predicate: &QueryPredicate, page: u32) -> Self {
        Self {
            search: Some(predicate.search.clone()),
            tags_search: Some(predicate.tags_search.clone()),
            selected_category: Some(predicate.category.clone()),
            selected_base_model: Some(predicate.base_model.clone()),
            selected_model_type: Some(predicate.model_type.clone()),
            nsfw_filter: Some(predicate.nsfw_mode.identifier().to_string()),
            hide_nsfw: None,
            synced_filter: Some(predicate.synced_only),
            page: Some(page),
        }
    }

    /// The stored NSFW mode; the enum field wins over the legacy flag.
    pub fn nsfw_mode(&self) -> Option<NsfwMode> {
        self.nsfw_filter
            .as_deref()
            .and_then(NsfwMode::from_identifier)
            .or_else(|| self.hide_nsfw.map(NsfwMode::from_legacy_hide))
    }

    pub fn apply_to(&self, predicate: &mut QueryPredicate, page: &mut u32) {
        if let Some(search) = &self.search {
            predicate.search = search.clone();
        }
        if let Some(tags) = &self.tags_search {
            predicate.tags_search = tags.clone();
        }
        if let Some(category) = &self.selected_category {
            predicate.category = category.clone();
        }
        if let Some(base_model) = &self.selected_base_model {
            predicate.base_model = base_model.clone();
        }
        if let Some(model_type) = &self.selected_model_type {
            predicate.model_type = model_type.clone();
        }
        if let Some(mode) = self.nsfw_mode() {
            predicate.nsfw_mode = mode;
        }
        if let Some(synced) = self.synced_filter {
            predicate.synced_only = synced;
        }
        if let Some(saved_page) = self.page.filter(|p| *p >= 1) {
            *page = saved_page;
        }
    }
}

#[derive(Clone)]
pub struct FilterStore {
    backend: Arc<dyn KeyValueStore>,
    key: String,
}

impl FilterStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            key: FILTER_STATE_KEY.to_string(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::default()))
    }

    /// Never fails: absent or corrupt data yields an empty snapshot.
    pub fn load(&self) -> FilterSnapshot {
        let raw = match self.backend.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return FilterSnapshot::default(),
            Err(err) => {
                warn!("Failed to read filter state: {err:#}");
                return FilterSnapshot::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!("Discarding corrupt filter state: {err}");
            FilterSnapshot::default()
        })
    }

    /// Best effort; failures are logged and swallowed.
    pub fn save(&self, snapshot: &FilterSnapshot) {
        let result = serde_json::to_string(snapshot)
            .map_err(anyhow::Error::from)
            .and_then(|data| self.backend.set(&self.key, &data));
        match result {
            Ok(()) => debug!("Persisted filter state"),
            Err(err) => warn!("Failed to persist filter state: {err:#}"),
        }
    }

    #[cfg(test)]
    fn raw(&self) -> Option<String> {
        self.backend.get(&self.key).ok().flatten()
    }
}
