use crate::model::{CatalogVersion, ClientStatus};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// Per-version client statuses written ahead of, or after, the catalog fetch.
///
/// An entry shadows the status carried by the fetched record until the next
/// page containing that version is applied. `None` entries record an
/// explicit clear.
#[derive(Clone, Debug, Default)]
pub struct StatusBoard {
    entries: Arc<RwLock<HashMap<u64, Option<ClientStatus>>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, version_id: u64, status: Option<ClientStatus>) {
        self.entries
            .write()
            .expect("status board poisoned")
            .insert(version_id, status);
    }

    /// `None` when no local entry exists for the version.
    pub fn get(&self, version_id: u64) -> Option<Option<ClientStatus>> {
        self.entries
            .read()
            .expect("status board poisoned")
            .get(&version_id)
            .cloned()
    }

    pub fn forget(&self, version_ids: impl IntoIterator<Item = u64>) {
        let mut entries = self.entries.write().expect("status board poisoned");
        for version_id in version_ids {
            entries.remove(&version_id);
        }
    }

    pub fn resolve(&self, version: &CatalogVersion) -> Option<ClientStatus> {
        self.get(version.record.id).unwrap_or_else(|| {
            ClientStatus::from_reported(version.record.client_status.as_deref())
        })
    }
}
