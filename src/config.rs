use crate::{app::APP_ID, env_flags};
use anyhow::{anyhow, Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

const SETTINGS_FILE: &str = "settings.json";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080/api";

#[derive(Debug)]
pub struct ConfigStore {
    config_dir: PathBuf,
    state_dir: PathBuf,
    settings: RwLock<AppSettings>,
}

impl ConfigStore {
    pub fn new() -> Result<Self> {
        let base = BaseDirs::new()
            .ok_or_else(|| anyhow!("unable to resolve base directories for {APP_ID}"))?;
        Self::open(&base.data_local_dir().join(APP_ID))
    }

    pub fn open(root_dir: &Path) -> Result<Self> {
        let config_dir = root_dir.join("config");
        let state_dir = root_dir.join("state");

        fs::create_dir_all(&config_dir)
            .with_context(|| format!("failed to create config directory {config_dir:?}"))?;

        fs::create_dir_all(&state_dir)
            .with_context(|| format!("failed to create state directory {state_dir:?}"))?;

        let settings_path = config_dir.join(SETTINGS_FILE);
        let mut settings: AppSettings = if settings_path.exists() {
            let data = fs::read(&settings_path)
                .with_context(|| format!("failed to read settings file {settings_path:?}"))?;
            serde_json::from_slice(&data)
                .with_context(|| format!("failed to parse settings from {settings_path:?}"))?
        } else {
            AppSettings::default()
        };
        settings.apply_env_overrides();

        Ok(Self {
            config_dir,
            state_dir,
            settings: RwLock::new(settings),
        })
    }

    pub fn settings(&self) -> AppSettings {
        self.settings
            .read()
            .expect("settings lock poisoned")
            .clone()
    }

    pub fn update_settings<F>(&self, mutate: F) -> Result<AppSettings>
    where
        F: FnOnce(&mut AppSettings),
    {
        let mut guard = self
            .settings
            .write()
            .expect("settings lock poisoned for write");
        mutate(&mut guard);
        let snapshot = guard.clone();
        self.persist_locked(&snapshot)?;
        Ok(snapshot)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.clone()
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.clone()
    }

    fn persist_locked(&self, settings: &AppSettings) -> Result<()> {
        let path = self.config_path().join(SETTINGS_FILE);
        let data = serde_json::to_vec_pretty(settings)?;
        fs::write(&path, data).with_context(|| format!("failed to write settings to {path:?}"))?;
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AppSettings {
    pub api_base_url: String,
    pub client_id: String,
    pub debounce_ms: u64,
    pub page_size: u32,
    pub download_poll_ms: u64,
    pub dispatch_poll_ms: u64,
    pub dispatch_max_attempts: u32,
    #[serde(skip)]
    pub ephemeral_filters: bool,
}

impl AppSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn download_poll_interval(&self) -> Duration {
        Duration::from_millis(self.download_poll_ms.max(1))
    }

    pub fn dispatch_poll_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_ms.max(1))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(url) = env_flags::api_base_url() {
            self.api_base_url = url;
        }
        if let Some(client_id) = env_flags::client_id() {
            self.client_id = client_id;
        }
        self.ephemeral_filters = env_flags::ephemeral_filters();
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            client_id: crate::dispatch::DEFAULT_CLIENT_ID.to_string(),
            debounce_ms: 300,
            page_size: crate::model::DEFAULT_PAGE_SIZE,
            download_poll_ms: 1000,
            dispatch_poll_ms: 2000,
            dispatch_max_attempts: 1500,
            ephemeral_filters: false,
        }
    }
}
