use crate::{
    api::{CatalogApi, HttpCatalogApi},
    catalog::{CatalogSynchronizer, SyncOptions},
    config::ConfigStore,
    detail::VersionDetail,
    dispatch::{DispatchTracker, ReconcileOptions},
    download::DownloadTracker,
    filter_store::{FileKeyValueStore, FilterStore},
    notice::{Notice, NoticeLevel, Notifier},
    status::StatusBoard,
};
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::sync::{
    mpsc::{channel, Receiver},
    Arc,
};
use tokio::runtime::{Builder, Runtime};

pub const APP_ID: &str = "dev.wknd.CatalogSync";

#[derive(Clone)]
pub struct AppContext {
    pub runtime: Arc<Runtime>,
    pub config: Arc<ConfigStore>,
    pub api: Arc<dyn CatalogApi>,
    pub statuses: StatusBoard,
    pub notifier: Notifier,
    pub catalog: Arc<CatalogSynchronizer>,
    pub downloads: DownloadTracker,
    pub dispatch: DispatchTracker,
}

impl AppContext {
    pub fn version_detail(&self) -> VersionDetail {
        VersionDetail::new(self.api.clone(), self.notifier.clone())
    }
}

pub struct CatalogSyncApp {
    context: AppContext,
    notices: Receiver<Notice>,
}

impl CatalogSyncApp {
    pub fn new() -> Result<Self> {
        Self::with_config(ConfigStore::new()?)
    }

    pub fn with_config(config: ConfigStore) -> Result<Self> {
        let runtime = Arc::new(
            Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| anyhow!("failed to create Tokio runtime: {err}"))?,
        );
        let handle = runtime.handle().clone();
        let settings = config.settings();

        let api: Arc<dyn CatalogApi> = Arc::new(HttpCatalogApi::new(&settings.api_base_url)?);
        let store = if settings.ephemeral_filters {
            FilterStore::in_memory()
        } else {
            FilterStore::new(Arc::new(FileKeyValueStore::open_in(config.state_path())))
        };
        let (sender, notices) = channel();
        let notifier = Notifier::new(sender);
        let statuses = StatusBoard::new();

        let catalog = Arc::new(CatalogSynchronizer::new(
            handle.clone(),
            api.clone(),
            store,
            statuses.clone(),
            notifier.clone(),
            SyncOptions {
                debounce: settings.debounce(),
                page_size: settings.page_size,
            },
        ));
        let downloads = DownloadTracker::new(
            handle.clone(),
            api.clone(),
            settings.download_poll_interval(),
            notifier.clone(),
        );
        let dispatch = DispatchTracker::new(
            handle,
            api.clone(),
            statuses.clone(),
            settings.client_id.clone(),
            ReconcileOptions {
                interval: settings.dispatch_poll_interval(),
                max_attempts: settings.dispatch_max_attempts,
            },
            notifier.clone(),
        );

        let context = AppContext {
            runtime,
            config: Arc::new(config),
            api,
            statuses,
            notifier,
            catalog,
            downloads,
            dispatch,
        };
        Ok(Self { context, notices })
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn notices(&self) -> &Receiver<Notice> {
        &self.notices
    }

    /// Loads the catalog, optionally applies a search, and logs the page.
    pub fn run(self, search: Option<String>) -> Result<()> {
        let context = self.context.clone();
        let result = context.runtime.block_on(async {
            let catalog = &context.catalog;
            catalog.initialize().await?;
            if let Some(search) = search {
                catalog.set_predicate_field(crate::model::PredicateField::Search(search));
                let settle = catalog.debounce_window() * 2;
                tokio::time::sleep(settle).await;
            }
            Ok::<_, anyhow::Error>(())
        });

        for notice in self.notices.try_iter() {
            match notice.level {
                NoticeLevel::Danger => warn!("{}", notice.message),
                NoticeLevel::Success | NoticeLevel::Info => info!("{}", notice.message),
            }
        }
        result?;

        let view = context.catalog.view();
        info!(
            "{} models in {} pages (page {} of size {})",
            view.total(),
            view.total_pages(),
            view.page(),
            view.page_size()
        );
        for model in view.models() {
            info!(
                "#{} {} [{}] {} versions",
                model.id(),
                model.name(),
                model.record.model_type,
                model.versions.len()
            );
        }
        Ok(())
    }
}
