use crate::{
    api::{ApiError, ApiResult, CatalogApi},
    debounce::Debouncer,
    filter_store::{FilterSnapshot, FilterStore},
    model::{
        total_pages, CatalogModel, CatalogVersion, ClientStatus, ModelRecord, PageQuery,
        PredicateField, QueryPredicate, CATEGORIES, DEFAULT_PAGE_SIZE, MODEL_TYPES,
    },
    notice::Notifier,
    status::StatusBoard,
};
use log::{debug, info, warn};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("catalog is still initializing")]
    NotReady,
    #[error("catalog fetch failed: {0}")]
    Fetch(#[from] ApiError),
}

#[derive(Clone, Copy, Debug)]
pub struct SyncOptions {
    pub debounce: Duration,
    pub page_size: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Process-wide catalog state. Only [`CatalogSynchronizer`] writes it.
#[derive(Clone, Debug)]
pub struct CatalogState {
    pub predicate: QueryPredicate,
    pub page: u32,
    pub total: u64,
    pub models: Vec<CatalogModel>,
    pub base_models: Vec<String>,
    pub ready: bool,
}

impl Default for CatalogState {
    fn default() -> Self {
        Self {
            predicate: QueryPredicate::default(),
            page: 1,
            total: 0,
            models: Vec::new(),
            base_models: Vec::new(),
            ready: false,
        }
    }
}

/// Read-only handle on the shared catalog state.
#[derive(Clone, Debug)]
pub struct CatalogView {
    state: Arc<RwLock<CatalogState>>,
    statuses: StatusBoard,
    page_size: u32,
}

impl CatalogView {
    pub fn snapshot(&self) -> CatalogState {
        self.state.read().expect("catalog poisoned").clone()
    }

    pub fn models(&self) -> Vec<CatalogModel> {
        self.state.read().expect("catalog poisoned").models.clone()
    }

    pub fn find_model(&self, model_id: u64) -> Option<CatalogModel> {
        self.state
            .read()
            .expect("catalog poisoned")
            .models
            .iter()
            .find(|model| model.id() == model_id)
            .cloned()
    }

    pub fn predicate(&self) -> QueryPredicate {
        self.state.read().expect("catalog poisoned").predicate.clone()
    }

    pub fn page(&self) -> u32 {
        self.state.read().expect("catalog poisoned").page
    }

    pub fn total(&self) -> u64 {
        self.state.read().expect("catalog poisoned").total
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn total_pages(&self) -> u64 {
        total_pages(self.total(), self.page_size)
    }

    pub fn base_models(&self) -> Vec<String> {
        self.state
            .read()
            .expect("catalog poisoned")
            .base_models
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.read().expect("catalog poisoned").ready
    }

    pub fn version_status(&self, version: &CatalogVersion) -> Option<ClientStatus> {
        self.statuses.resolve(version)
    }

    pub fn model_types(&self) -> &'static [&'static str] {
        MODEL_TYPES
    }

    pub fn categories(&self) -> &'static [&'static str] {
        CATEGORIES
    }
}

struct SyncShared {
    api: Arc<dyn CatalogApi>,
    store: FilterStore,
    statuses: StatusBoard,
    state: Arc<RwLock<CatalogState>>,
    list_generation: AtomicU64,
    count_generation: AtomicU64,
    page_size: u32,
    notices: Notifier,
}

impl SyncShared {
    /// Paired count and list fetch. Generations are taken under the state
    /// lock so their order matches the order of the captured queries.
    async fn fetch_all(&self, reset_page: bool) -> Result<(), SyncError> {
        let (query, count_generation, list_generation) = {
            let mut state = self.state.write().expect("catalog poisoned");
            if reset_page {
                state.page = 1;
            }
            (
                PageQuery {
                    predicate: state.predicate.clone(),
                    page: state.page,
                    page_size: self.page_size,
                },
                self.count_generation.fetch_add(1, Ordering::SeqCst) + 1,
                self.list_generation.fetch_add(1, Ordering::SeqCst) + 1,
            )
        };
        debug!(
            "Fetching catalog count and page {} (generation {list_generation})",
            query.page
        );

        let count = async {
            let result = self.api.count_models(&query.predicate).await;
            self.apply_count(count_generation, result)
        };
        let list = async {
            let result = self.api.list_models(&query).await;
            self.apply_list(list_generation, result)
        };
        let (count_result, list_result) = futures::join!(count, list);

        if let Err(err) = count_result.and(list_result) {
            warn!("Catalog refresh failed: {err}");
            self.notices.danger("Failed to load models");
            return Err(err.into());
        }
        Ok(())
    }

    /// Captures the current page query and claims a list generation.
    fn begin_page_fetch(&self, state: &CatalogState) -> (PageQuery, u64) {
        (
            PageQuery {
                predicate: state.predicate.clone(),
                page: state.page,
                page_size: self.page_size,
            },
            self.list_generation.fetch_add(1, Ordering::SeqCst) + 1,
        )
    }

    async fn fetch_page(&self, query: PageQuery, generation: u64) -> Result<(), SyncError> {
        debug!("Fetching catalog page {} (generation {generation})", query.page);
        let result = self.api.list_models(&query).await;
        if let Err(err) = self.apply_list(generation, result) {
            warn!("Failed to load catalog page {}: {err}", query.page);
            self.notices.danger("Failed to load models");
            return Err(err.into());
        }
        Ok(())
    }

    fn apply_list(&self, generation: u64, result: ApiResult<Vec<ModelRecord>>) -> ApiResult<()> {
        let mut state = self.state.write().expect("catalog poisoned");
        if self.list_generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding superseded catalog page (generation {generation})");
            return Ok(());
        }
        let models: Vec<CatalogModel> = result?
            .into_iter()
            .map(CatalogModel::from_record)
            .collect();
        // Fetched statuses replace any local entry for the same versions.
        self.statuses.forget(
            models
                .iter()
                .flat_map(|model| model.versions.iter().map(|version| version.record.id)),
        );
        state.models = models;
        Ok(())
    }

    /// Drops in-flight responses issued for the previous predicate.
    fn supersede_inflight(&self) {
        self.list_generation.fetch_add(1, Ordering::SeqCst);
        self.count_generation.fetch_add(1, Ordering::SeqCst);
    }

    fn apply_count(&self, generation: u64, result: ApiResult<u64>) -> ApiResult<()> {
        let mut state = self.state.write().expect("catalog poisoned");
        if self.count_generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding superseded catalog count (generation {generation})");
            return Ok(());
        }
        state.total = result?;
        Ok(())
    }

    fn persist(&self) {
        let snapshot = {
            let state = self.state.read().expect("catalog poisoned");
            FilterSnapshot::capture(&state.predicate, state.page)
        };
        self.store.save(&snapshot);
    }
}

/// Keeps the catalog page and total consistent with the live predicate.
///
/// Predicate edits are debounced into one paired count/list fetch; page
/// changes fetch the list alone. Responses older than the latest request of
/// their kind are dropped on arrival.
pub struct CatalogSynchronizer {
    shared: Arc<SyncShared>,
    runtime: Handle,
    refetch: Debouncer,
    persist: Debouncer,
}

impl CatalogSynchronizer {
    pub fn new(
        runtime: Handle,
        api: Arc<dyn CatalogApi>,
        store: FilterStore,
        statuses: StatusBoard,
        notices: Notifier,
        options: SyncOptions,
    ) -> Self {
        let shared = Arc::new(SyncShared {
            api,
            store,
            statuses,
            state: Arc::new(RwLock::new(CatalogState::default())),
            list_generation: AtomicU64::new(0),
            count_generation: AtomicU64::new(0),
            page_size: options.page_size.max(1),
            notices,
        });
        Self {
            shared,
            refetch: Debouncer::new(runtime.clone(), options.debounce),
            persist: Debouncer::new(runtime.clone(), options.debounce),
            runtime,
        }
    }

    pub fn view(&self) -> CatalogView {
        CatalogView {
            state: self.shared.state.clone(),
            statuses: self.shared.statuses.clone(),
            page_size: self.shared.page_size,
        }
    }

    /// Restores persisted filters, loads the base-model vocabulary and the
    /// first page. The synchronizer is ready afterwards even if the page
    /// fetch failed, so later edits can retry.
    pub async fn initialize(&self) -> Result<(), SyncError> {
        self.refetch.cancel();
        self.persist.cancel();

        let snapshot = self.shared.store.load();
        {
            let mut state = self.shared.state.write().expect("catalog poisoned");
            state.ready = false;
            let mut predicate = QueryPredicate::default();
            let mut page = 1;
            snapshot.apply_to(&mut predicate, &mut page);
            state.predicate = predicate;
            state.page = page;
        }

        let base_models = match self.shared.api.list_base_models().await {
            Ok(base_models) => base_models,
            Err(err) => {
                warn!("Base model list unavailable: {err}");
                Vec::new()
            }
        };
        self.shared
            .state
            .write()
            .expect("catalog poisoned")
            .base_models = base_models;

        let result = self.shared.fetch_all(false).await;
        self.shared.state.write().expect("catalog poisoned").ready = true;
        match &result {
            Ok(()) => info!(
                "Catalog ready: {} models on page {}",
                self.view().total(),
                self.view().page()
            ),
            Err(err) => warn!("Catalog initialized without data: {err}"),
        }
        result
    }

    /// Edits one predicate field and moves back to page 1. Once ready, the
    /// paired fetch runs after the debounce window.
    pub fn set_predicate_field(&self, field: PredicateField) {
        let ready = {
            let mut state = self.shared.state.write().expect("catalog poisoned");
            let before = state.predicate.clone();
            state.predicate.apply(field);
            if state.predicate == before {
                return;
            }
            state.page = 1;
            if state.ready {
                self.shared.supersede_inflight();
            }
            state.ready
        };
        if ready {
            self.schedule_refetch();
            self.schedule_persist();
        }
    }

    /// Moves to page `page` (clamped to 1). Returns the list fetch when one
    /// was issued; nothing is fetched before initialization or when the page
    /// is unchanged.
    pub fn set_page(&self, page: u32) -> Option<JoinHandle<Result<(), SyncError>>> {
        let page = page.max(1);
        let (query, generation) = {
            let mut state = self.shared.state.write().expect("catalog poisoned");
            if state.page == page {
                return None;
            }
            state.page = page;
            if !state.ready {
                return None;
            }
            self.shared.begin_page_fetch(&state)
        };
        self.schedule_persist();
        let shared = self.shared.clone();
        Some(
            self.runtime
                .spawn(async move { shared.fetch_page(query, generation).await }),
        )
    }

    pub fn clear_filters(&self) {
        let ready = {
            let mut state = self.shared.state.write().expect("catalog poisoned");
            state.predicate = QueryPredicate::default();
            state.page = 1;
            if state.ready {
                self.shared.supersede_inflight();
            }
            state.ready
        };
        if ready {
            self.schedule_refetch();
            self.schedule_persist();
        }
    }

    /// Immediate paired fetch for the current predicate and page.
    pub async fn reload(&self) -> Result<(), SyncError> {
        if !self.view().is_ready() {
            return Err(SyncError::NotReady);
        }
        self.shared.fetch_all(false).await
    }

    /// Immediate list fetch for the current page.
    pub async fn reload_page(&self) -> Result<(), SyncError> {
        if !self.view().is_ready() {
            return Err(SyncError::NotReady);
        }
        let (query, generation) = {
            let state = self.shared.state.read().expect("catalog poisoned");
            self.shared.begin_page_fetch(&state)
        };
        self.shared.fetch_page(query, generation).await
    }

    pub fn debounce_window(&self) -> Duration {
        self.refetch.delay()
    }

    fn schedule_refetch(&self) {
        let shared = self.shared.clone();
        self.refetch.schedule(async move {
            let _ = shared.fetch_all(true).await;
        });
    }

    fn schedule_persist(&self) {
        let shared = self.shared.clone();
        self.persist.schedule(async move {
            shared.persist();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::stub::{model_named, Call, Reply, StubCatalogApi},
        dispatch::{reconcile, ReconcileOptions, ReconcileOutcome},
        filter_store::{KeyValueStore, MemoryKeyValueStore, FILTER_STATE_KEY},
        model::NsfwMode,
        notice::NoticeLevel,
    };
    use anyhow::Result;
    use std::sync::{
        atomic::AtomicUsize,
        mpsc::{channel, Receiver},
    };

    const WINDOW: Duration = Duration::from_millis(300);

    #[derive(Default)]
    struct CountingStore {
        inner: MemoryKeyValueStore,
        writes: AtomicUsize,
    }

    impl KeyValueStore for CountingStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value)
        }
    }

    fn synchronizer_with(
        api: Arc<StubCatalogApi>,
        store: FilterStore,
    ) -> (CatalogSynchronizer, Receiver<crate::notice::Notice>) {
        synchronizer_with_statuses(api, store, StatusBoard::new())
    }

    fn synchronizer_with_statuses(
        api: Arc<StubCatalogApi>,
        store: FilterStore,
        statuses: StatusBoard,
    ) -> (CatalogSynchronizer, Receiver<crate::notice::Notice>) {
        let (tx, rx) = channel();
        let sync = CatalogSynchronizer::new(
            Handle::current(),
            api,
            store,
            statuses,
            Notifier::new(tx),
            SyncOptions::default(),
        );
        (sync, rx)
    }

    async fn ready_synchronizer() -> (Arc<StubCatalogApi>, CatalogSynchronizer) {
        let api = Arc::new(StubCatalogApi::new());
        let (sync, _rx) = synchronizer_with(api.clone(), FilterStore::in_memory());
        sync.initialize().await.expect("initialize");
        (api, sync)
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_fetches_vocabulary_then_count_and_list() {
        let (api, sync) = ready_synchronizer().await;
        let view = sync.view();

        assert!(view.is_ready());
        assert_eq!(view.base_models(), vec!["SD 1.5", "SDXL"]);
        assert_eq!(view.total(), 120);
        assert_eq!(view.total_pages(), 3);
        assert_eq!(view.models().len(), 1);
        assert_eq!(api.calls()[0], Call::BaseModels);
        assert_eq!(api.count_calls().len(), 1);
        assert_eq!(api.list_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_before_ready_do_not_fetch() {
        let api = Arc::new(StubCatalogApi::new());
        let (sync, _rx) = synchronizer_with(api.clone(), FilterStore::in_memory());

        sync.set_predicate_field(PredicateField::Search("early".into()));
        assert!(sync.set_page(4).is_none());
        sync.clear_filters();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(api.calls().is_empty());
        assert!(matches!(sync.reload().await, Err(SyncError::NotReady)));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_edits_issues_one_paired_fetch_on_page_one() {
        let (api, sync) = ready_synchronizer().await;
        sync.set_page(3)
            .expect("page fetch issued")
            .await
            .expect("join")
            .expect("page fetch");
        assert_eq!(sync.view().page(), 3);

        for text in ["h", "he", "her", "heron"] {
            sync.set_predicate_field(PredicateField::Search(text.into()));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        sync.set_predicate_field(PredicateField::ModelType("LORA".into()));
        tokio::time::sleep(WINDOW + Duration::from_millis(50)).await;

        let counts = api.count_calls();
        let lists = api.list_calls();
        assert_eq!(counts.len(), 2);
        assert_eq!(lists.len(), 3);
        let last = lists.last().expect("list call");
        assert_eq!(last.page, 1);
        assert_eq!(last.predicate.search, "heron");
        assert_eq!(last.predicate.model_type, "LORA");
        assert_eq!(counts.last(), Some(&last.predicate));
        assert_eq!(sync.view().page(), 1);
        assert_eq!(sync.view().models()[0].name(), "heron#1");
    }

    #[tokio::test(start_paused = true)]
    async fn page_change_never_counts() {
        let (api, sync) = ready_synchronizer().await;
        sync.set_predicate_field(PredicateField::Search("owl".into()));
        tokio::time::sleep(WINDOW * 2).await;
        let counts_before = api.count_calls().len();

        sync.set_page(2)
            .expect("page fetch issued")
            .await
            .expect("join")
            .expect("page fetch");
        tokio::time::sleep(WINDOW * 2).await;

        assert_eq!(api.count_calls().len(), counts_before);
        assert_eq!(sync.view().predicate().search, "owl");
        let last = api.list_calls().pop().expect("list call");
        assert_eq!(last.page, 2);
        assert_eq!(last.predicate.search, "owl");
        assert!(sync.set_page(2).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_page_response_is_dropped() {
        let (api, sync) = ready_synchronizer().await;
        api.script_list(Reply::ok_after(
            Duration::from_secs(2),
            vec![model_named(2, "stale")],
        ));
        api.script_list(Reply::ok_after(
            Duration::from_millis(10),
            vec![model_named(3, "fresh")],
        ));

        let slow = sync.set_page(2).expect("page 2 fetch");
        let fast = sync.set_page(3).expect("page 3 fetch");
        fast.await.expect("join").expect("fresh fetch");
        assert_eq!(sync.view().models()[0].name(), "fresh");

        slow.await.expect("join").expect("stale fetch resolves");
        assert_eq!(sync.view().models()[0].name(), "fresh");
        assert_eq!(sync.view().page(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_count_response_is_dropped() {
        let (api, sync) = ready_synchronizer().await;
        api.script_count(Reply::ok_after(Duration::from_secs(2), 999));
        api.script_count(Reply::ok_after(Duration::from_millis(10), 7));

        let (first, second) = tokio::join!(sync.reload(), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            sync.reload().await
        });
        first.expect("first reload");
        second.expect("second reload");
        assert_eq!(sync.view().total(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_previous_page_and_notifies() {
        let api = Arc::new(StubCatalogApi::new());
        let (sync, rx) = synchronizer_with(api.clone(), FilterStore::in_memory());
        sync.initialize().await.expect("initialize");
        let before = sync.view().models();

        api.script_list(Reply::fail_after(Duration::ZERO));
        api.script_count(Reply::fail_after(Duration::ZERO));
        let err = sync.reload().await.expect_err("reload should fail");
        assert!(matches!(err, SyncError::Fetch(_)));
        assert_eq!(sync.view().models(), before);
        assert_eq!(sync.view().total(), 120);

        let notice = rx.try_recv().expect("danger notice");
        assert_eq!(notice.level, NoticeLevel::Danger);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_vocabulary_degrades_to_empty() {
        let api = Arc::new(StubCatalogApi::new());
        *api.fail_base_models.lock().unwrap() = true;
        let (sync, rx) = synchronizer_with(api.clone(), FilterStore::in_memory());

        sync.initialize().await.expect("initialize");
        assert!(sync.view().base_models().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_restores_legacy_snapshot() {
        let backend = Arc::new(MemoryKeyValueStore::default());
        backend
            .set(
                FILTER_STATE_KEY,
                r#"{"search":"fox","hideNsfw":true,"page":3,"syncedFilter":true}"#,
            )
            .expect("seed");
        let api = Arc::new(StubCatalogApi::new());
        let (sync, _rx) = synchronizer_with(api.clone(), FilterStore::new(backend));

        sync.initialize().await.expect("initialize");
        let predicate = sync.view().predicate();
        assert_eq!(predicate.search, "fox");
        assert_eq!(predicate.nsfw_mode, NsfwMode::No);
        assert!(predicate.synced_only);
        assert_eq!(predicate.model_type, "");

        let list = api.list_calls().pop().expect("list call");
        assert_eq!(list.page, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_then_reinitialize_restores_previous_predicate() {
        let backend = Arc::new(MemoryKeyValueStore::default());
        let store = FilterStore::new(backend);
        let api = Arc::new(StubCatalogApi::new());
        let (sync, _rx) = synchronizer_with(api.clone(), store.clone());
        sync.initialize().await.expect("initialize");

        sync.set_predicate_field(PredicateField::Search("heron".into()));
        sync.set_predicate_field(PredicateField::Category("style".into()));
        sync.set_predicate_field(PredicateField::NsfwMode(NsfwMode::Yes));
        tokio::time::sleep(WINDOW * 2).await;
        let before_clear = sync.view().predicate();

        sync.clear_filters();
        assert_eq!(sync.view().predicate(), QueryPredicate::default());

        let (restored, _rx) = synchronizer_with(api, store);
        restored.initialize().await.expect("initialize");
        assert_eq!(restored.view().predicate(), before_clear);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_persists_once() {
        let backend = Arc::new(CountingStore::default());
        let api = Arc::new(StubCatalogApi::new());
        let (sync, _rx) = synchronizer_with(api, FilterStore::new(backend.clone()));
        sync.initialize().await.expect("initialize");

        sync.set_predicate_field(PredicateField::TagsSearch("a".into()));
        sync.set_predicate_field(PredicateField::TagsSearch("ab".into()));
        sync.set_predicate_field(PredicateField::SyncedOnly(true));
        tokio::time::sleep(WINDOW / 2).await;
        assert_eq!(backend.writes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(WINDOW).await;
        assert_eq!(backend.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_filters_refetches_defaults_from_page_one() {
        let (api, sync) = ready_synchronizer().await;
        sync.set_predicate_field(PredicateField::BaseModel("SDXL".into()));
        tokio::time::sleep(WINDOW * 2).await;
        sync.set_page(2)
            .expect("page fetch issued")
            .await
            .expect("join")
            .expect("page fetch");

        sync.clear_filters();
        tokio::time::sleep(WINDOW * 2).await;

        let last = api.list_calls().pop().expect("list call");
        assert_eq!(last.page, 1);
        assert_eq!(last.predicate, QueryPredicate::default());
        assert_eq!(
            api.count_calls().last(),
            Some(&QueryPredicate::default())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_edit_after_page_change_persists_page_one() {
        let store = FilterStore::in_memory();
        let api = Arc::new(StubCatalogApi::new());
        let (sync, _rx) = synchronizer_with(api, store.clone());
        sync.initialize().await.expect("initialize");

        sync.set_page(3)
            .expect("page fetch issued")
            .await
            .expect("join")
            .expect("page fetch");
        sync.set_predicate_field(PredicateField::Search("new".into()));
        assert_eq!(sync.view().page(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;

        let saved = store.load();
        assert_eq!(saved.search.as_deref(), Some("new"));
        assert_eq!(saved.page, Some(1));

        let (restored, _rx) = synchronizer_with(Arc::new(StubCatalogApi::new()), store);
        restored.initialize().await.expect("initialize");
        assert_eq!(restored.view().page(), 1);
        assert_eq!(restored.view().predicate().search, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_page_response_after_predicate_refetch_is_dropped() {
        let (api, sync) = ready_synchronizer().await;
        api.script_list(Reply::ok_after(
            Duration::from_secs(2),
            vec![model_named(2, "old page")],
        ));

        let slow = sync.set_page(2).expect("page 2 fetch");
        sync.set_predicate_field(PredicateField::Search("new".into()));
        tokio::time::sleep(WINDOW + Duration::from_millis(50)).await;
        assert_eq!(sync.view().models()[0].name(), "new#1");

        slow.await.expect("join").expect("stale fetch resolves");
        let view = sync.view();
        assert_eq!(view.models()[0].name(), "new#1");
        assert_eq!(view.page(), 1);
        assert_eq!(view.predicate().search, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_replaces_stale_local_status() {
        let api = Arc::new(StubCatalogApi::new());
        let statuses = StatusBoard::new();
        let (sync, _rx) =
            synchronizer_with_statuses(api.clone(), FilterStore::in_memory(), statuses.clone());
        sync.initialize().await.expect("initialize");

        statuses.set(10, Some(ClientStatus::Pending));
        let options = ReconcileOptions {
            max_attempts: 1,
            ..ReconcileOptions::default()
        };
        let outcome = reconcile(api.as_ref(), &statuses, 10, options).await;
        assert_eq!(outcome, ReconcileOutcome::Exhausted { attempts: 1 });
        let shown = sync.view().models()[0].versions[0].clone();
        assert_eq!(sync.view().version_status(&shown), Some(ClientStatus::Pending));

        let mut record = model_named(1, "tracked");
        record.versions[0].client_status = Some("installed".into());
        api.script_list(Reply::ok_after(Duration::ZERO, vec![record]));
        sync.reload().await.expect("reload");

        let fetched = sync.view().models()[0].versions[0].clone();
        assert_eq!(fetched.record.id, 10);
        assert_eq!(
            sync.view().version_status(&fetched),
            Some(ClientStatus::Reported("installed".into()))
        );
        assert_eq!(statuses.get(10), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_value_schedules_nothing() {
        let (api, sync) = ready_synchronizer().await;
        let calls = api.calls().len();
        sync.set_predicate_field(PredicateField::NsfwMode(NsfwMode::Both));
        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(api.calls().len(), calls);
    }
}
