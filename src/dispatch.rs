use crate::{
    api::{CatalogApi, DispatchAction, DispatchRequest},
    model::{CatalogModel, CatalogVersion, ClientStatus, ModelRecord, VersionRecord},
    notice::Notifier,
    status::StatusBoard,
};
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CLIENT_ID: &str = "My-Desktop-PC";
pub const DEFAULT_SUBDIRECTORY: &str = "Checkpoint";
const DEFAULT_EXTENSION: &str = ".safetensors";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReconcileOptions {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 1500,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReconcileOutcome {
    /// The server reported something other than `pending`.
    Settled(Option<ClientStatus>),
    /// Attempt budget spent while still `pending`; the status is left alone.
    Exhausted { attempts: u32 },
}

type PollRegistry = Arc<Mutex<HashMap<u64, (u64, CancellationToken)>>>;

/// Counts one dispatch request for as long as it is alive, including when
/// the `dispatch` future is dropped mid-request.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sends fire-and-forget actions to a remote agent and follows up on
/// downloads by polling the version's reported client status.
#[derive(Clone)]
pub struct DispatchTracker {
    runtime: Handle,
    api: Arc<dyn CatalogApi>,
    statuses: StatusBoard,
    default_client_id: String,
    options: ReconcileOptions,
    notices: Notifier,
    polls: PollRegistry,
    next_ticket: Arc<AtomicU64>,
    dispatching: Arc<AtomicUsize>,
}

impl DispatchTracker {
    pub fn new(
        runtime: Handle,
        api: Arc<dyn CatalogApi>,
        statuses: StatusBoard,
        default_client_id: impl Into<String>,
        options: ReconcileOptions,
        notices: Notifier,
    ) -> Self {
        Self {
            runtime,
            api,
            statuses,
            default_client_id: default_client_id.into(),
            options,
            notices,
            polls: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: Arc::new(AtomicU64::new(0)),
            dispatching: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::SeqCst) > 0
    }

    pub fn is_polling(&self, version_id: u64) -> bool {
        self.polls
            .lock()
            .expect("dispatch polls poisoned")
            .contains_key(&version_id)
    }

    /// Posts `action` for `version` to the agent `client_id` (or the
    /// configured default). Returns whether the server accepted it.
    pub async fn dispatch(
        &self,
        action: DispatchAction,
        model: &CatalogModel,
        version: &CatalogVersion,
        client_id: Option<&str>,
    ) -> bool {
        let request = self.build_request(action, &model.record, &version.record, client_id);
        let version_id = request.model_version_id;

        let in_flight = InFlight::enter(&self.dispatching);
        let result = self.api.dispatch(&request).await;
        drop(in_flight);

        if let Err(err) = result {
            warn!(
                "Failed to dispatch {} of version {version_id} to {}: {err}",
                action.identifier(),
                request.client_id
            );
            self.notices.danger(format!("Failed to dispatch: {err}"));
            return false;
        }

        info!(
            "Dispatched {} of {} to {}",
            action.identifier(),
            request.filename,
            request.client_id
        );
        match action {
            DispatchAction::Download => {
                self.statuses.set(version_id, Some(ClientStatus::Pending));
                self.track(version_id);
            }
            DispatchAction::Delete => {
                self.stop_tracking(version_id);
                self.statuses.set(version_id, None);
            }
        }
        true
    }

    pub fn build_request(
        &self,
        action: DispatchAction,
        model: &ModelRecord,
        version: &VersionRecord,
        client_id: Option<&str>,
    ) -> DispatchRequest {
        let client_id = client_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_client_id.clone());
        DispatchRequest {
            action,
            url: version.download_url.clone(),
            filename: derive_file_name(model, version),
            subdirectory: derive_subdirectory(model, version),
            model_version_id: version.id,
            client_id,
        }
    }

    /// Starts (or restarts) status reconciliation for `version_id`. The
    /// handle yields `None` when the loop was superseded or stopped.
    pub fn track(&self, version_id: u64) -> JoinHandle<Option<ReconcileOutcome>> {
        let token = CancellationToken::new();
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        if let Some((_, previous)) = self
            .polls
            .lock()
            .expect("dispatch polls poisoned")
            .insert(version_id, (ticket, token.clone()))
        {
            previous.cancel();
        }

        let api = self.api.clone();
        let statuses = self.statuses.clone();
        let polls = self.polls.clone();
        let options = self.options;
        self.runtime.spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => None,
                outcome = reconcile(api.as_ref(), &statuses, version_id, options) => Some(outcome),
            };
            let mut polls = polls.lock().expect("dispatch polls poisoned");
            if polls.get(&version_id).map(|(current, _)| *current) == Some(ticket) {
                polls.remove(&version_id);
            }
            outcome
        })
    }

    pub fn stop_tracking(&self, version_id: u64) {
        if let Some((_, token)) = self
            .polls
            .lock()
            .expect("dispatch polls poisoned")
            .remove(&version_id)
        {
            token.cancel();
        }
    }
}

/// Polls `version_id` every `options.interval` until its reported status
/// leaves `pending` or the attempt budget runs out. Failed polls are logged
/// and still spend an attempt.
pub async fn reconcile(
    api: &dyn CatalogApi,
    statuses: &StatusBoard,
    version_id: u64,
    options: ReconcileOptions,
) -> ReconcileOutcome {
    info!("Polling client status of version {version_id}");
    for attempt in 1..=options.max_attempts {
        tokio::time::sleep(options.interval).await;
        match api.version_detail(version_id).await {
            Ok(detail) => {
                let status = ClientStatus::from_reported(detail.version.client_status.as_deref());
                debug!("Poll #{attempt} for version {version_id}: status={status:?}");
                if !matches!(status, Some(ClientStatus::Pending)) {
                    info!("Version {version_id} client status is now {status:?}");
                    statuses.set(version_id, status.clone());
                    return ReconcileOutcome::Settled(status);
                }
            }
            Err(err) => warn!("Status poll #{attempt} for version {version_id} failed: {err}"),
        }
    }
    info!(
        "Gave up polling version {version_id} after {} attempts",
        options.max_attempts
    );
    ReconcileOutcome::Exhausted {
        attempts: options.max_attempts,
    }
}

/// Name of the stored file, or `<model>_<version>` with a default extension.
pub fn derive_file_name(model: &ModelRecord, version: &VersionRecord) -> String {
    version
        .file_path
        .as_deref()
        .and_then(|path| path.rsplit(|c| c == '/' || c == '\\').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            let stem = sanitize_stem(&format!("{}_{}", model.name, version.name));
            format!("{stem}{DEFAULT_EXTENSION}")
        })
}

pub fn derive_subdirectory(model: &ModelRecord, version: &VersionRecord) -> String {
    version
        .version_type
        .as_deref()
        .filter(|kind| !kind.is_empty())
        .or_else(|| Some(model.model_type.as_str()).filter(|kind| !kind.is_empty()))
        .unwrap_or(DEFAULT_SUBDIRECTORY)
        .to_string()
}

fn sanitize_stem(raw: &str) -> String {
    raw.chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' => ch,
            _ => '_',
        })
        .collect()
}
