use crate::{api::CatalogApi, notice::Notifier};
use log::{debug, info, warn};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DownloadStatus {
    Idle,
    Active,
    Cancelling,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DownloadOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("a download is already in progress")]
    Busy,
}

#[derive(Debug)]
struct DownloadState {
    status: DownloadStatus,
    progress: u8,
    operation: u64,
    cancelled_by_user: bool,
}

/// Tracks the single server-side download of this session.
///
/// Progress comes from polling the global progress endpoint while the
/// triggering request is in flight. Cancellation is cooperative: the
/// triggering request still runs to completion, its result is just not
/// reported.
#[derive(Clone)]
pub struct DownloadTracker {
    runtime: Handle,
    api: Arc<dyn CatalogApi>,
    state: Arc<Mutex<DownloadState>>,
    poll_interval: Duration,
    notices: Notifier,
}

/// Tears down the poll loop and returns the tracker to idle, also when the
/// `start` future is dropped before settling.
struct ActiveDownload {
    state: Arc<Mutex<DownloadState>>,
    operation: u64,
    stop: CancellationToken,
    poller: JoinHandle<()>,
}

impl Drop for ActiveDownload {
    fn drop(&mut self) {
        self.stop.cancel();
        self.poller.abort();
        if let Ok(mut state) = self.state.lock() {
            if state.operation == self.operation {
                state.status = DownloadStatus::Idle;
                state.progress = 0;
            }
        }
    }
}

impl DownloadTracker {
    pub fn new(
        runtime: Handle,
        api: Arc<dyn CatalogApi>,
        poll_interval: Duration,
        notices: Notifier,
    ) -> Self {
        Self {
            runtime,
            api,
            state: Arc::new(Mutex::new(DownloadState {
                status: DownloadStatus::Idle,
                progress: 0,
                operation: 0,
                cancelled_by_user: false,
            })),
            poll_interval,
            notices,
        }
    }

    pub fn status(&self) -> DownloadStatus {
        self.state.lock().expect("download state poisoned").status
    }

    pub fn progress(&self) -> u8 {
        self.state.lock().expect("download state poisoned").progress
    }

    /// Downloads `version_id` on the server and resolves once the server
    /// request settles.
    pub async fn start(
        &self,
        version_id: u64,
        model_id: Option<u64>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let operation = {
            let mut state = self.state.lock().expect("download state poisoned");
            if state.status != DownloadStatus::Idle {
                return Err(DownloadError::Busy);
            }
            state.status = DownloadStatus::Active;
            state.progress = 0;
            state.cancelled_by_user = false;
            state.operation += 1;
            state.operation
        };

        let stop = CancellationToken::new();
        let poller = self.runtime.spawn(poll_progress(
            self.api.clone(),
            self.state.clone(),
            operation,
            self.poll_interval,
            stop.clone(),
        ));
        let active = ActiveDownload {
            state: self.state.clone(),
            operation,
            stop,
            poller,
        };

        info!("Starting server download of version {version_id}");
        let result = self.api.sync_version(version_id, model_id, true).await;
        let cancelled = self
            .state
            .lock()
            .expect("download state poisoned")
            .cancelled_by_user;
        drop(active);

        let outcome = match result {
            _ if cancelled => {
                info!("Download of version {version_id} was cancelled");
                DownloadOutcome::Cancelled
            }
            Ok(()) => {
                info!("Download of version {version_id} completed");
                self.notices.success("Download completed");
                DownloadOutcome::Completed
            }
            Err(err) => {
                warn!("Download of version {version_id} failed: {err}");
                self.notices.danger("Download failed");
                DownloadOutcome::Failed(err.to_string())
            }
        };
        Ok(outcome)
    }

    /// Asks the server to abort the active download. Returns `false` when
    /// nothing is active. The operation counts as user-cancelled whatever
    /// the cancel request's result.
    pub async fn cancel(&self) -> bool {
        {
            let mut state = self.state.lock().expect("download state poisoned");
            if state.status != DownloadStatus::Active {
                return false;
            }
            state.status = DownloadStatus::Cancelling;
            state.cancelled_by_user = true;
        }

        match self.api.cancel_download().await {
            Ok(()) => self.notices.info("Download cancelled"),
            Err(err) => {
                warn!("Cancel request failed: {err}");
                self.notices.danger("Failed to cancel download");
            }
        }
        true
    }
}

async fn poll_progress(
    api: Arc<dyn CatalogApi>,
    state: Arc<Mutex<DownloadState>>,
    operation: u64,
    every: Duration,
    stop: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let reported = tokio::select! {
            _ = stop.cancelled() => break,
            reported = api.download_progress() => reported,
        };
        match reported {
            Ok(Some(percent)) => {
                let mut state = state.lock().expect("download state poisoned");
                if is_torn_down(&stop, &state, operation) {
                    break;
                }
                state.progress = percent.round().clamp(0.0, 100.0) as u8;
            }
            Ok(None) => {}
            Err(err) => debug!("Download progress poll failed: {err}"),
        }
    }
}

fn is_torn_down(stop: &CancellationToken, state: &DownloadState, operation: u64) -> bool {
    stop.is_cancelled()
        || state.operation != operation
        || state.status == DownloadStatus::Idle
}
