use std::{future::Future, sync::Mutex, time::Duration};
use tokio::{runtime::Handle, task::JoinHandle};

/// Trailing-edge debounce for one logical trigger.
///
/// Each `schedule` aborts the previously scheduled task, whether it is still
/// waiting out the window or already running, so at most one task from this
/// debouncer is ever alive.
#[derive(Debug)]
pub struct Debouncer {
    runtime: Handle,
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(runtime: Handle, delay: Duration) -> Self {
        Self {
            runtime,
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let mut guard = self.pending.lock().expect("debounce lock poisoned");
        if let Some(previous) = guard.take() {
            previous.abort();
        }
        *guard = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().expect("debounce lock poisoned").take() {
            previous.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .expect("debounce lock poisoned")
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.pending.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
