//! Drain-pass drivers.
//!
//! Both drivers idle without spinning: with nothing outstanding they wait for
//! a wake signal (bounded by `idle_timeout`), and while operations are in
//! flight they back off by `poll_interval` after every pass that fired nothing.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::PollingConfig;
use crate::registry::Registry;

/// Dedicated driver thread for background polling.
pub(crate) struct BackgroundDriver {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl BackgroundDriver {
    pub(crate) fn spawn(registry: Arc<Registry>, config: &PollingConfig) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let poll_interval = config.poll_interval;
        let idle_timeout = config.idle_timeout;

        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                tracing::debug!("Background polling driver started");
                while !stop_flag.load(Ordering::Acquire) {
                    let fired = registry.drain_pass();
                    if registry.is_empty() {
                        thread::park_timeout(idle_timeout);
                    } else if fired == 0 {
                        backoff(poll_interval);
                    }
                }
                tracing::debug!("Background polling driver stopped");
            })?;

        Ok(Self { handle, stop })
    }

    /// Cut an idle park short after new work was registered.
    pub(crate) fn wake(&self) {
        self.handle.thread().unpark();
    }

    pub(crate) fn stop(self) {
        self.stop.store(true, Ordering::Release);
        self.handle.thread().unpark();

        // The last scope can be released by a continuation running on the
        // driver thread itself; that thread exits on its own.
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            tracing::error!("Background polling driver panicked");
        }
    }
}

fn backoff(interval: Duration) {
    if interval.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(interval);
    }
}

/// Driver task on the caller's tokio runtime for cooperative polling.
pub(crate) struct CooperativeDriver {
    cancel: CancellationToken,
}

impl CooperativeDriver {
    /// Returns `None` when no tokio runtime is running on this thread.
    pub(crate) fn spawn(
        registry: Arc<Registry>,
        wake: Arc<Notify>,
        config: &PollingConfig,
    ) -> Option<Self> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let poll_interval = config.poll_interval;
        let idle_timeout = config.idle_timeout;

        runtime.spawn(async move {
            tracing::debug!("Cooperative polling driver started");
            loop {
                let fired = registry.drain_pass();
                if registry.is_empty() {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = wake.notified() => {}
                        _ = tokio::time::sleep(idle_timeout) => {}
                    }
                } else if fired == 0 {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = pause(poll_interval) => {}
                    }
                } else if token.is_cancelled() {
                    break;
                } else {
                    tokio::task::yield_now().await;
                }
            }
            tracing::debug!("Cooperative polling driver stopped");
        });

        Some(Self { cancel })
    }

    pub(crate) fn stop(self) {
        self.cancel.cancel();
    }
}

async fn pause(interval: Duration) {
    if interval.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(interval).await;
    }
}
