//! The worker's own lifecycle state.
//!
//! The only state shared between requests: whether the worker is active, when
//! it last saw traffic, and how many downloads are in flight right now. Every
//! manifest, fetch and stream belongs to exactly one request.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct WorkerContext {
    active: AtomicBool,
    last_activity: Mutex<Instant>,
    downloads: AtomicUsize,
}

/// One download in flight, from the moment it is intercepted until its
/// archive stream ends or the request is dropped.
#[must_use]
pub struct DownloadGuard {
    context: Arc<WorkerContext>,
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        self.context.downloads.fetch_sub(1, Ordering::SeqCst);
        self.context.touch();
    }
}

impl WorkerContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            downloads: AtomicUsize::new(0),
        })
    }

    /// Mark the worker ready to intercept requests
    pub fn activate(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            info!("Worker activated");
        }
        self.touch();
    }

    pub fn deactivate(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            info!("Worker deactivated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Record activity (intercepted request or keepalive)
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_activity.lock() {
            *last = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// Count a download as in flight until the guard is dropped
    pub fn download_started(self: &Arc<Self>) -> DownloadGuard {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.touch();
        DownloadGuard {
            context: self.clone(),
        }
    }

    /// Downloads between interception and the end of their archive
    pub fn downloads_in_flight(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

/// Deactivate the worker and cancel `shutdown` once it has been idle for
/// `timeout` with no download in flight.
pub fn spawn_idle_watchdog(
    context: Arc<WorkerContext>,
    timeout: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let tick = (timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            if context.downloads_in_flight() == 0 && context.idle_for() >= timeout {
                info!("No activity for {:?}, shutting down", timeout);
                context.deactivate();
                shutdown.cancel();
                break;
            }
        }
    })
}
