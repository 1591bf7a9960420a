// crates/poller/src/state.rs
//! Observable polling state for the active job.
//!
//! Lock-free atomics (plus a RwLock for the error string) so the poll
//! loop and the elapsed ticker never contend with readers.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Internal mutable state, owned by the orchestrator. Reset on every job
/// (re)start and zeroed on stop; at most one is live per poller.
pub(crate) struct PollingState {
    is_polling: AtomicBool,
    elapsed_ms: AtomicU64,
    poll_count: AtomicU32,
    current_interval_ms: AtomicU64,
    last_error: RwLock<Option<String>>,
    started_at: RwLock<Option<String>>,
}

impl PollingState {
    pub(crate) fn new() -> Self {
        Self {
            is_polling: AtomicBool::new(false),
            elapsed_ms: AtomicU64::new(0),
            poll_count: AtomicU32::new(0),
            current_interval_ms: AtomicU64::new(0),
            last_error: RwLock::new(None),
            started_at: RwLock::new(None),
        }
    }

    /// Arm the state for a fresh job.
    pub(crate) fn start(&self, initial_interval: Duration) {
        self.is_polling.store(true, Ordering::Relaxed);
        self.elapsed_ms.store(0, Ordering::Relaxed);
        self.poll_count.store(0, Ordering::Relaxed);
        self.current_interval_ms
            .store(initial_interval.as_millis() as u64, Ordering::Relaxed);
        self.set_last_error(None);
        match self.started_at.write() {
            Ok(mut guard) => *guard = Some(chrono::Utc::now().to_rfc3339()),
            Err(e) => tracing::error!("RwLock poisoned writing started_at: {e}"),
        }
    }

    /// Zero everything except `last_error`, which survives for display
    /// until the next start. Safe to call repeatedly.
    pub(crate) fn stop(&self) {
        self.is_polling.store(false, Ordering::Relaxed);
        self.elapsed_ms.store(0, Ordering::Relaxed);
        self.poll_count.store(0, Ordering::Relaxed);
        self.current_interval_ms.store(0, Ordering::Relaxed);
        match self.started_at.write() {
            Ok(mut guard) => *guard = None,
            Err(e) => tracing::error!("RwLock poisoned writing started_at: {e}"),
        }
    }

    pub(crate) fn set_elapsed(&self, elapsed: Duration) {
        self.elapsed_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub(crate) fn set_poll_count(&self, count: u32) {
        self.poll_count.store(count, Ordering::Relaxed);
    }

    pub(crate) fn set_current_interval(&self, interval: Duration) {
        self.current_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    pub(crate) fn set_last_error(&self, error: Option<String>) {
        match self.last_error.write() {
            Ok(mut guard) => *guard = error,
            Err(e) => tracing::error!("RwLock poisoned writing last_error: {e}"),
        }
    }

    pub(crate) fn snapshot(&self) -> PollingStateSnapshot {
        PollingStateSnapshot {
            is_polling: self.is_polling.load(Ordering::Relaxed),
            elapsed: Duration::from_millis(self.elapsed_ms.load(Ordering::Relaxed)),
            poll_count: self.poll_count.load(Ordering::Relaxed),
            current_interval: Duration::from_millis(
                self.current_interval_ms.load(Ordering::Relaxed),
            ),
            last_error: match self.last_error.read() {
                Ok(guard) => guard.clone(),
                Err(e) => {
                    tracing::error!("RwLock poisoned reading last_error: {e}");
                    None
                }
            },
            started_at: match self.started_at.read() {
                Ok(guard) => guard.clone(),
                Err(e) => {
                    tracing::error!("RwLock poisoned reading started_at: {e}");
                    None
                }
            },
        }
    }
}

/// Read-only view of the active job's polling state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingStateSnapshot {
    pub is_polling: bool,
    pub elapsed: Duration,
    pub poll_count: u32,
    pub current_interval: Duration,
    pub last_error: Option<String>,
    /// RFC 3339 timestamp of the current job's start, if one is live.
    pub started_at: Option<String>,
}
