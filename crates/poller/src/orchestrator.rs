// crates/poller/src/orchestrator.rs
//! The job lifecycle state machine.
//!
//! A `GenerationPoller` owns one job at a time. Starting a job tears down
//! any prior one, runs an immediate status check, then re-arms a single
//! self-rescheduling sleep whose length comes from the interval policy —
//! exactly one timer is armed at any instant, so the double-arming race
//! of interval-swapping schedulers cannot occur.
//!
//! Terminal guarantee: at most one of `Completed` / `Failed` / `TimedOut`
//! is emitted per job lifecycle, enforced by a per-job atomic flag that
//! both the worker and `stop()` contend on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use genwatch_types::{
    ErrorType, FailureReport, GenerationArtifact, GenerationStatus, JobClassConfig, PollOverrides,
    StatusSnapshot,
};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::escalate::FailureEscalator;
use crate::guard::{self, PollLimits};
use crate::policy;
use crate::state::{PollingState, PollingStateSnapshot};
use crate::transport::StatusTransport;

/// Event emitted to subscribers.
#[derive(Debug, Clone)]
pub struct PollEvent {
    pub job_id: String,
    pub kind: PollEventKind,
}

/// What happened on a tick. `StatusUpdate` may fire any number of times
/// while polling; the other three are terminal and fire exactly once.
#[derive(Debug, Clone)]
pub enum PollEventKind {
    StatusUpdate(StatusSnapshot),
    Completed(Vec<GenerationArtifact>),
    Failed { message: String },
    TimedOut { message: String },
}

impl PollEventKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollEventKind::StatusUpdate(_))
    }
}

struct ActiveJob {
    job_id: String,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

/// Supervises one generation job's observable lifecycle.
///
/// Construction takes the transport and escalator as trait objects so
/// tests (and alternate backends) can inject their own.
pub struct GenerationPoller {
    transport: Arc<dyn StatusTransport>,
    escalator: Arc<dyn FailureEscalator>,
    events_tx: broadcast::Sender<PollEvent>,
    state: RwLock<Arc<PollingState>>,
    active: Mutex<Option<ActiveJob>>,
}

impl GenerationPoller {
    pub fn new(transport: Arc<dyn StatusTransport>, escalator: Arc<dyn FailureEscalator>) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            transport,
            escalator,
            events_tx,
            state: RwLock::new(Arc::new(PollingState::new())),
            active: Mutex::new(None),
        }
    }

    /// Subscribe to status updates and the terminal outcome.
    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.events_tx.subscribe()
    }

    /// Read-only view of the active job's polling state.
    pub fn state(&self) -> PollingStateSnapshot {
        match self.state.read() {
            Ok(guard) => guard.snapshot(),
            Err(e) => {
                tracing::error!("RwLock poisoned reading polling state: {e}");
                Arc::new(PollingState::new()).snapshot()
            }
        }
    }

    pub fn is_polling(&self) -> bool {
        self.state().is_polling
    }

    /// Start polling a job, replacing any job currently being polled.
    ///
    /// The prior job (if any) is stopped first — unconditionally and
    /// idempotently — so no event from it can fire once reassignment
    /// begins. An immediate status check runs before the first sleep.
    pub fn start(&self, job_id: impl Into<String>, config: JobClassConfig, overrides: PollOverrides) {
        let job_id = job_id.into();
        self.stop();

        let limits = PollLimits {
            timeout: overrides.timeout.unwrap_or(config.timeout),
            max_poll_count: config.max_poll_count,
        };
        let initial_interval = policy::next_interval(&config, overrides.interval, Duration::ZERO);

        info!(
            %job_id,
            initial_interval_ms = initial_interval.as_millis() as u64,
            timeout_ms = limits.timeout.as_millis() as u64,
            max_poll_count = limits.max_poll_count,
            "starting generation polling"
        );

        let state = Arc::new(PollingState::new());
        state.start(initial_interval);
        match self.state.write() {
            Ok(mut guard) => *guard = Arc::clone(&state),
            Err(e) => tracing::error!("RwLock poisoned writing polling state: {e}"),
        }

        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        match self.active.lock() {
            Ok(mut guard) => {
                *guard = Some(ActiveJob {
                    job_id: job_id.clone(),
                    cancel: cancel.clone(),
                    finished: Arc::clone(&finished),
                });
            }
            Err(e) => tracing::error!("Mutex poisoned storing active job: {e}"),
        }

        // Cosmetic 1s ticker, independent of the polling cadence.
        tokio::spawn(run_ticker(Arc::clone(&state), cancel.clone()));

        let worker = PollWorker {
            job_id,
            config,
            overrides,
            limits,
            transport: Arc::clone(&self.transport),
            escalator: Arc::clone(&self.escalator),
            events_tx: self.events_tx.clone(),
            state,
            cancel,
            finished,
        };
        tokio::spawn(worker.run());
    }

    /// Stop the active job, if any. Idempotent; fires no event.
    pub fn stop(&self) {
        let job = match self.active.lock() {
            Ok(mut guard) => guard.take(),
            Err(e) => {
                tracing::error!("Mutex poisoned taking active job: {e}");
                None
            }
        };
        if let Some(job) = job {
            // Order matters: mark finished before cancelling so an
            // in-flight tick that already resolved cannot emit.
            job.finished.store(true, Ordering::SeqCst);
            job.cancel.cancel();
            info!(job_id = %job.job_id, "stopping generation polling");
        }
        match self.state.read() {
            Ok(guard) => guard.stop(),
            Err(e) => tracing::error!("RwLock poisoned reading polling state: {e}"),
        }
    }
}

impl Drop for GenerationPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Updates the elapsed field once a second for display purposes.
async fn run_ticker(state: Arc<PollingState>, cancel: CancellationToken) {
    let started = Instant::now();
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tick.tick() => state.set_elapsed(started.elapsed()),
        }
    }
}

struct PollWorker {
    job_id: String,
    config: JobClassConfig,
    overrides: PollOverrides,
    limits: PollLimits,
    transport: Arc<dyn StatusTransport>,
    escalator: Arc<dyn FailureEscalator>,
    events_tx: broadcast::Sender<PollEvent>,
    state: Arc<PollingState>,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl PollWorker {
    async fn run(self) {
        let started = Instant::now();
        let mut poll_count: u32 = 0;

        loop {
            // Guard first: a breached clock means no further checks.
            if guard::is_breached(&self.limits, started.elapsed(), poll_count) {
                self.timed_out(guard::clock_breach_reason(&self.limits)).await;
                return;
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                res = self.transport.fetch_status(&self.job_id) => res,
            };
            if self.finished.load(Ordering::SeqCst) {
                // Superseded while the query was in flight; drop the
                // late-arriving response.
                return;
            }

            poll_count += 1;
            self.state.set_poll_count(poll_count);

            match result {
                Err(err) => {
                    self.escalator
                        .escalate(&FailureReport {
                            job_id: self.job_id.clone(),
                            reason: err.escalation_reason(),
                            error_type: err.error_type(),
                        })
                        .await;
                    self.finish(PollEventKind::Failed {
                        message: err.to_string(),
                    });
                    return;
                }
                Ok(snapshot) => {
                    // Non-empty results win over whatever `status` says;
                    // the backend can populate results before flipping
                    // status to "completed".
                    if !snapshot.results.is_empty() {
                        self.finish(PollEventKind::Completed(snapshot.results));
                        return;
                    }
                    match snapshot.status {
                        GenerationStatus::Completed => {
                            self.finish(PollEventKind::Completed(Vec::new()));
                            return;
                        }
                        GenerationStatus::Failed => {
                            // Backend-confirmed failure: authoritative,
                            // no escalation.
                            self.finish(PollEventKind::Failed {
                                message: snapshot.failure_message(),
                            });
                            return;
                        }
                        _ => {
                            let _ = self.events_tx.send(PollEvent {
                                job_id: self.job_id.clone(),
                                kind: PollEventKind::StatusUpdate(snapshot),
                            });
                        }
                    }
                }
            }

            // Count cap is checked here too so a breach stops the job
            // now rather than after one more interval.
            if poll_count > self.limits.max_poll_count {
                warn!(job_id = %self.job_id, poll_count, "poll count exceeded limit, forcing stop");
                self.timed_out(guard::count_breach_reason(poll_count)).await;
                return;
            }

            let interval =
                policy::next_interval(&self.config, self.overrides.interval, started.elapsed());
            self.state.set_current_interval(interval);

            // Single-shot re-arm: exactly one timer exists per job.
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn timed_out(&self, reason: String) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        self.escalator
            .escalate(&FailureReport {
                job_id: self.job_id.clone(),
                reason: reason.clone(),
                error_type: ErrorType::PollingTimeout,
            })
            .await;
        self.finish(PollEventKind::TimedOut { message: reason });
    }

    /// Emit the terminal event exactly once, then tear everything down.
    fn finish(&self, kind: PollEventKind) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        match &kind {
            PollEventKind::Failed { message } | PollEventKind::TimedOut { message } => {
                warn!(job_id = %self.job_id, %message, "generation polling finished with failure");
                self.state.set_last_error(Some(message.clone()));
            }
            PollEventKind::Completed(results) => {
                info!(job_id = %self.job_id, result_count = results.len(), "generation completed");
            }
            PollEventKind::StatusUpdate(_) => {}
        }
        let _ = self.events_tx.send(PollEvent {
            job_id: self.job_id.clone(),
            kind,
        });
        self.state.stop();
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    use crate::error::PollError;

    fn processing() -> StatusSnapshot {
        serde_json::from_str(r#"{"status":"processing"}"#).unwrap()
    }

    fn artifact(uuid: &str) -> GenerationArtifact {
        GenerationArtifact {
            image_uuid: uuid.to_string(),
            image_url: format!("https://cdn.test/{uuid}.png"),
            thumbnail_url: None,
            created_at: "2026-08-27T00:00:00Z".to_string(),
            generation_uuid: "gen-1".to_string(),
            image_index: 0,
        }
    }

    /// Transport returning a scripted sequence, then "processing" forever.
    /// Records every job id it was asked about.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<StatusSnapshot, PollError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<StatusSnapshot, PollError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusTransport for ScriptedTransport {
        async fn fetch_status(&self, job_id: &str) -> Result<StatusSnapshot, PollError> {
            self.calls.lock().unwrap().push(job_id.to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(processing()))
        }
    }

    #[derive(Default)]
    struct RecordingEscalator {
        reports: Mutex<Vec<FailureReport>>,
    }

    impl RecordingEscalator {
        fn reports(&self) -> Vec<FailureReport> {
            self.reports.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FailureEscalator for RecordingEscalator {
        async fn escalate(&self, report: &FailureReport) {
            self.reports.lock().unwrap().push(report.clone());
        }
    }

    fn fast_config() -> JobClassConfig {
        JobClassConfig {
            initial_interval: Duration::from_millis(10),
            mid_interval: Duration::from_millis(10),
            late_interval: Duration::from_millis(10),
            mid_threshold: Duration::MAX,
            late_threshold: Duration::MAX,
            timeout: Duration::from_secs(60),
            max_poll_count: 100,
        }
    }

    fn poller(
        transport: Arc<ScriptedTransport>,
    ) -> (GenerationPoller, Arc<RecordingEscalator>) {
        let escalator = Arc::new(RecordingEscalator::default());
        (
            GenerationPoller::new(transport, Arc::clone(&escalator) as Arc<dyn FailureEscalator>),
            escalator,
        )
    }

    async fn next_terminal(rx: &mut broadcast::Receiver<PollEvent>) -> PollEvent {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if event.kind.is_terminal() {
                return event;
            }
        }
    }

    /// Drain anything already buffered; used to prove nothing fired after
    /// a terminal event.
    async fn drain(rx: &mut broadcast::Receiver<PollEvent>) -> Vec<PollEvent> {
        tokio::task::yield_now().await;
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => out.push(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_then_completed_with_artifact() {
        let mut done = processing();
        done.status = GenerationStatus::Completed;
        done.results = vec![artifact("img-a")];

        let transport = ScriptedTransport::new(vec![
            Ok(processing()),
            Ok(processing()),
            Ok(processing()),
            Ok(done),
        ]);
        let (poller, escalator) = poller(Arc::clone(&transport));
        let mut rx = poller.subscribe();

        poller.start("gen-1", fast_config(), PollOverrides::default());

        let mut updates = 0;
        let terminal = loop {
            let event = rx.recv().await.unwrap();
            match event.kind {
                PollEventKind::StatusUpdate(_) => updates += 1,
                other => break other,
            }
        };

        match terminal {
            PollEventKind::Completed(results) => {
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].image_uuid, "img-a");
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(updates, 3);
        assert_eq!(transport.calls().len(), 4);
        assert!(!poller.is_polling());
        assert!(escalator.reports().is_empty());
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_win_over_processing_status() {
        let mut racy = processing();
        racy.results = vec![artifact("img-b")];

        let transport = ScriptedTransport::new(vec![Ok(racy)]);
        let (poller, _) = poller(transport);
        let mut rx = poller.subscribe();

        poller.start("gen-2", fast_config(), PollOverrides::default());

        let event = next_terminal(&mut rx).await;
        assert!(matches!(event.kind, PollEventKind::Completed(ref r) if r.len() == 1));
        assert!(drain(&mut rx).await.is_empty());
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_status_with_no_results() {
        let mut done = processing();
        done.status = GenerationStatus::Completed;

        let transport = ScriptedTransport::new(vec![Ok(done)]);
        let (poller, _) = poller(transport);
        let mut rx = poller.subscribe();

        poller.start("gen-3", fast_config(), PollOverrides::default());

        let event = next_terminal(&mut rx).await;
        assert!(matches!(event.kind, PollEventKind::Completed(ref r) if r.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_fails_without_retry() {
        let transport = ScriptedTransport::new(vec![Err(PollError::from_status(500))]);
        let (poller, escalator) = poller(Arc::clone(&transport));
        let mut rx = poller.subscribe();

        poller.start("gen-4", fast_config(), PollOverrides::default());

        let event = next_terminal(&mut rx).await;
        match event.kind {
            PollEventKind::Failed { message } => {
                assert_eq!(message, "Server error occurred during generation");
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        let reports = escalator.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error_type, ErrorType::PollingError);
        assert!(reports[0].reason.to_lowercase().contains("server error"));
        assert_eq!(reports[0].job_id, "gen-4");

        // No retry and no further checks scheduled.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.calls().len(), 1);
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failed_is_not_escalated() {
        let failed: StatusSnapshot = serde_json::from_str(
            r#"{"status":"failed","error_message":"prompt rejected"}"#,
        )
        .unwrap();

        let transport = ScriptedTransport::new(vec![Ok(failed)]);
        let (poller, escalator) = poller(transport);
        let mut rx = poller.subscribe();

        poller.start("gen-5", fast_config(), PollOverrides::default());

        let event = next_terminal(&mut rx).await;
        assert!(matches!(event.kind, PollEventKind::Failed { ref message } if message == "prompt rejected"));
        assert!(escalator.reports().is_empty());
        assert_eq!(poller.state().last_error.as_deref(), Some("prompt rejected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_exactly_once() {
        let transport = ScriptedTransport::new(vec![]); // processing forever
        let (poller, escalator) = poller(transport);
        let mut rx = poller.subscribe();

        let overrides = PollOverrides {
            interval: Some(Duration::from_millis(100)),
            timeout: Some(Duration::from_secs(1)),
        };
        let started = Instant::now();
        poller.start("gen-6", fast_config(), overrides);

        let event = next_terminal(&mut rx).await;
        assert!(matches!(event.kind, PollEventKind::TimedOut { .. }));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(!poller.is_polling());

        let reports = escalator.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error_type, ErrorType::PollingTimeout);

        // Nothing else fires afterwards.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(drain(&mut rx)
            .await
            .iter()
            .all(|e| !e.kind.is_terminal()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_count_cap_forces_stop() {
        let transport = ScriptedTransport::new(vec![]); // processing forever
        let (poller, escalator) = poller(Arc::clone(&transport));
        let mut rx = poller.subscribe();

        let mut config = fast_config();
        config.max_poll_count = 3;
        poller.start("gen-7", config, PollOverrides::default());

        let event = next_terminal(&mut rx).await;
        match event.kind {
            PollEventKind::TimedOut { message } => {
                assert!(message.contains("Polling limit exceeded"), "{message}");
            }
            other => panic!("expected TimedOut, got {other:?}"),
        }

        // The cap trips on the first check past the limit.
        assert_eq!(transport.calls().len(), 4);
        assert_eq!(escalator.reports().len(), 1);
        assert_eq!(escalator.reports()[0].error_type, ErrorType::PollingTimeout);
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reassignment_silences_old_job() {
        let transport = ScriptedTransport::new(vec![]); // processing forever
        let (poller, _) = poller(Arc::clone(&transport));
        let mut rx = poller.subscribe();

        poller.start("job-a", fast_config(), PollOverrides::default());

        // Let job A tick at least once.
        loop {
            let event = rx.recv().await.unwrap();
            if event.job_id == "job-a" {
                break;
            }
        }

        poller.start("job-b", fast_config(), PollOverrides::default());
        let calls_at_swap = transport.calls().len();

        tokio::time::sleep(Duration::from_secs(1)).await;

        // Every check after the swap belongs to job B.
        let calls = transport.calls();
        assert!(calls.len() > calls_at_swap);
        assert!(calls[calls_at_swap..].iter().all(|id| id == "job-b"));

        // And every event delivered after the swap references job B.
        poller.stop();
        let stale: Vec<_> = drain(&mut rx)
            .await
            .into_iter()
            .skip_while(|e| e.job_id == "job-a")
            .filter(|e| e.job_id == "job-a")
            .collect();
        assert!(stale.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lagged_subscriber_still_sees_terminal_event() {
        let transport = ScriptedTransport::new(vec![]); // processing forever
        let (poller, _) = poller(transport);
        let mut rx = poller.subscribe();

        // ~100 updates before the timeout — more than the channel
        // buffers, so a consumer that wakes up late must lag.
        let overrides = PollOverrides {
            interval: Some(Duration::from_millis(10)),
            timeout: Some(Duration::from_secs(1)),
        };
        poller.start("gen-lag", fast_config(), overrides);

        // Don't consume anything until the job is long over.
        tokio::time::sleep(Duration::from_secs(2)).await;

        let mut lagged = false;
        let terminal = loop {
            match rx.recv().await {
                Ok(event) if event.kind.is_terminal() => break event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => lagged = true,
                Err(broadcast::error::RecvError::Closed) => panic!("channel closed"),
            }
        };

        // Lagging drops old status updates, never the newest event.
        assert!(lagged);
        assert!(matches!(terminal.kind, PollEventKind::TimedOut { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_stop_is_a_no_op() {
        let transport = ScriptedTransport::new(vec![]);
        let (poller, escalator) = poller(transport);
        let mut rx = poller.subscribe();

        poller.start("gen-8", fast_config(), PollOverrides::default());
        tokio::time::sleep(Duration::from_millis(50)).await;

        poller.stop();
        poller.stop();

        assert!(!poller.is_polling());
        assert_eq!(poller.state().poll_count, 0);

        // Cancellation fires no terminal callback.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(drain(&mut rx).await.iter().all(|e| !e.kind.is_terminal()));
        assert!(escalator.reports().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_is_immediate() {
        let transport = ScriptedTransport::new(vec![]);
        let (poller, _) = poller(Arc::clone(&transport));
        let mut rx = poller.subscribe();

        let mut config = fast_config();
        config.initial_interval = Duration::from_secs(30);

        let before = Instant::now();
        poller.start("gen-9", config, PollOverrides::default());
        rx.recv().await.unwrap();

        // The first status update arrived well before one interval.
        assert!(before.elapsed() < Duration::from_secs(30));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_override_reflected_in_state() {
        let transport = ScriptedTransport::new(vec![]);
        let (poller, _) = poller(transport);
        let mut rx = poller.subscribe();

        let overrides = PollOverrides {
            interval: Some(Duration::from_millis(250)),
            timeout: None,
        };
        poller.start("gen-10", fast_config(), overrides);
        rx.recv().await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(poller.state().current_interval, Duration::from_millis(250));
        assert!(poller.is_polling());
        assert_eq!(poller.state().poll_count, 1);
    }
}
