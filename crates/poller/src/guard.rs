// crates/poller/src/guard.rs
//! Timeout guard: wall-clock and poll-count limits for one job.

use std::time::Duration;

/// Effective limits for the active job, after overrides are applied.
#[derive(Debug, Clone, Copy)]
pub struct PollLimits {
    pub timeout: Duration,
    pub max_poll_count: u32,
}

/// True once either limit is exhausted. The poll-count cap bounds cost
/// even under clock anomalies or unexpectedly fast ticking.
pub fn is_breached(limits: &PollLimits, elapsed: Duration, poll_count: u32) -> bool {
    elapsed >= limits.timeout || poll_count > limits.max_poll_count
}

/// Reason string reported when the wall clock ran out.
pub fn clock_breach_reason(limits: &PollLimits) -> String {
    let minutes = (limits.timeout.as_secs_f64() / 60.0).round() as u64;
    format!("Generation timeout after {minutes} minutes")
}

/// Reason string reported when the check budget ran out first.
pub fn count_breach_reason(poll_count: u32) -> String {
    format!("Polling limit exceeded after {poll_count} checks")
}
