// crates/poller/src/policy.rs
//! Adaptive polling interval policy.
//!
//! Pure function of the class config, the caller override, and elapsed
//! time. The orchestrator re-evaluates it on every tick, so the interval
//! shifts as the job crosses the mid/late thresholds.

use std::time::Duration;

use genwatch_types::JobClassConfig;

/// Interval to wait before the next status check.
///
/// A caller-supplied fixed interval always wins; otherwise the staircase
/// is late ≥ `late_threshold`, mid ≥ `mid_threshold`, else initial.
pub fn next_interval(
    config: &JobClassConfig,
    override_interval: Option<Duration>,
    elapsed: Duration,
) -> Duration {
    if let Some(fixed) = override_interval {
        return fixed;
    }
    if elapsed >= config.late_threshold {
        config.late_interval
    } else if elapsed >= config.mid_threshold {
        config.mid_interval
    } else {
        config.initial_interval
    }
}
