// crates/types/src/class.rs
//! Job class cadence profiles.
//!
//! A job class names a polling cadence + timeout profile. Video jobs run
//! 10–20 minutes, so they poll gently and time out late; standard image
//! jobs poll at a flat 3s and time out after 10 minutes.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Named cadence/timeout profile for a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobClass {
    /// Image-style work: flat 3s cadence, 10-minute timeout.
    Standard,
    /// Video-style work: progressive 5s/8s/10s cadence, 20-minute timeout.
    Extended,
}

impl JobClass {
    /// Resolve the class to its concrete cadence configuration.
    pub fn config(self) -> JobClassConfig {
        match self {
            // Thresholds sit past any reachable elapsed time, so the
            // interval never shifts off 3s.
            JobClass::Standard => JobClassConfig {
                initial_interval: Duration::from_secs(3),
                mid_interval: Duration::from_secs(3),
                late_interval: Duration::from_secs(3),
                mid_threshold: Duration::MAX,
                late_threshold: Duration::MAX,
                timeout: Duration::from_secs(10 * 60),
                max_poll_count: 100,
            },
            JobClass::Extended => JobClassConfig {
                initial_interval: Duration::from_secs(5),
                mid_interval: Duration::from_secs(8),
                late_interval: Duration::from_secs(10),
                mid_threshold: Duration::from_secs(30),
                late_threshold: Duration::from_secs(2 * 60),
                timeout: Duration::from_secs(20 * 60),
                max_poll_count: 200,
            },
        }
    }
}

impl FromStr for JobClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(JobClass::Standard),
            "extended" | "video" => Ok(JobClass::Extended),
            other => Err(format!("unknown job class: {other}")),
        }
    }
}

impl fmt::Display for JobClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobClass::Standard => write!(f, "standard"),
            JobClass::Extended => write!(f, "extended"),
        }
    }
}

/// Concrete cadence configuration for one job class.
///
/// Invariants: intervals are positive, thresholds are non-negative and
/// `mid_threshold <= late_threshold`. New classes can be added (or built
/// by hand for tests) without touching the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobClassConfig {
    pub initial_interval: Duration,
    pub mid_interval: Duration,
    pub late_interval: Duration,
    /// Elapsed time at which polling shifts to `mid_interval`.
    pub mid_threshold: Duration,
    /// Elapsed time at which polling shifts to `late_interval`.
    pub late_threshold: Duration,
    /// Wall-clock budget for the whole job.
    pub timeout: Duration,
    /// Hard cap on status checks, independent of the clock.
    pub max_poll_count: u32,
}

/// Caller-supplied overrides. Each field, when set, replaces the class
/// value entirely — no blending with the adaptive profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOverrides {
    /// Fixed polling interval; disables the adaptive staircase.
    pub interval: Option<Duration>,
    /// Total timeout replacing the class default.
    pub timeout: Option<Duration>,
}
