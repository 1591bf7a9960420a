// crates/poller/src/lib.rs
//! Lifecycle orchestration for long-running generation jobs.
//!
//! Provides:
//! - `GenerationPoller` — owns one job at a time, drives status checks on
//!   an adaptive cadence, and emits exactly one terminal event per job
//! - `StatusTransport` / `HttpStatusTransport` — one status query, no retries
//! - `FailureEscalator` / `HttpFailureEscalator` — best-effort failure
//!   reporting to the credit-reconciliation endpoint
//! - `policy` / `guard` — pure cadence and timeout decisions

pub mod error;
pub mod escalate;
pub mod guard;
pub mod orchestrator;
pub mod policy;
pub mod state;
pub mod transport;

pub use error::PollError;
pub use escalate::{FailureEscalator, HttpFailureEscalator, NoopEscalator};
pub use orchestrator::{GenerationPoller, PollEvent, PollEventKind};
pub use state::PollingStateSnapshot;
pub use transport::{HttpStatusTransport, StatusTransport};
