// crates/types/src/lib.rs
//! Shared wire and domain types for the generation polling stack.
//!
//! Everything here is plain data: job class cadence profiles, the
//! normalized status snapshot returned by the backend, and the failure
//! report posted to the reconciliation endpoint. No IO, no runtime.

pub mod class;
pub mod snapshot;

pub use class::*;
pub use snapshot::*;
