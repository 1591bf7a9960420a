// crates/poller/src/error.rs
//! Error taxonomy for one status check.
//!
//! None of these are retried: every variant is terminal for the current
//! job and escalated at most once.

use genwatch_types::ErrorType;
use thiserror::Error;

/// Failure raised by a single status query.
#[derive(Debug, Error)]
pub enum PollError {
    /// Non-2xx status response, sub-classified by code.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// 2xx response wrapping a non-zero envelope code, or an unreadable
    /// body. Handled like a transport failure.
    #[error("{message}")]
    Envelope { message: String },

    /// No response at all.
    #[error("Network error: {0}")]
    Network(String),
}

impl PollError {
    /// Build the classified error for a non-2xx status response.
    pub fn from_status(status: u16) -> Self {
        let message = match status {
            400 => "Generation failed due to harmful content",
            404 => "Generation task not found",
            s if s >= 500 => "Server error occurred during generation",
            _ => "Generation failed",
        };
        PollError::Http {
            status,
            message: message.to_string(),
        }
    }

    /// Wire classification for the failure escalation payload.
    pub fn error_type(&self) -> ErrorType {
        match self {
            PollError::Http { .. } => ErrorType::PollingError,
            PollError::Envelope { .. } | PollError::Network(_) => ErrorType::NetworkError,
        }
    }

    /// Reason string for the failure escalation payload. Carries the
    /// status code or underlying error text so the reconciliation side
    /// can tell failure modes apart.
    pub fn escalation_reason(&self) -> String {
        match self {
            PollError::Http { status, message } => format!("Status {status}: {message}"),
            PollError::Envelope { message } => format!("Network error: {message}"),
            PollError::Network(detail) => format!("Network error: {detail}"),
        }
    }
}
