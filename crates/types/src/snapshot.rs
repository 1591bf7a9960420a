// crates/types/src/snapshot.rs
//! Normalized status snapshot and the failure escalation payload.

use serde::{Deserialize, Serialize};

/// One finished artifact reported by the generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationArtifact {
    pub image_uuid: String,
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub created_at: String,
    pub generation_uuid: String,
    pub image_index: u32,
}

/// Backend-reported job status.
///
/// Anything the backend sends that we don't recognize maps to `Unknown`
/// and is treated as "still running" — the results list, not this field,
/// is authoritative for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[serde(from = "String")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Unknown,
}

impl Default for GenerationStatus {
    fn default() -> Self {
        GenerationStatus::Unknown
    }
}

impl From<String> for GenerationStatus {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "pending" => GenerationStatus::Pending,
            "processing" => GenerationStatus::Processing,
            "completed" => GenerationStatus::Completed,
            "failed" => GenerationStatus::Failed,
            _ => GenerationStatus::Unknown,
        }
    }
}

/// Normalized result of one status query.
///
/// Queue-position and priority-lane fields are opaque passthrough for
/// display; the orchestrator never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub status: GenerationStatus,
    /// Non-empty results mean the job is done, whatever `status` says.
    #[serde(default)]
    pub results: Vec<GenerationArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_in_queue: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_wait_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_priority_lane: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_used: Option<u32>,
}

impl StatusSnapshot {
    /// Best human-readable failure reason the backend gave us.
    pub fn failure_message(&self) -> String {
        self.error_message
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "Generation failed".to_string())
    }
}

/// Wire classification of a failure, consumed by the reconciliation
/// endpoint to decide whether credits get reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Non-2xx / non-zero-code status response.
    PollingError,
    /// No response at all (transport-level failure).
    NetworkError,
    /// Wall-clock or poll-count guard breach.
    PollingTimeout,
    /// Backend-confirmed failure; already authoritative, never escalated.
    GenerationFailed,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::PollingError => "polling_error",
            ErrorType::NetworkError => "network_error",
            ErrorType::PollingTimeout => "polling_timeout",
            ErrorType::GenerationFailed => "generation_failed",
        }
    }
}

/// Payload posted to the failure reconciliation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    #[serde(rename = "generation_uuid")]
    pub job_id: String,
    pub reason: String,
    pub error_type: ErrorType,
}
