// crates/poller/src/transport.rs
//! Status transport: one query per call, no retries.
//!
//! Any non-success response is classified and raised immediately; the
//! orchestrator decides what to escalate. Retrying transient 5xx here is
//! deliberately out of scope — the reconciliation service owns recovery.

use std::time::Instant;

use async_trait::async_trait;
use genwatch_types::StatusSnapshot;
use tracing::{debug, error};

use crate::error::PollError;

/// One status query for a job id.
#[async_trait]
pub trait StatusTransport: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<StatusSnapshot, PollError>;
}

/// HTTP transport against the generation status endpoint.
///
/// Expects `GET {base_url}/{job_id}` returning either a bare
/// `StatusSnapshot` or a `{code, message, data}` envelope around one.
pub struct HttpStatusTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn status_url(&self, job_id: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), job_id)
    }
}

#[async_trait]
impl StatusTransport for HttpStatusTransport {
    async fn fetch_status(&self, job_id: &str) -> Result<StatusSnapshot, PollError> {
        let started = Instant::now();
        let response = self
            .client
            .get(self.status_url(job_id))
            .send()
            .await
            .map_err(|e| PollError::Network(e.to_string()))?;

        let status = response.status();
        let duration_ms = started.elapsed().as_millis() as u64;

        if !status.is_success() {
            error!(%job_id, status = status.as_u16(), duration_ms, "status check failed");
            return Err(PollError::from_status(status.as_u16()));
        }

        let body: serde_json::Value = response.json().await.map_err(|_| PollError::Envelope {
            message: "Invalid generation status response".to_string(),
        })?;

        let snapshot = unwrap_envelope(body)?;
        debug!(
            %job_id,
            status = ?snapshot.status,
            has_results = !snapshot.results.is_empty(),
            duration_ms,
            "status check response"
        );
        Ok(snapshot)
    }
}

/// Unwrap a generic `{code, message, data}` envelope, if present.
///
/// A non-zero code is handled like a transport failure. A zero code (or
/// no code at all) yields the inner `data` object when there is one,
/// otherwise the body itself is the snapshot.
fn unwrap_envelope(body: serde_json::Value) -> Result<StatusSnapshot, PollError> {
    if let Some(code) = body.get("code").and_then(|c| c.as_i64()) {
        if code != 0 {
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Failed to get generation status")
                .to_string();
            return Err(PollError::Envelope { message });
        }
    }

    let inner = match body.get("data") {
        Some(data) if data.is_object() => data.clone(),
        _ => body,
    };

    serde_json::from_value(inner).map_err(|_| PollError::Envelope {
        message: "Invalid generation status response".to_string(),
    })
}
