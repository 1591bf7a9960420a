// crates/poller/src/escalate.rs
//! Best-effort failure escalation to the reconciliation endpoint.
//!
//! Escalation exists so the credit side can reverse charges for jobs the
//! backend never confirmed as failed. It must never mask the original
//! failure: errors here are logged and swallowed.

use async_trait::async_trait;
use genwatch_types::FailureReport;
use tracing::{debug, info, warn};

/// Fire-and-forget notification of a terminal failure or timeout.
#[async_trait]
pub trait FailureEscalator: Send + Sync {
    async fn escalate(&self, report: &FailureReport);
}

/// POSTs the failure report as JSON to the reconciliation endpoint.
pub struct HttpFailureEscalator {
    client: reqwest::Client,
    url: String,
}

impl HttpFailureEscalator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl FailureEscalator for HttpFailureEscalator {
    async fn escalate(&self, report: &FailureReport) {
        info!(
            job_id = %report.job_id,
            error_type = report.error_type.as_str(),
            reason = %report.reason,
            "escalating generation failure"
        );
        match self.client.post(&self.url).json(report).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(
                    job_id = %report.job_id,
                    status = response.status().as_u16(),
                    "failure escalation rejected"
                );
            }
            Err(e) => {
                warn!(job_id = %report.job_id, error = %e, "failure escalation unreachable");
            }
        }
    }
}

/// Escalator used when no reconciliation endpoint is configured.
pub struct NoopEscalator;

#[async_trait]
impl FailureEscalator for NoopEscalator {
    async fn escalate(&self, report: &FailureReport) {
        debug!(
            job_id = %report.job_id,
            error_type = report.error_type.as_str(),
            "escalation endpoint not configured — dropping failure report"
        );
    }
}
