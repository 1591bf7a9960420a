// crates/cli/src/main.rs
//! `genwatch` binary.
//!
//! Watches one generation job to its terminal state and streams lifecycle
//! events to stdout. Exit code 0 means the job completed; anything else
//! means it failed, timed out, or the watch was interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use genwatch_poller::{
    FailureEscalator, GenerationPoller, HttpFailureEscalator, HttpStatusTransport, NoopEscalator,
    PollEventKind,
};
use genwatch_types::{JobClass, PollOverrides};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "genwatch", about = "Watch a generation job until it finishes")]
struct Args {
    /// Base URL of the status endpoint (job id is appended).
    #[arg(long)]
    endpoint: String,

    /// Generation job id to watch.
    #[arg(long)]
    job_id: String,

    /// Job class: standard or extended.
    #[arg(long, default_value = "standard")]
    class: String,

    /// Fixed polling interval in ms, replacing the adaptive cadence.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Total timeout in ms, replacing the class default.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Failure reconciliation endpoint. Omit to disable escalation.
    #[arg(long)]
    escalation_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let class: JobClass = match args.class.parse() {
        Ok(class) => class,
        Err(e) => bail!(e),
    };
    let overrides = PollOverrides {
        interval: args.interval_ms.map(Duration::from_millis),
        timeout: args.timeout_ms.map(Duration::from_millis),
    };

    let transport = Arc::new(HttpStatusTransport::new(args.endpoint));
    let escalator: Arc<dyn FailureEscalator> = match args.escalation_url {
        Some(url) => Arc::new(HttpFailureEscalator::new(url)),
        None => Arc::new(NoopEscalator),
    };

    let poller = GenerationPoller::new(transport, escalator);
    let mut events = poller.subscribe();
    poller.start(&args.job_id, class.config(), overrides);

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                // Missing a few status updates is fine; the terminal
                // event is always the newest and stays in the buffer.
                warn!(skipped, "lagged behind status updates");
                continue;
            }
            Err(RecvError::Closed) => bail!("event channel closed"),
        };
        match event.kind {
            PollEventKind::StatusUpdate(snapshot) => {
                let queue = match (snapshot.queue_position, snapshot.total_in_queue) {
                    (Some(pos), Some(total)) => format!(" (queue {pos}/{total})"),
                    (Some(pos), None) => format!(" (queue #{pos})"),
                    _ => String::new(),
                };
                println!("[{}] {:?}{queue}", event.job_id, snapshot.status);
            }
            PollEventKind::Completed(results) => {
                println!("[{}] completed with {} artifact(s)", event.job_id, results.len());
                for artifact in results {
                    println!("  {}", artifact.image_url);
                }
                return Ok(());
            }
            PollEventKind::Failed { message } => {
                bail!("generation failed: {message}");
            }
            PollEventKind::TimedOut { message } => {
                bail!("generation timed out: {message}");
            }
        }
    }
}
