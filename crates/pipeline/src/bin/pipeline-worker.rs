//! pipeline-worker: turns voter-file upload notifications into batch jobs.
//!
//! Either handles one notification from `--event-file` and prints the run
//! summary, or long-polls the configured SQS queue until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use votefile_core::config::{load_dotenv, Config};
use votefile_pipeline::aws::load_sdk_config;
use votefile_pipeline::{
    AwsBatchBackend, BatchBackend, DryRunBackend, Orchestrator, S3TagLookup, StaticTagLookup,
    TagLookup,
};
use votefile_queue::{QueueConsumer, QueueMessage, SqsConsumer};

/// Pause after a failed poll before trying again.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Submit the voter-file ETL pipeline for uploaded files.
#[derive(Parser, Debug)]
#[command(name = "pipeline-worker", version, about)]
struct Cli {
    /// Handle the notification in this JSON file, print the run and exit.
    #[arg(long)]
    event_file: Option<PathBuf>,

    /// Log jobs instead of submitting them.
    #[arg(long)]
    dry_run: bool,

    /// Treat every bucket as belonging to this jurisdiction instead of
    /// reading bucket tags.
    #[arg(long)]
    jurisdiction: Option<String>,

    #[arg(long, value_enum, env = "LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Exit after handling this many queue messages.
    #[arg(long)]
    max_messages: Option<u64>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

// ── Queue loop ──────────────────────────────────────────────────────

/// Handle one message and settle it.
///
/// Success and permanent failures are acknowledged; retriable failures go
/// back on the queue for redelivery.
async fn process_message(
    orchestrator: &Orchestrator,
    consumer: &dyn QueueConsumer,
    message: &QueueMessage,
) {
    if message.is_redelivery() {
        warn!(
            message_id = %message.id,
            receive_count = message.receive_count,
            "Notification redelivered"
        );
    }

    let settled = match orchestrator.handle_body(&message.body).await {
        Ok(run) => {
            info!(
                message_id = %message.id,
                run_id = %run.run_id,
                jobs = run.jobs.len(),
                "Notification handled"
            );
            consumer.ack(&message.receipt_handle).await
        }
        Err(e) if e.is_retriable() => {
            warn!(message_id = %message.id, error = %e, "Notification failed, returning to queue");
            consumer.nack(&message.receipt_handle).await
        }
        Err(e) => {
            error!(message_id = %message.id, error = %e, "Notification rejected");
            consumer.ack(&message.receipt_handle).await
        }
    };

    if let Err(e) = settled {
        error!(message_id = %message.id, error = %e, "Failed to settle message");
    }
}

async fn run_queue(
    orchestrator: &Orchestrator,
    consumer: &dyn QueueConsumer,
    batch_size: u32,
    max_messages: Option<u64>,
) -> anyhow::Result<()> {
    let mut handled: u64 = 0;

    loop {
        let polled = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(handled, "Shutdown requested");
                return Ok(());
            }
            polled = consumer.poll_batch(batch_size) => polled,
        };

        let messages = match polled {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "Queue poll failed");
                tokio::time::sleep(POLL_BACKOFF).await;
                continue;
            }
        };

        for message in &messages {
            process_message(orchestrator, consumer, message).await;
            handled += 1;
            if max_messages.is_some_and(|limit| handled >= limit) {
                info!(handled, "Message limit reached");
                return Ok(());
            }
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = Config::from_env();
    config.log_summary();

    let sdk = load_sdk_config(&config.aws).await;

    let tags: Arc<dyn TagLookup> = match &cli.jurisdiction {
        Some(jurisdiction) => {
            info!(%jurisdiction, "Using fixed jurisdiction for every bucket");
            Arc::new(StaticTagLookup::any_bucket(
                &config.pipeline.jurisdiction_tag,
                jurisdiction,
            ))
        }
        None => Arc::new(S3TagLookup::new(&sdk)),
    };
    let backend: Arc<dyn BatchBackend> = if cli.dry_run {
        info!("Dry run: jobs will be logged, not submitted");
        Arc::new(DryRunBackend::new())
    } else {
        Arc::new(AwsBatchBackend::new(&sdk))
    };
    let orchestrator = Orchestrator::from_config(&config, tags, backend);

    if let Some(path) = &cli.event_file {
        let body = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading event file {}", path.display()))?;
        let run = orchestrator.handle_body(&body).await?;
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    let consumer = SqsConsumer::new(&sdk, &config.queue)?;
    if let Ok(Some(depth)) = consumer.dlq_depth().await {
        if depth > 0 {
            warn!(depth, "Dead-letter queue is not empty");
        }
    }

    info!("pipeline-worker polling");
    run_queue(&orchestrator, &consumer, config.queue.max_batch_size, cli.max_messages).await?;
    info!("pipeline-worker exited cleanly");

    Ok(())
}
