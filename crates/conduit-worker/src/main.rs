//! Conduit Worker - Main entry point

use anyhow::Result;
use clap::Parser;
use conduit_common::logging::{init_logging, LogConfig, LogLevel};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use conduit_worker::{
    aws::AwsConnectionConfig,
    config::{EmptyOutputPolicy, PipelineConfig, PipelineOverrides},
    pipeline::{transform::prefix_content, Pipeline},
    S3Store, SqsQueue,
};

/// Poll S3 event notifications from SQS, transform each object and write the
/// result to the egress bucket
///
/// Every option falls back to its `CONDUIT_*` environment variable, then to a
/// built-in default.
#[derive(Parser, Debug)]
#[command(name = "conduit-worker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Messages to request per poll (1-10) [env: CONDUIT_BATCH_SIZE]
    #[arg(long)]
    batch_size: Option<u32>,

    /// Milliseconds between polls of one lane [env: CONDUIT_POLL_FREQUENCY]
    #[arg(long)]
    poll_frequency_ms: Option<u64>,

    /// Seconds a received message stays hidden [env: CONDUIT_VISIBILITY_TIMEOUT]
    #[arg(long)]
    visibility_timeout_secs: Option<u64>,

    /// Number of independent polling lanes [env: CONDUIT_CONCURRENCY]
    #[arg(long)]
    concurrency: Option<u32>,

    /// Queue to poll [env: CONDUIT_QUEUE_URL]
    #[arg(long)]
    queue_url: Option<String>,

    /// Bucket outputs are written to [env: CONDUIT_S3_EGRESS_BUCKET]
    #[arg(long)]
    egress_bucket: Option<String>,

    /// Cap on concurrently running stage tasks per lane, 0 for none [env: CONDUIT_MAX_IN_FLIGHT]
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Acknowledge messages whose transform produced no output
    #[arg(long)]
    drop_empty: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> PipelineOverrides {
        PipelineOverrides {
            batch_size: self.batch_size,
            poll_frequency_ms: self.poll_frequency_ms,
            visibility_timeout_secs: self.visibility_timeout_secs,
            concurrency: self.concurrency,
            queue_url: self.queue_url.clone(),
            egress_bucket: self.egress_bucket.clone(),
            max_in_flight: self.max_in_flight,
            empty_output: self.drop_empty.then_some(EmptyOutputPolicy::Acknowledge),
            drain_timeout_secs: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env may carry LOG_* as well as CONDUIT_* variables
    dotenvy::dotenv().ok();

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(level)
        .log_file_prefix("conduit-worker")
        .filter_directives("aws_config=warn,aws_smithy_runtime=warn")
        .build()
        .merge_env(|name| std::env::var(name).ok())?;

    let _guard = init_logging(&log_config)?;

    info!("Starting Conduit worker");

    let config = PipelineConfig::load(cli.overrides())?;
    let aws = AwsConnectionConfig::from_env();

    let queue = SqsQueue::new(aws.sqs_client().await, config.queue_url.clone());
    let store = S3Store::new(aws.s3_client().await);

    let pipeline = Pipeline::new(
        config,
        Arc::new(queue),
        Arc::new(store),
        Arc::new(prefix_content("FOO ")),
    )?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    pipeline.run(cancel).await;

    info!("Conduit worker stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
