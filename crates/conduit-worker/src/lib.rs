//! Conduit Worker
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! A queue-driven object pipeline: poll an SQS queue for S3 event
//! notifications, fetch each object, run a caller-supplied transform, write
//! the outputs to an egress bucket, then delete the message.
//!
//! # Overview
//!
//! - **Configuration**: [`config::PipelineConfig`], resolved from explicit
//!   values, then `CONDUIT_*` environment variables, then defaults
//! - **Collaborators**: [`queue::MessageQueue`] and [`storage::ObjectStore`],
//!   with SQS and S3 implementations
//! - **Pipeline**: five stages wired into lanes by [`pipeline::Pipeline`]
//!
//! Delivery is at-least-once. A message is deleted only after every output
//! derived from it has been written; anything that fails earlier is left on
//! the queue and redelivered once its visibility timeout expires.
//!
//! # Example
//!
//! ```no_run
//! use conduit_worker::aws::AwsConnectionConfig;
//! use conduit_worker::config::{PipelineConfig, PipelineOverrides};
//! use conduit_worker::pipeline::{transform::prefix_content, Pipeline};
//! use conduit_worker::{S3Store, SqsQueue};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = PipelineConfig::load(PipelineOverrides::default())?;
//! let aws = AwsConnectionConfig::from_env();
//! let queue = SqsQueue::new(aws.sqs_client().await, config.queue_url.clone());
//! let store = S3Store::new(aws.s3_client().await);
//!
//! let pipeline = Pipeline::new(
//!     config,
//!     Arc::new(queue),
//!     Arc::new(store),
//!     Arc::new(prefix_content("FOO ")),
//! )?;
//! pipeline.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

pub mod aws;
pub mod config;
pub mod notification;
pub mod pipeline;
pub mod queue;
pub mod storage;

// Re-export commonly used types
pub use config::{EmptyOutputPolicy, PipelineConfig, PipelineOverrides};
pub use notification::Notification;
pub use pipeline::{Output, Payload, Pipeline, Transform};
pub use queue::{MessageQueue, SqsQueue};
pub use storage::{ObjectStore, S3Store, WriteReceipt};
