//! Error types for Conduit
//!
//! Only [`ConduitError::Config`] is fatal. Every other variant describes a
//! failure scoped to a single record, which is logged and left
//! unacknowledged so the queue redelivers it.

use thiserror::Error;

/// Result type alias for Conduit operations
pub type Result<T> = std::result::Result<T, ConduitError>;

/// Main error type for Conduit
#[derive(Error, Debug)]
pub enum ConduitError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema violation in message {message_id}: {reason}")]
    Schema { message_id: String, reason: String },

    #[error("Queue receive failed: {0}")]
    QueueReceive(String),

    #[error("Failed to fetch s3://{bucket}/{key}: {reason}")]
    ObjectFetch {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("Transform failed for s3://{bucket}/{key}: {reason}")]
    Transform {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("Failed to write s3://{bucket}/{key}: {reason}")]
    Write {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("Failed to acknowledge message {message_id}: {reason}")]
    Ack { message_id: String, reason: String },
}

impl ConduitError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
