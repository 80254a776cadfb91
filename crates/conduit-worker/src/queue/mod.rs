//! Notification queue seam
//!
//! The pipeline needs two operations from its queue: receive a batch of
//! messages under a visibility lease, and delete a message once its record
//! has been written. Redelivery after the lease expires is the queue's job
//! and the only retry mechanism the pipeline relies on.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub mod sqs;

pub use sqs::SqsQueue;

/// Opaque token that acknowledges one received message instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryHandle(String);

impl DeliveryHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A raw message as returned by [`MessageQueue::receive`]
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: String,
    pub delivery_handle: DeliveryHandle,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Receive up to `max_messages`, hiding them from other consumers for
    /// `visibility_timeout`. An empty batch is a normal outcome.
    async fn receive(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>>;

    /// Permanently remove the message behind `handle`
    async fn delete(&self, handle: &DeliveryHandle) -> Result<()>;
}
