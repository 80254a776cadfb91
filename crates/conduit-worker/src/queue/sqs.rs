//! Amazon SQS implementation of [`MessageQueue`]

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_sqs::Client;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{DeliveryHandle, MessageQueue, ReceivedMessage};

/// SQS refuses larger receive batches
pub const SQS_MAX_BATCH_SIZE: u32 = 10;

/// Longest visibility lease SQS accepts, twelve hours
pub const SQS_MAX_VISIBILITY_SECS: i32 = 43_200;

#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl MessageQueue for SqsQueue {
    #[instrument(level = "debug", skip(self), fields(queue = %self.queue_url))]
    async fn receive(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        // Out-of-range sizes are rejected when the pipeline is configured
        let batch = clamp_batch_size(max_messages);

        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(batch as i32)
            .visibility_timeout(visibility_secs(visibility_timeout))
            .send()
            .await
            .context("Failed to receive messages from SQS")?;

        let messages: Vec<ReceivedMessage> = response
            .messages()
            .iter()
            .filter_map(|message| {
                let (Some(body), Some(handle)) = (message.body(), message.receipt_handle()) else {
                    warn!(
                        message_id = ?message.message_id(),
                        "Skipping SQS message without body or receipt handle"
                    );
                    return None;
                };
                Some(ReceivedMessage {
                    message_id: message.message_id().unwrap_or_default().to_string(),
                    body: body.to_string(),
                    delivery_handle: DeliveryHandle::new(handle),
                })
            })
            .collect();

        debug!("Received {} messages", messages.len());

        Ok(messages)
    }

    #[instrument(skip(self, handle), fields(queue = %self.queue_url))]
    async fn delete(&self, handle: &DeliveryHandle) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(handle.as_str())
            .send()
            .await
            .context("Failed to delete message from SQS")?;

        Ok(())
    }
}

fn clamp_batch_size(requested: u32) -> u32 {
    requested.clamp(1, SQS_MAX_BATCH_SIZE)
}

/// SQS takes whole seconds; round sub-second leases up so they never become 0
/// and cap long ones at the service maximum
fn visibility_secs(timeout: Duration) -> i32 {
    let secs = timeout
        .as_secs()
        .saturating_add(u64::from(timeout.subsec_nanos() > 0));
    i32::try_from(secs)
        .unwrap_or(SQS_MAX_VISIBILITY_SECS)
        .min(SQS_MAX_VISIBILITY_SECS)
}
