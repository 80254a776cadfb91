//! Notification Poller

use conduit_common::{ConduitError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::notification::Notification;
use crate::queue::MessageQueue;

/// Receives one batch per call and decodes it into notifications
pub struct Poller {
    queue: Arc<dyn MessageQueue>,
    batch_size: u32,
    visibility_timeout: Duration,
}

impl Poller {
    pub fn new(queue: Arc<dyn MessageQueue>, batch_size: u32, visibility_timeout: Duration) -> Self {
        Self {
            queue,
            batch_size,
            visibility_timeout,
        }
    }

    /// Receive and decode a batch
    ///
    /// Messages that violate the one-event schema are logged and skipped;
    /// they are not deleted, so the queue redelivers them when their lease
    /// expires. An empty batch is not an error.
    #[instrument(level = "debug", skip(self), fields(batch_size = self.batch_size))]
    pub async fn poll(&self) -> Result<Vec<Notification>> {
        let messages = self
            .queue
            .receive(self.batch_size, self.visibility_timeout)
            .await
            .map_err(|err| ConduitError::QueueReceive(format!("{err:#}")))?;

        if messages.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Polled {} messages", messages.len());

        let mut notifications = Vec::with_capacity(messages.len());
        for message in messages {
            let message_id = message.message_id.clone();
            match Notification::decode(message) {
                Ok(Some(notification)) => {
                    debug!(
                        message_id = %notification.message_id,
                        bucket = %notification.bucket(),
                        key = %notification.key(),
                        "Decoded notification"
                    );
                    notifications.push(notification);
                },
                Ok(None) => debug!(%message_id, "Message carried no records"),
                Err(err) => {
                    let err = ConduitError::Schema {
                        message_id,
                        reason: err.to_string(),
                    };
                    warn!(error = %err, "Skipping message; it will be redelivered");
                },
            }
        }

        Ok(notifications)
    }
}
