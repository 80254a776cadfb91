//! Acknowledger: deletes fully processed messages

use conduit_common::{ConduitError, Result};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::notification::Notification;
use crate::queue::MessageQueue;

pub struct Acknowledger {
    queue: Arc<dyn MessageQueue>,
}

impl Acknowledger {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }

    /// Delete the message behind `notification`
    ///
    /// A failure here leaves the outputs written and the message on the
    /// queue; the redelivery rewrites the same keys.
    #[instrument(skip_all, fields(message_id = %notification.message_id))]
    pub async fn ack(&self, notification: Notification) -> Result<()> {
        self.queue
            .delete(&notification.delivery_handle)
            .await
            .map_err(|err| ConduitError::Ack {
                message_id: notification.message_id.clone(),
                reason: format!("{err:#}"),
            })?;

        info!(
            bucket = %notification.bucket(),
            key = %notification.key(),
            "Processed and acknowledged"
        );
        Ok(())
    }
}
