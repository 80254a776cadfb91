//! Fetcher: source object content for a notification

use conduit_common::{ConduitError, Result};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::Payload;
use crate::notification::Notification;
use crate::storage::ObjectStore;

pub struct Fetcher {
    store: Arc<dyn ObjectStore>,
}

impl Fetcher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Download the object named by `notification`
    ///
    /// No retries here. On failure the notification is dropped and the queue
    /// redelivers the message later.
    #[instrument(skip_all, fields(bucket = %notification.bucket(), key = %notification.key()))]
    pub async fn fetch(&self, notification: Notification) -> Result<Payload> {
        let content = self
            .store
            .get(notification.bucket(), notification.key())
            .await
            .map_err(|err| ConduitError::ObjectFetch {
                bucket: notification.bucket().to_string(),
                key: notification.key().to_string(),
                reason: format!("{err:#}"),
            })?;

        debug!("Fetched {} bytes", content.len());

        Ok(Payload {
            notification,
            content,
        })
    }
}
