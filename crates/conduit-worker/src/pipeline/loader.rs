//! Loader: writes artifacts to the egress bucket

use conduit_common::{ConduitError, Result};
use std::sync::Arc;
use tracing::{debug, instrument};

use super::Artifact;
use crate::notification::Notification;
use crate::storage::ObjectStore;

pub struct Loader {
    store: Arc<dyn ObjectStore>,
    egress_bucket: String,
}

impl Loader {
    pub fn new(store: Arc<dyn ObjectStore>, egress_bucket: impl Into<String>) -> Self {
        Self {
            store,
            egress_bucket: egress_bucket.into(),
        }
    }

    pub fn egress_bucket(&self) -> &str {
        &self.egress_bucket
    }

    /// Write one artifact
    ///
    /// Returns the source notification once every artifact that shares it has
    /// been written, and `None` while siblings are still outstanding. A failed
    /// write means the source is never acknowledged from this delivery.
    #[instrument(skip_all, fields(bucket = %self.egress_bucket, key = %artifact.key))]
    pub async fn load(&self, artifact: Artifact) -> Result<Option<Notification>> {
        let Artifact {
            key,
            content,
            origin,
        } = artifact;

        match self.store.put(&self.egress_bucket, &key, content).await {
            Ok(receipt) => {
                debug!(
                    size = receipt.size,
                    checksum = %receipt.checksum,
                    "Wrote s3://{}/{}", receipt.bucket, receipt.key
                );
                Ok(origin.complete())
            },
            Err(err) => {
                origin.fail();
                Err(ConduitError::Write {
                    bucket: self.egress_bucket.clone(),
                    key,
                    reason: format!("{err:#}"),
                })
            },
        }
    }
}
