//! Object store seam and its S3 implementation

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{primitives::ByteStream, Client};
use conduit_common::checksum::sha256_hex;
use tracing::{debug, info, instrument};

/// What a successful write reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    pub bucket: String,
    pub key: String,
    pub checksum: String,
    pub size: u64,
}

impl WriteReceipt {
    pub fn for_content(bucket: &str, key: &str, content: &[u8]) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            checksum: sha256_hex(content),
            size: content.len() as u64,
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Overwrites any existing object under `key`
    async fn put(&self, bucket: &str, key: &str, content: Vec<u8>) -> Result<WriteReceipt>;
}

#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        debug!("Downloading from s3://{}/{}", bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download from S3: {}", key))?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read S3 response body")?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), bucket, key);

        Ok(data)
    }

    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn put(&self, bucket: &str, key: &str, content: Vec<u8>) -> Result<WriteReceipt> {
        let receipt = WriteReceipt::for_content(bucket, key, &content);

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(content))
            .send()
            .await
            .with_context(|| format!("Failed to upload to S3: {}", key))?;

        info!("Successfully uploaded to s3://{}/{}", bucket, key);

        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_receipt_for_content() {
        let receipt = WriteReceipt::for_content("egress", "out-file.txt", b"Hello, World!");
        assert_eq!(receipt.bucket, "egress");
        assert_eq!(receipt.key, "out-file.txt");
        assert_eq!(receipt.size, 13);
        assert_eq!(
            receipt.checksum,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }
}
