//! AWS client bootstrap shared by the SQS and S3 collaborators

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, info};

pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for both AWS clients
///
/// `endpoint` points the SDK at LocalStack or MinIO during development.
/// Static credentials are optional; without them the default provider chain
/// (environment, profile, IMDS, ...) is used.
#[derive(Clone, Serialize, Deserialize)]
pub struct AwsConnectionConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl std::fmt::Debug for AwsConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("static_credentials", &self.access_key.is_some())
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl AwsConnectionConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("CONDUIT_AWS_ENDPOINT").ok().filter(|v| !v.is_empty()),
            region: env::var("AWS_REGION")
                .or_else(|_| env::var("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            access_key: env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_key: env::var("AWS_SECRET_ACCESS_KEY").ok(),
            path_style: env::var("CONDUIT_S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    /// LocalStack with its well-known test credentials
    pub fn for_localstack(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_REGION.to_string(),
            access_key: Some("test".to_string()),
            secret_key: Some("test".to_string()),
            path_style: true,
        }
    }

    pub async fn load(&self) -> SdkConfig {
        debug!("Loading AWS configuration: {:?}", self);

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(self.region.clone()));

        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        if let (Some(access_key), Some(secret_key)) = (&self.access_key, &self.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "conduit-static",
            ));
        }

        loader.load().await
    }

    pub async fn s3_client(&self) -> aws_sdk_s3::Client {
        let sdk_config = self.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.path_style)
            .build();

        info!(region = %self.region, endpoint = ?self.endpoint, "S3 client initialized");
        aws_sdk_s3::Client::from_conf(s3_config)
    }

    pub async fn sqs_client(&self) -> aws_sdk_sqs::Client {
        let sdk_config = self.load().await;

        info!(region = %self.region, endpoint = ?self.endpoint, "SQS client initialized");
        aws_sdk_sqs::Client::new(&sdk_config)
    }
}
