//! S3 event notifications as delivered through the queue
//!
//! A queue message body is an envelope with a `Records` array. Conduit
//! processes a message only when that array holds exactly one event:
//!
//! ```json
//! { "Records": [ {
//!     "eventVersion": "2.1", "eventSource": "aws:s3", "awsRegion": "us-east-1",
//!     "eventTime": "2021-10-03T05:05:03.622Z", "eventName": "ObjectCreated:Put",
//!     "s3": { "bucket": { "name": "ingress", "arn": "arn:aws:s3:::ingress" },
//!             "object": { "key": "file.txt", "size": 59,
//!                         "eTag": "2d21a73d66fe9a154b3e7e1442e82c1c",
//!                         "sequencer": "0055AED6DCD90281E5" } } } ] }
//! ```
//!
//! A body without `Records` (S3 sends an `s3:TestEvent` when a bucket
//! notification is configured) decodes to zero events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::queue::{DeliveryHandle, ReceivedMessage};

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "Records", default)]
    records: Vec<S3Event>,
}

/// One object event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Event {
    #[serde(default)]
    pub event_version: String,
    #[serde(default)]
    pub event_source: String,
    #[serde(default)]
    pub aws_region: String,
    /// `None` when absent or not RFC 3339
    #[serde(default, deserialize_with = "lenient_event_time")]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event_name: String,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
    #[serde(default)]
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Object {
    /// Form-URL-encoded, exactly as S3 reports it
    pub key: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub e_tag: String,
    #[serde(default)]
    pub sequencer: String,
}

/// Only bucket and key are needed to process an event, so a timestamp in an
/// unexpected shape is dropped rather than rejecting the message
fn lenient_event_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|time| time.with_timezone(&Utc)))
}

/// Why a message body cannot become a [`Notification`]
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("expected exactly one record, found {0}")]
    MultipleEvents(usize),

    #[error("object key '{0}' is not valid percent-encoded UTF-8")]
    InvalidKey(String),
}

/// A decoded, single-event queue message
///
/// Carries everything the later stages need: where the source object lives
/// and the handle that acknowledges the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message_id: String,
    pub delivery_handle: DeliveryHandle,
    pub event: S3Event,
    object_key: String,
}

impl Notification {
    /// Decode a received message
    ///
    /// Returns `Ok(None)` when the body holds no events.
    pub fn decode(message: ReceivedMessage) -> Result<Option<Self>, DecodeError> {
        let envelope: EventEnvelope = serde_json::from_str(&message.body)?;
        let mut records = envelope.records;

        match records.len() {
            0 => Ok(None),
            1 => {
                let event = records.remove(0);
                let object_key = decode_object_key(&event.s3.object.key)?;
                Ok(Some(Self {
                    message_id: message.message_id,
                    delivery_handle: message.delivery_handle,
                    event,
                    object_key,
                }))
            },
            n => Err(DecodeError::MultipleEvents(n)),
        }
    }

    /// Source bucket name
    pub fn bucket(&self) -> &str {
        &self.event.s3.bucket.name
    }

    /// Source object key, URL-decoded
    pub fn key(&self) -> &str {
        &self.object_key
    }
}

/// S3 encodes keys in notifications like an HTML form: `+` is a space
fn decode_object_key(raw: &str) -> Result<String, DecodeError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|_| DecodeError::InvalidKey(raw.to_string()))
}
