//! The staged pipeline
//!
//! ```text
//! Poller ──Notification──▶ Fetcher ──Payload──▶ TransformAdapter ──Artifact──▶ Loader ──Notification──▶ Acknowledger
//! ```
//!
//! Each arrow is an unbounded channel owned by a lane (see [`orchestrator`]).
//! Items move through the channels by value, so exactly one stage holds a
//! record at any time. A record that fails anywhere before the Acknowledger
//! is simply dropped: its message stays on the queue and comes back once the
//! visibility lease runs out.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::notification::Notification;

pub mod acknowledger;
pub mod fetcher;
pub mod loader;
pub mod orchestrator;
pub mod poller;
pub mod transform;

pub use acknowledger::Acknowledger;
pub use fetcher::Fetcher;
pub use loader::Loader;
pub use orchestrator::Pipeline;
pub use poller::Poller;
pub use transform::{Output, Routed, Transform, TransformAdapter};

/// A notification together with the content of the object it names
#[derive(Debug, Clone)]
pub struct Payload {
    pub notification: Notification,
    pub content: Vec<u8>,
}

impl Payload {
    /// Content as text, with invalid UTF-8 replaced
    pub fn content_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// Tracks the outstanding writes of one payload
///
/// All artifacts produced from a payload share one `Origin`. The notification
/// is released for acknowledgement only when the last of them has been
/// written and none failed.
#[derive(Debug)]
pub struct Origin {
    notification: Notification,
    pending: AtomicUsize,
    failed: AtomicBool,
}

impl Origin {
    fn new(notification: Notification, pending: usize) -> Self {
        Self {
            notification,
            pending: AtomicUsize::new(pending),
            failed: AtomicBool::new(false),
        }
    }

    pub fn notification(&self) -> &Notification {
        &self.notification
    }

    /// Record one successful write; yields the notification on the last one
    fn complete(&self) -> Option<Notification> {
        let last = self.pending.fetch_sub(1, Ordering::AcqRel) == 1;
        (last && !self.failed.load(Ordering::Acquire)).then(|| self.notification.clone())
    }

    /// Record one failed write; the notification will never be released
    fn fail(&self) {
        self.failed.store(true, Ordering::Release);
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One transform output on its way to the egress bucket
#[derive(Debug)]
pub struct Artifact {
    pub key: String,
    pub content: Vec<u8>,
    origin: Arc<Origin>,
}

impl Artifact {
    /// Attach `notification` as the shared origin of every output
    pub fn fan_out(notification: Notification, outputs: Vec<Output>) -> Vec<Artifact> {
        let origin = Arc::new(Origin::new(notification, outputs.len()));
        outputs
            .into_iter()
            .map(|output| Artifact {
                key: output.key,
                content: output.content,
                origin: Arc::clone(&origin),
            })
            .collect()
    }

    pub fn notification(&self) -> &Notification {
        self.origin.notification()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::queue::{DeliveryHandle, ReceivedMessage};

    fn notification() -> Notification {
        let body = r#"{ "Records": [ { "s3": { "bucket": { "name": "ingress" }, "object": { "key": "file.txt" } } } ] }"#;
        Notification::decode(ReceivedMessage {
            message_id: "m-1".to_string(),
            body: body.to_string(),
            delivery_handle: DeliveryHandle::new("handle-1"),
        })
        .unwrap()
        .unwrap()
    }

    fn outputs(n: usize) -> Vec<Output> {
        (0..n)
            .map(|i| Output::new(format!("out-{i}"), format!("part {i}")))
            .collect()
    }

    #[test]
    fn test_single_artifact_releases_on_write() {
        let mut artifacts = Artifact::fan_out(notification(), outputs(1));
        let artifact = artifacts.pop().unwrap();
        assert_eq!(artifact.notification().key(), "file.txt");
        assert_eq!(artifact.origin.complete().unwrap().message_id, "m-1");
    }

    #[test]
    fn test_last_of_many_releases_once() {
        let artifacts = Artifact::fan_out(notification(), outputs(3));
        let released: Vec<_> = artifacts
            .iter()
            .map(|artifact| artifact.origin.complete())
            .collect();
        assert!(released[0].is_none());
        assert!(released[1].is_none());
        assert!(released[2].is_some());
    }

    #[test]
    fn test_any_failure_withholds_release() {
        let artifacts = Artifact::fan_out(notification(), outputs(3));
        assert!(artifacts[0].origin.complete().is_none());
        artifacts[1].origin.fail();
        assert!(artifacts[2].origin.complete().is_none());
    }

    #[test]
    fn test_failure_on_last_write_withholds_release() {
        let artifacts = Artifact::fan_out(notification(), outputs(2));
        assert!(artifacts[0].origin.complete().is_none());
        artifacts[1].origin.fail();
        assert_eq!(artifacts[0].origin.pending.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_content_str_is_lossy() {
        let payload = Payload {
            notification: notification(),
            content: vec![b'h', b'i', 0xFF],
        };
        assert_eq!(payload.content_str(), "hi\u{FFFD}");
    }
}
