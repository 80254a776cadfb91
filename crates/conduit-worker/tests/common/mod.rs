//! In-memory collaborators for pipeline tests
//!
//! `MemoryQueue` and `MemoryStore` share a [`Journal`] so tests can assert on
//! the order of calls across both (a put must precede its delete).

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use conduit_worker::config::{EmptyOutputPolicy, PipelineConfig};
use conduit_worker::pipeline::Pipeline;
use conduit_worker::queue::{DeliveryHandle, MessageQueue, ReceivedMessage};
use conduit_worker::storage::{ObjectStore, WriteReceipt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const INGRESS: &str = "ingress";
pub const EGRESS: &str = "egress";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Receive { max: u32, at: Instant },
    Get { bucket: String, key: String },
    Put { bucket: String, key: String, content: Vec<u8> },
    Delete { handle: String },
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    fn record(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn receives(&self) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Receive { at, .. } => Some(at),
                _ => None,
            })
            .collect()
    }

    pub fn gets(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Get { key, .. } => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn puts(&self) -> Vec<(String, String, Vec<u8>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Put {
                    bucket,
                    key,
                    content,
                } => Some((bucket, key, content)),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete { handle } => Some(handle),
                _ => None,
            })
            .collect()
    }

    /// Position of the first call matching `pred`
    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(pred)
    }
}

/// Queue that hands out pushed messages once each
///
/// There is no lease expiry: a message that is never deleted is simply
/// never seen again.
#[derive(Default)]
pub struct MemoryQueue {
    journal: Journal,
    pending: Mutex<VecDeque<ReceivedMessage>>,
    failing_receives: AtomicUsize,
    failing_deletes: AtomicUsize,
    next_id: AtomicUsize,
}

impl MemoryQueue {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    /// Enqueue `body`; returns its delivery handle
    pub fn push(&self, body: impl Into<String>) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = format!("handle-{n}");
        self.pending.lock().unwrap().push_back(ReceivedMessage {
            message_id: format!("message-{n}"),
            body: body.into(),
            delivery_handle: DeliveryHandle::new(handle.clone()),
        });
        handle
    }

    /// Make the next `n` receives fail without handing out messages
    pub fn fail_receives(&self, n: usize) {
        self.failing_receives.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` deletes fail
    pub fn fail_deletes(&self, n: usize) {
        self.failing_deletes.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn receive(
        &self,
        max_messages: u32,
        _visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        self.journal.record(Call::Receive {
            max: max_messages,
            at: Instant::now(),
        });
        if take_failure(&self.failing_receives) {
            return Err(anyhow!("queue endpoint unavailable"));
        }
        let mut pending = self.pending.lock().unwrap();
        let take = pending.len().min(max_messages as usize);
        Ok(pending.drain(..take).collect())
    }

    async fn delete(&self, handle: &DeliveryHandle) -> Result<()> {
        self.journal.record(Call::Delete {
            handle: handle.as_str().to_string(),
        });
        if take_failure(&self.failing_deletes) {
            return Err(anyhow!("receipt handle {} is invalid", handle.as_str()));
        }
        Ok(())
    }
}

/// Consume one injected failure, if any are left
fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
pub struct MemoryStore {
    journal: Journal,
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    failing_puts: Mutex<HashSet<String>>,
    put_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    pub fn insert(&self, bucket: &str, key: &str, content: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), content.into());
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Writes to `key` in any bucket fail
    pub fn fail_put(&self, key: &str) {
        self.failing_puts.lock().unwrap().insert(key.to_string());
    }

    /// Every put sleeps for `delay` before completing
    pub fn delay_puts(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.journal.record(Call::Get {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.object(bucket, key)
            .ok_or_else(|| anyhow!("NoSuchKey: s3://{}/{}", bucket, key))
    }

    async fn put(&self, bucket: &str, key: &str, content: Vec<u8>) -> Result<WriteReceipt> {
        let delay = *self.put_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_puts.lock().unwrap().contains(key) {
            return Err(anyhow!("AccessDenied: s3://{}/{}", bucket, key));
        }
        let receipt = WriteReceipt::for_content(bucket, key, &content);
        self.journal.record(Call::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content: content.clone(),
        });
        self.insert(bucket, key, content);
        Ok(receipt)
    }
}

/// S3 event notification body with a single record
pub fn event_body(bucket: &str, key: &str) -> String {
    format!(
        r#"{{
  "Records": [
    {{
      "eventVersion": "2.1",
      "eventSource": "aws:s3",
      "awsRegion": "us-east-1",
      "eventTime": "2024-01-15T10:30:00.000Z",
      "eventName": "ObjectCreated:Put",
      "s3": {{
        "bucket": {{ "name": "{bucket}", "arn": "arn:aws:s3:::{bucket}" }},
        "object": {{ "key": "{key}", "size": 5, "eTag": "5d41402abc4b2a76b9719d911017c592", "sequencer": "0065A5D1B8C2A3F4E1" }}
      }}
    }}
  ]
}}"#
    )
}

/// Body carrying `n` copies of the same record
pub fn multi_event_body(bucket: &str, key: &str, n: usize) -> String {
    let record = format!(
        r#"{{ "s3": {{ "bucket": {{ "name": "{bucket}" }}, "object": {{ "key": "{key}" }} }} }}"#
    );
    format!(r#"{{ "Records": [{}] }}"#, vec![record; n].join(","))
}

/// Settings suited to the in-memory collaborators: fast polling, short drain
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        batch_size: 10,
        poll_frequency: Duration::from_millis(10),
        visibility_timeout: Duration::from_secs(10),
        concurrency: 1,
        queue_url: "memory://ingress".to_string(),
        egress_bucket: EGRESS.to_string(),
        max_in_flight: 0,
        empty_output: EmptyOutputPolicy::Retain,
        drain_timeout: Duration::from_secs(1),
    }
}

pub struct Harness {
    pub journal: Journal,
    pub queue: Arc<MemoryQueue>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        let journal = Journal::default();
        Self {
            queue: Arc::new(MemoryQueue::new(journal.clone())),
            store: Arc::new(MemoryStore::new(journal.clone())),
            journal,
        }
    }

    pub fn pipeline<T: conduit_worker::Transform>(
        &self,
        config: PipelineConfig,
        transform: T,
    ) -> Pipeline {
        Pipeline::new(
            config,
            self.queue.clone(),
            self.store.clone(),
            Arc::new(transform),
        )
        .expect("test config is valid")
    }

    /// Start `pipeline` in the background
    pub fn start(&self, pipeline: Pipeline) -> Running {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { pipeline.run(token).await });
        Running { cancel, handle }
    }

    /// Poll the journal until `pred` holds; false after five seconds
    pub async fn wait_for(&self, pred: impl Fn(&Journal) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if pred(&self.journal) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        pred(&self.journal)
    }
}

pub struct Running {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl Running {
    /// Cancel and wait for every lane to stop
    pub async fn stop(self) {
        self.cancel.cancel();
        self.handle.await.expect("pipeline task panicked");
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn into_handle(self) -> tokio::task::JoinHandle<()> {
        self.handle
    }
}
