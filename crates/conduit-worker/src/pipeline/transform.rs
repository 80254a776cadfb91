//! Caller-supplied transform and the stage that runs it

use conduit_common::{ConduitError, Result};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{Artifact, Payload};
use crate::config::EmptyOutputPolicy;
use crate::notification::Notification;

/// One output object: egress key plus content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub key: String,
    pub content: Vec<u8>,
}

impl Output {
    pub fn new(key: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            content: content.into(),
        }
    }
}

/// Turns one payload into zero or more outputs
///
/// Runs on the blocking pool, so it may do CPU-heavy or synchronous work.
/// It must be safe to call concurrently. An error drops the payload; the
/// source message is redelivered later.
pub trait Transform: Send + Sync + 'static {
    fn transform(&self, payload: &Payload) -> anyhow::Result<Vec<Output>>;
}

impl<F> Transform for F
where
    F: Fn(&Payload) -> anyhow::Result<Vec<Output>> + Send + Sync + 'static,
{
    fn transform(&self, payload: &Payload) -> anyhow::Result<Vec<Output>> {
        self(payload)
    }
}

/// Adapter for transforms that always yield exactly one output
pub struct Single<F>(F);

/// Wrap a one-output function as a [`Transform`]
pub fn single<F>(f: F) -> Single<F>
where
    F: Fn(&Payload) -> anyhow::Result<Output> + Send + Sync + 'static,
{
    Single(f)
}

impl<F> Transform for Single<F>
where
    F: Fn(&Payload) -> anyhow::Result<Output> + Send + Sync + 'static,
{
    fn transform(&self, payload: &Payload) -> anyhow::Result<Vec<Output>> {
        (self.0)(payload).map(|output| vec![output])
    }
}

/// Prepend `prefix` to the content and write it under `out-<source key>`
pub fn prefix_content(prefix: impl Into<String>) -> impl Transform {
    let prefix = prefix.into();
    single(move |payload: &Payload| {
        let mut content = Vec::with_capacity(prefix.len() + payload.content.len());
        content.extend_from_slice(prefix.as_bytes());
        content.extend_from_slice(&payload.content);
        Ok(Output::new(
            format!("out-{}", payload.notification.key()),
            content,
        ))
    })
}

/// Where a payload goes after its transform ran
#[derive(Debug)]
pub enum Routed {
    /// Outputs to write; the source is acknowledged after the last write
    Load(Vec<Artifact>),
    /// No outputs and the policy says the source is done
    Acknowledge(Notification),
    /// No outputs and the policy keeps the source on the queue
    Retain(Notification),
}

pub struct TransformAdapter {
    transform: Arc<dyn Transform>,
    empty_output: EmptyOutputPolicy,
}

impl TransformAdapter {
    pub fn new(transform: Arc<dyn Transform>, empty_output: EmptyOutputPolicy) -> Self {
        Self {
            transform,
            empty_output,
        }
    }

    /// Run the transform off the async workers and route the result
    ///
    /// A panic inside the transform is caught by the blocking pool and
    /// reported like any other transform error.
    #[instrument(skip_all, fields(bucket = %payload.notification.bucket(), key = %payload.notification.key()))]
    pub async fn apply(&self, payload: Payload) -> Result<Routed> {
        let bucket = payload.notification.bucket().to_string();
        let key = payload.notification.key().to_string();
        let transform = Arc::clone(&self.transform);

        let joined = tokio::task::spawn_blocking(move || {
            let outputs = transform.transform(&payload);
            (payload.notification, outputs)
        })
        .await;

        let (notification, outputs) = match joined {
            Ok((notification, Ok(outputs))) => (notification, outputs),
            Ok((_, Err(err))) => {
                return Err(ConduitError::Transform {
                    bucket,
                    key,
                    reason: format!("{err:#}"),
                })
            },
            Err(join_err) => {
                return Err(ConduitError::Transform {
                    bucket,
                    key,
                    reason: format!("transform did not complete: {join_err}"),
                })
            },
        };

        Ok(self.route(notification, outputs))
    }

    fn route(&self, notification: Notification, outputs: Vec<Output>) -> Routed {
        if !outputs.is_empty() {
            debug!("Transform produced {} outputs", outputs.len());
            return Routed::Load(Artifact::fan_out(notification, outputs));
        }

        match self.empty_output {
            EmptyOutputPolicy::Acknowledge => {
                debug!("Transform produced no outputs, acknowledging source");
                Routed::Acknowledge(notification)
            },
            EmptyOutputPolicy::Retain => {
                info!("Transform produced no outputs, leaving source on the queue");
                Routed::Retain(notification)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::queue::{DeliveryHandle, ReceivedMessage};

    fn payload(content: &str) -> Payload {
        let body = r#"{ "Records": [ { "s3": { "bucket": { "name": "ingress" }, "object": { "key": "file.txt" } } } ] }"#;
        let notification = Notification::decode(ReceivedMessage {
            message_id: "m-1".to_string(),
            body: body.to_string(),
            delivery_handle: DeliveryHandle::new("handle-1"),
        })
        .unwrap()
        .unwrap();
        Payload {
            notification,
            content: content.as_bytes().to_vec(),
        }
    }

    fn adapter<T: Transform>(transform: T, policy: EmptyOutputPolicy) -> TransformAdapter {
        TransformAdapter::new(Arc::new(transform), policy)
    }

    #[tokio::test]
    async fn test_single_output_is_loaded() {
        let adapter = adapter(
            single(|p: &Payload| {
                Ok(Output::new(
                    format!("out-{}", p.notification.key()),
                    format!("FOO {}", p.content_str()),
                ))
            }),
            EmptyOutputPolicy::Retain,
        );

        match adapter.apply(payload("hello")).await.unwrap() {
            Routed::Load(artifacts) => {
                assert_eq!(artifacts.len(), 1);
                assert_eq!(artifacts[0].key, "out-file.txt");
                assert_eq!(artifacts[0].content, b"FOO hello");
                assert_eq!(artifacts[0].notification().message_id, "m-1");
            },
            other => panic!("unexpected routing: {:?}", other),
        }
    }

    #[test]
    fn test_prefix_content_is_deterministic() {
        let transform = prefix_content("FOO ");
        let first = transform.transform(&payload("hello")).unwrap();
        let second = transform.transform(&payload("hello")).unwrap();
        assert_eq!(first, vec![Output::new("out-file.txt", "FOO hello")]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_closure_returning_many_outputs() {
        let adapter = adapter(
            |p: &Payload| -> anyhow::Result<Vec<Output>> {
                Ok(p.content_str()
                    .split(',')
                    .enumerate()
                    .map(|(i, part)| Output::new(format!("part-{i}"), part))
                    .collect())
            },
            EmptyOutputPolicy::Retain,
        );

        match adapter.apply(payload("a,b,c")).await.unwrap() {
            Routed::Load(artifacts) => {
                let keys: Vec<_> = artifacts.iter().map(|a| a.key.as_str()).collect();
                assert_eq!(keys, vec!["part-0", "part-1", "part-2"]);
            },
            other => panic!("unexpected routing: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_output_policies() {
        let empty = |_: &Payload| -> anyhow::Result<Vec<Output>> { Ok(Vec::new()) };

        let retained = adapter(empty, EmptyOutputPolicy::Retain)
            .apply(payload("x"))
            .await
            .unwrap();
        assert!(matches!(retained, Routed::Retain(_)));

        let acknowledged = adapter(empty, EmptyOutputPolicy::Acknowledge)
            .apply(payload("x"))
            .await
            .unwrap();
        assert!(matches!(acknowledged, Routed::Acknowledge(_)));
    }

    #[tokio::test]
    async fn test_error_is_reported_with_location() {
        let adapter = adapter(
            |_: &Payload| -> anyhow::Result<Vec<Output>> { anyhow::bail!("bad input") },
            EmptyOutputPolicy::Retain,
        );

        let err = adapter.apply(payload("x")).await.unwrap_err();
        assert!(matches!(err, ConduitError::Transform { .. }));
        assert_eq!(
            err.to_string(),
            "Transform failed for s3://ingress/file.txt: bad input"
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let adapter = adapter(
            |_: &Payload| -> anyhow::Result<Vec<Output>> { panic!("boom") },
            EmptyOutputPolicy::Retain,
        );

        let err = adapter.apply(payload("x")).await.unwrap_err();
        assert!(matches!(err, ConduitError::Transform { .. }));
    }
}
