//! Pipeline orchestration
//!
//! The pipeline runs `concurrency` independent lanes. A lane owns a poll
//! timer and four channels, one per hand-off between stages, and a single
//! event loop that reacts to whichever is ready first. Every unit of stage
//! work runs as its own task, so a slow fetch or transform never holds up
//! the loop or the other records.
//!
//! Lane `i` starts polling `i * poll_frequency / concurrency` after startup,
//! which spreads the lanes' polls evenly across one interval.

use conduit_common::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{
    Acknowledger, Artifact, Fetcher, Loader, Payload, Poller, Routed, Transform,
    TransformAdapter,
};
use crate::config::PipelineConfig;
use crate::notification::Notification;
use crate::queue::MessageQueue;
use crate::storage::ObjectStore;

/// The five stages, shared by every lane and every task
struct Stages {
    poller: Poller,
    fetcher: Fetcher,
    adapter: TransformAdapter,
    loader: Loader,
    acknowledger: Acknowledger,
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    stages: Arc<Stages>,
}

impl Pipeline {
    /// Wire the stages to their collaborators
    ///
    /// Fails only if `config` is invalid.
    pub fn new(
        config: PipelineConfig,
        queue: Arc<dyn MessageQueue>,
        store: Arc<dyn ObjectStore>,
        transform: Arc<dyn Transform>,
    ) -> Result<Self> {
        config.validate()?;

        let stages = Stages {
            poller: Poller::new(
                Arc::clone(&queue),
                config.batch_size,
                config.visibility_timeout,
            ),
            fetcher: Fetcher::new(Arc::clone(&store)),
            adapter: TransformAdapter::new(transform, config.empty_output),
            loader: Loader::new(store, config.egress_bucket.clone()),
            acknowledger: Acknowledger::new(queue),
        };

        Ok(Self {
            config: Arc::new(config),
            stages: Arc::new(stages),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run until `cancel` fires
    ///
    /// Returns once every lane has stopped dispatching and drained its
    /// in-flight work (or given up on it after the drain timeout).
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            lanes = self.config.concurrency,
            batch_size = self.config.batch_size,
            poll_frequency = ?self.config.poll_frequency,
            visibility_timeout = ?self.config.visibility_timeout,
            egress_bucket = %self.config.egress_bucket,
            "Starting pipeline"
        );

        let mut lanes = JoinSet::new();
        for id in 0..self.config.concurrency {
            let lane = Lane::new(
                id,
                Arc::clone(&self.config),
                Arc::clone(&self.stages),
                cancel.clone(),
            );
            lanes.spawn(lane.run().instrument(info_span!("lane", lane = id)));
        }

        while let Some(joined) = lanes.join_next().await {
            if let Err(err) = joined {
                error!("Lane task failed: {}", err);
            }
        }

        info!("Pipeline stopped");
    }
}

struct Lane {
    id: u32,
    config: Arc<PipelineConfig>,
    stages: Arc<Stages>,
    cancel: CancellationToken,
    limiter: Option<Arc<Semaphore>>,
}

impl Lane {
    fn new(
        id: u32,
        config: Arc<PipelineConfig>,
        stages: Arc<Stages>,
        cancel: CancellationToken,
    ) -> Self {
        let limiter = (config.max_in_flight > 0)
            .then(|| Arc::new(Semaphore::new(config.max_in_flight)));
        Self {
            id,
            config,
            stages,
            cancel,
            limiter,
        }
    }

    async fn run(self) {
        let (notification_tx, mut notification_rx) = mpsc::unbounded_channel::<Notification>();
        let (payload_tx, mut payload_rx) = mpsc::unbounded_channel::<Payload>();
        let (artifact_tx, mut artifact_rx) = mpsc::unbounded_channel::<Artifact>();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel::<Notification>();

        let mut tasks: JoinSet<()> = JoinSet::new();

        let offset = self.config.lane_start_offset(self.id);
        let mut ticker = interval_at(Instant::now() + offset, self.config.poll_frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(offset = ?offset, "Lane started");

        loop {
            // Polled in order: cancellation always wins, and finished tasks
            // are reaped before new work is dispatched
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                Some(joined) = tasks.join_next() => reap(joined),

                _ = ticker.tick() => {
                    let stages = Arc::clone(&self.stages);
                    let tx = notification_tx.clone();
                    self.dispatch(&mut tasks, async move {
                        match stages.poller.poll().await {
                            Ok(notifications) => {
                                for notification in notifications {
                                    forward(&tx, notification);
                                }
                            },
                            Err(err) => error!(error = %err, "Poll failed"),
                        }
                    });
                },

                Some(notification) = notification_rx.recv() => {
                    let stages = Arc::clone(&self.stages);
                    let tx = payload_tx.clone();
                    self.dispatch(&mut tasks, async move {
                        match stages.fetcher.fetch(notification).await {
                            Ok(payload) => forward(&tx, payload),
                            Err(err) => error!(error = %err, "Fetch failed"),
                        }
                    });
                },

                Some(payload) = payload_rx.recv() => {
                    let stages = Arc::clone(&self.stages);
                    let artifacts = artifact_tx.clone();
                    let acks = ack_tx.clone();
                    self.dispatch(&mut tasks, async move {
                        match stages.adapter.apply(payload).await {
                            Ok(Routed::Load(batch)) => {
                                for artifact in batch {
                                    forward(&artifacts, artifact);
                                }
                            },
                            Ok(Routed::Acknowledge(notification)) => forward(&acks, notification),
                            Ok(Routed::Retain(_)) => {},
                            Err(err) => error!(error = %err, "Transform failed"),
                        }
                    });
                },

                Some(artifact) = artifact_rx.recv() => {
                    let stages = Arc::clone(&self.stages);
                    let tx = ack_tx.clone();
                    self.dispatch(&mut tasks, async move {
                        match stages.loader.load(artifact).await {
                            Ok(Some(notification)) => forward(&tx, notification),
                            Ok(None) => {},
                            Err(err) => error!(error = %err, "Write failed"),
                        }
                    });
                },

                Some(notification) = ack_rx.recv() => {
                    let stages = Arc::clone(&self.stages);
                    self.dispatch(&mut tasks, async move {
                        if let Err(err) = stages.acknowledger.ack(notification).await {
                            warn!(error = %err, "Acknowledge failed, message will be redelivered");
                        }
                    });
                },

            }
        }

        self.drain(tasks).await;
    }

    /// Spawn one unit of stage work, bounded by the lane's limiter if any
    fn dispatch<F>(&self, tasks: &mut JoinSet<()>, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let limiter = self.limiter.clone();
        tasks.spawn(
            async move {
                let _permit = match limiter {
                    Some(limiter) => match limiter.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    },
                    None => None,
                };
                work.await;
            }
            .in_current_span(),
        );
    }

    /// Wait for dispatched work after cancellation, up to the drain timeout
    async fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            debug!("Lane stopped");
            return;
        }

        info!(in_flight = tasks.len(), "Lane stopping, waiting for in-flight work");

        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                reap(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                "Drain timeout elapsed, abandoning in-flight work"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        debug!("Lane stopped");
    }
}

/// Hand an item to the next stage of this lane
///
/// Sending only fails once the lane has stopped; the item is dropped and its
/// message is redelivered later.
fn forward<T>(tx: &mpsc::UnboundedSender<T>, item: T) {
    if tx.send(item).is_err() {
        debug!("Lane stopped, dropping hand-off");
    }
}

fn reap(joined: std::result::Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            error!("Stage task panicked: {}", err);
        }
    }
}
