//! Queue consumer loop.
//!
//! Long-polls the message source and dispatches each message to a worker,
//! bounded by a semaphore sized `max_concurrent_messages`.  A message is
//! received only when a worker slot is free; acks happen only after the
//! worker declares a terminal outcome, so a crash mid-message redelivers.
//!
//! While a message is in flight its visibility is re-extended every half
//! timeout.  When the batcher's pending bytes sit above the high-water mark
//! (80 % of `max_batch_bytes`) the loop pauses receives for the configured
//! cool-down instead of pulling more work.

use crate::config::QueueConfig;
use crate::metrics::PipelineMetrics;
use crate::worker::{self, WorkerContext, WorkerOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use wt_protocol::ports::{MessageSource, QueueMessage};

/// Receive pause after a failed receive call.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct Consumer {
    source: Arc<dyn MessageSource>,
    ctx: WorkerContext,
    cfg: QueueConfig,
    metrics: Arc<PipelineMetrics>,
    /// Pending-bytes level above which receives pause.
    high_water_bytes: u64,
    /// In-flight worker budget at shutdown.
    processing_drain: Duration,
}

impl Consumer {
    pub fn new(
        source: Arc<dyn MessageSource>,
        ctx: WorkerContext,
        cfg: QueueConfig,
        metrics: Arc<PipelineMetrics>,
        max_batch_bytes: usize,
        processing_drain: Duration,
    ) -> Self {
        Consumer {
            source,
            ctx,
            cfg,
            metrics,
            high_water_bytes: (max_batch_bytes as u64) * 8 / 10,
            processing_drain,
        }
    }

    /// Run until `shutdown` flips true, then drain in-flight workers within
    /// the processing-drain budget.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrent_messages));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let wait = Duration::from_secs(self.cfg.wait_seconds);
        let visibility = Duration::from_secs(self.cfg.visibility_timeout_s);
        let cooldown = Duration::from_millis(self.cfg.backpressure_cooldown_ms);

        loop {
            if *shutdown.borrow() {
                break;
            }
            // Reap workers that already finished.
            while tasks.try_join_next().is_some() {}

            if self.metrics.pending_batch_bytes.get() >= self.high_water_bytes {
                debug!(
                    pending_bytes = self.metrics.pending_batch_bytes.get(),
                    high_water = self.high_water_bytes,
                    "backpressure: pausing receives"
                );
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {}
                    () = sleep(cooldown) => {}
                }
                continue;
            }

            // Hold one slot before receiving so a message is only pulled
            // when a worker can take it immediately.
            let first_permit = tokio::select! {
                biased;
                _ = shutdown.changed() => continue,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let batch_size = self
                .cfg
                .max_messages_per_receive
                .min(semaphore.available_permits() + 1);
            let received = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    drop(first_permit);
                    continue;
                }
                r = self.source.receive(batch_size, wait, visibility) => r,
            };

            match received {
                Ok(messages) if messages.is_empty() => drop(first_permit),
                Ok(messages) => {
                    self.metrics.messages_received.add(messages.len() as u64);
                    let mut first_permit = Some(first_permit);
                    for msg in messages {
                        let permit = match first_permit.take() {
                            Some(p) => p,
                            None => match semaphore.clone().acquire_owned().await {
                                Ok(p) => p,
                                Err(_) => return,
                            },
                        };
                        let ctx = self.ctx.clone();
                        let source = self.source.clone();
                        let metrics = self.metrics.clone();
                        tasks.spawn(async move {
                            let _permit = permit;
                            drive_message(&ctx, source, &metrics, msg, visibility).await;
                        });
                    }
                }
                Err(e) => {
                    warn!(stage = "receive", error = %e, "receive failed, backing off");
                    drop(first_permit);
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => {}
                        () = sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        self.drain_workers(tasks).await;
    }

    async fn drain_workers(&self, mut tasks: JoinSet<()>) {
        let in_flight = tasks.len();
        info!(in_flight, "consumer stopped receiving, draining workers");
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if timeout(self.processing_drain, drain).await.is_err() {
            warn!(
                remaining = tasks.len(),
                "processing drain deadline exceeded, abandoning in-flight workers"
            );
            tasks.shutdown().await;
        }
    }
}

/// Run one worker with its visibility refresher, then settle the message.
async fn drive_message(
    ctx: &WorkerContext,
    source: Arc<dyn MessageSource>,
    metrics: &PipelineMetrics,
    msg: QueueMessage,
    visibility: Duration,
) {
    let refresher = tokio::spawn({
        let source = source.clone();
        let receipt_handle = msg.receipt_handle.clone();
        async move {
            let mut ticks = tokio::time::interval(visibility / 2);
            // The first tick completes immediately; the message is already
            // visible-timed from the receive itself.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                if let Err(e) = source.extend_visibility(&receipt_handle, visibility).await {
                    warn!(error = %e, "visibility extension failed");
                }
            }
        }
    });

    let outcome = worker::process_message(ctx, &msg).await;
    refresher.abort();

    match outcome {
        WorkerOutcome::Ack => {
            if let Err(e) = source.ack(&msg.receipt_handle).await {
                warn!(message_id = %msg.message_id, error = %e, "ack failed, message may redeliver");
            } else {
                metrics.messages_acked.bump();
            }
        }
        WorkerOutcome::Redeliver => {
            metrics.messages_nacked.bump();
            if let Err(e) = source.nack(&msg.receipt_handle).await {
                warn!(message_id = %msg.message_id, error = %e, "nack failed");
            }
        }
    }
}
