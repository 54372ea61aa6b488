//! Delivery batching and publishing.
//!
//! A single owner task holds every pending record from the moment a worker
//! submits it until the delivery stream acknowledges it (or retries are
//! exhausted).  Workers talk to the task through a bounded channel, so
//! submission applies natural backpressure and the batch invariants never
//! need a shared lock.
//!
//! # Invariants
//! - A published batch satisfies all three bounds: record count, total
//!   bytes, per-record bytes.
//! - A record is serialized exactly once (at submit); its size is cached.
//! - A record over `max_record_bytes` is counted and dropped, never
//!   truncated.
//! - A record leaves the pending buffer only on per-record success or after
//!   `max_retries` failed attempts; it never lands in two batches.
//! - Batches never mix target streams.
//!
//! # Flush triggers
//! Whichever fires first: the next record would exceed a size bound, the
//! oldest pending record ages past `batch_timeout_ms`, or a drain request
//! arrives.

use crate::config::DeliveryConfig;
use crate::metrics::PipelineMetrics;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tracing::{debug, error, warn};
use uuid::Uuid;
use wt_protocol::Measurement;
use wt_protocol::ports::DeliveryStream;

const SUBMIT_CHANNEL_CAPACITY: usize = 256;

/// The batcher task has exited; no further submissions are possible.
#[derive(Debug, Error)]
#[error("batcher is closed")]
pub struct BatcherClosed;

enum BatcherMsg {
    Submit { stream: String, payload: Vec<u8> },
    Flush { done: oneshot::Sender<()> },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable submission handle.  Dropping every handle drains and stops the
/// batcher task.
#[derive(Clone)]
pub struct BatcherHandle {
    tx: mpsc::Sender<BatcherMsg>,
    max_record_bytes: usize,
    metrics: Arc<PipelineMetrics>,
}

impl BatcherHandle {
    /// Serialize one measurement and hand it to the batcher.
    ///
    /// Serialization happens here, exactly once; the cached byte length is
    /// what every size bound uses.  An oversized record is counted and
    /// dropped without failing the caller.
    pub async fn submit(
        &self,
        stream_name: &str,
        measurement: &Measurement,
    ) -> Result<(), BatcherClosed> {
        let payload = serde_json::to_vec(measurement).map_err(|e| {
            // Measurement contains nothing unserializable; treat as a bug.
            error!(error = %e, "measurement serialization failed");
            BatcherClosed
        })?;

        if payload.len() > self.max_record_bytes {
            self.metrics.record_too_large.bump();
            warn!(
                stage = "batcher",
                error_kind = "record_too_large",
                size = payload.len(),
                limit = self.max_record_bytes,
                "record dropped"
            );
            return Ok(());
        }

        self.tx
            .send(BatcherMsg::Submit {
                stream: stream_name.to_owned(),
                payload,
            })
            .await
            .map_err(|_| BatcherClosed)
    }

    /// Ask the batcher to publish everything pending and wait until it has.
    pub async fn flush(&self) -> Result<(), BatcherClosed> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(BatcherMsg::Flush { done })
            .await
            .map_err(|_| BatcherClosed)?;
        rx.await.map_err(|_| BatcherClosed)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

struct PendingRecord {
    payload: Vec<u8>,
    attempts: u32,
    enqueued_at: Instant,
}

#[derive(Default)]
struct StreamBuffer {
    records: VecDeque<PendingRecord>,
    bytes: usize,
}

struct Batcher {
    cfg: DeliveryConfig,
    delivery: Arc<dyn DeliveryStream>,
    metrics: Arc<PipelineMetrics>,
    buffers: HashMap<String, StreamBuffer>,
}

/// Spawn the batcher task.  Returns the submission handle and the join
/// handle the lifecycle coordinator awaits at shutdown.
pub fn spawn(
    cfg: DeliveryConfig,
    delivery: Arc<dyn DeliveryStream>,
    metrics: Arc<PipelineMetrics>,
) -> (BatcherHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(SUBMIT_CHANNEL_CAPACITY);
    let handle = BatcherHandle {
        tx,
        max_record_bytes: cfg.max_record_bytes,
        metrics: metrics.clone(),
    };
    let batcher = Batcher {
        cfg,
        delivery,
        metrics,
        buffers: HashMap::new(),
    };
    let join = tokio::spawn(batcher.run(rx));
    (handle, join)
}

impl Batcher {
    async fn run(mut self, mut rx: mpsc::Receiver<BatcherMsg>) {
        loop {
            let deadline = self.next_flush_deadline();
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Some(BatcherMsg::Submit { stream, payload }) => {
                        self.enqueue(stream, payload).await;
                    }
                    Some(BatcherMsg::Flush { done }) => {
                        self.flush_all().await;
                        let _ = done.send(());
                    }
                    None => {
                        // Every handle dropped: final drain, then stop.
                        self.flush_all().await;
                        break;
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_expired().await;
                }
            }
        }
    }

    /// Earliest (oldest record + batch_timeout) across streams.
    fn next_flush_deadline(&self) -> Option<Instant> {
        self.buffers
            .values()
            .filter_map(|buf| buf.records.front())
            .map(|r| r.enqueued_at + self.cfg.batch_timeout())
            .min()
    }

    async fn enqueue(&mut self, stream: String, payload: Vec<u8>) {
        let size = payload.len();

        // Flush first if appending would breach a bound (trigger i).
        let must_flush = {
            let buf = self.buffers.entry(stream.clone()).or_default();
            !buf.records.is_empty()
                && (buf.records.len() + 1 > self.cfg.max_records_per_batch
                    || buf.bytes + size > self.cfg.max_batch_bytes)
        };
        if must_flush {
            self.publish_one_batch(&stream).await;
        }

        let buf = self.buffers.entry(stream).or_default();
        buf.records.push_back(PendingRecord {
            payload,
            attempts: 0,
            enqueued_at: Instant::now(),
        });
        buf.bytes += size;
        self.metrics.pending_batch_bytes.add(size as u64);
        self.metrics.pending_batch_records.add(1);
    }

    /// Flush every stream whose oldest pending record has aged out.
    async fn flush_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .buffers
            .iter()
            .filter(|(_, buf)| {
                buf.records
                    .front()
                    .is_some_and(|r| now.duration_since(r.enqueued_at) >= self.cfg.batch_timeout())
            })
            .map(|(stream, _)| stream.clone())
            .collect();
        for stream in expired {
            self.publish_one_batch(&stream).await;
        }
    }

    /// Publish everything pending, stream by stream (drain request).
    async fn flush_all(&mut self) {
        let streams: Vec<String> = self.buffers.keys().cloned().collect();
        for stream in streams {
            while self
                .buffers
                .get(&stream)
                .is_some_and(|buf| !buf.records.is_empty())
            {
                self.publish_one_batch(&stream).await;
            }
        }
    }

    /// Cut one bound-respecting batch off the front of a stream buffer and
    /// publish it to completion (success or retry exhaustion).
    async fn publish_one_batch(&mut self, stream: &str) {
        let batch = {
            let Some(buf) = self.buffers.get_mut(stream) else {
                return;
            };
            let mut batch: Vec<PendingRecord> = Vec::new();
            let mut batch_bytes = 0usize;
            while let Some(front) = buf.records.front() {
                let size = front.payload.len();
                if batch.len() + 1 > self.cfg.max_records_per_batch
                    || batch_bytes + size > self.cfg.max_batch_bytes
                {
                    break;
                }
                if let Some(record) = buf.records.pop_front() {
                    batch_bytes += size;
                    buf.bytes -= size;
                    batch.push(record);
                }
            }
            batch
        };
        if batch.is_empty() {
            return;
        }
        self.publish_with_retry(stream, batch).await;
    }

    /// Drive one batch through the delivery stream.  Failed retryable
    /// records stay at the head, in order, and are retried with jittered
    /// exponential backoff until they succeed or exhaust `max_retries`.
    async fn publish_with_retry(&mut self, stream: &str, mut batch: Vec<PendingRecord>) {
        let batch_id = Uuid::new_v4().to_string();
        loop {
            let payloads: Vec<Vec<u8>> = batch.iter().map(|r| r.payload.clone()).collect();
            let call = self.delivery.put_batch(stream, &payloads);

            match timeout(self.cfg.publish_timeout(), call).await {
                Ok(Ok(results)) => {
                    let mut keep: Vec<PendingRecord> = Vec::new();
                    let mut any_ok = false;
                    let mut results = results.into_iter();
                    for record in batch {
                        // A short result list counts as failure for the tail.
                        let result = results.next();
                        match result {
                            Some(r) if r.ok => {
                                any_ok = true;
                                self.release(&record);
                                self.metrics.published_records.bump();
                            }
                            Some(r) if !r.retryable => {
                                self.give_up(stream, &batch_id, record, r.error_code.as_deref());
                            }
                            _ => keep.push(record),
                        }
                    }
                    if any_ok {
                        self.metrics.published_batches.bump();
                    }
                    if keep.is_empty() {
                        return;
                    }
                    debug!(
                        stream_name = %stream,
                        batch_id = %batch_id,
                        failed = keep.len(),
                        "partial publish failure, retrying failed records"
                    );
                    batch = self.bump_attempts(stream, &batch_id, keep);
                }
                Ok(Err(e)) => {
                    warn!(
                        stream_name = %stream,
                        batch_id = %batch_id,
                        error = %e,
                        "publish call failed, retrying"
                    );
                    batch = self.bump_attempts(stream, &batch_id, batch);
                }
                Err(_elapsed) => {
                    warn!(
                        stream_name = %stream,
                        batch_id = %batch_id,
                        timeout_ms = self.cfg.publish_timeout_ms,
                        "publish call timed out, retrying"
                    );
                    batch = self.bump_attempts(stream, &batch_id, batch);
                }
            }

            if batch.is_empty() {
                return;
            }
            self.metrics.publish_retries.bump();
            sleep(self.backoff(batch[0].attempts)).await;
        }
    }

    /// Increment attempts; records past `max_retries` are dropped with the
    /// give-up counter, the rest come back in their original order.
    fn bump_attempts(
        &self,
        stream: &str,
        batch_id: &str,
        records: Vec<PendingRecord>,
    ) -> Vec<PendingRecord> {
        let mut keep = Vec::with_capacity(records.len());
        for mut record in records {
            record.attempts += 1;
            if record.attempts > self.cfg.max_retries {
                self.give_up(stream, batch_id, record, Some("RetriesExhausted"));
            } else {
                keep.push(record);
            }
        }
        keep
    }

    fn release(&self, record: &PendingRecord) {
        self.metrics.pending_batch_bytes.sub(record.payload.len() as u64);
        self.metrics.pending_batch_records.sub(1);
    }

    fn give_up(
        &self,
        stream: &str,
        batch_id: &str,
        record: PendingRecord,
        error_code: Option<&str>,
    ) {
        self.release(&record);
        self.metrics.publish_gave_up.bump();
        error!(
            stage = "publish",
            stream_name = %stream,
            batch_id = %batch_id,
            error_kind = error_code.unwrap_or("Unknown"),
            attempts = record.attempts,
            size = record.payload.len(),
            "record dropped after publish failure"
        );
    }

    /// `base × 2^(attempt-1)`, jittered ±20 %.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base_ms = self.cfg.retry_backoff_ms.saturating_mul(1u64 << exp);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        Duration::from_millis((base_ms as f64 * jitter) as u64)
    }
}
