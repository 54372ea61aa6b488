//! Capability interfaces the transformer pipeline is composed from.
//!
//! Three seams, injected at startup: the notification queue, the object
//! store holding uploaded payloads, and the batched delivery stream.  The
//! pipeline owns none of their infrastructure; production deployments plug
//! in cloud-backed implementations, tests plug in in-memory fakes, and the
//! transformer binary ships local filesystem backends.
//!
//! Error enums carry the transient/terminal split the worker's failure
//! mapping depends on: a terminal error acks the message (drop), a
//! transient one leaves it for redelivery.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;

// ---------------------------------------------------------------------------
// Message source (queue)
// ---------------------------------------------------------------------------

/// One received queue message: opaque body plus a receipt handle used for
/// ack/nack/visibility calls.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transient queue error: {0}")]
    Transient(String),
}

/// Long-pollable at-least-once message queue.
///
/// A message that is never acked becomes visible again after its visibility
/// timeout; `nack` returns it immediately.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    async fn extend_visibility(
        &self,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), QueueError>;

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

/// A readable byte stream over one stored object.  Dropping it closes the
/// underlying resource.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum OpenError {
    /// Terminal: the object will never appear; ack the message.
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    /// Retryable: leave the message for redelivery.
    #[error("transient storage error: {0}")]
    Transient(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn open(&self, bucket: &str, key: &str) -> Result<ByteStream, OpenError>;
}

// ---------------------------------------------------------------------------
// Delivery stream
// ---------------------------------------------------------------------------

/// Per-record outcome of a batch publish.
#[derive(Debug, Clone)]
pub struct RecordResult {
    pub ok: bool,
    pub error_code: Option<String>,
    pub retryable: bool,
}

impl RecordResult {
    pub fn ok() -> Self {
        RecordResult {
            ok: true,
            error_code: None,
            retryable: false,
        }
    }

    pub fn failed(error_code: &str, retryable: bool) -> Self {
        RecordResult {
            ok: false,
            error_code: Some(error_code.to_owned()),
            retryable,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    /// The whole call failed but may succeed on retry.
    #[error("transient publish error: {0}")]
    Transient(String),
}

/// Batched downstream sink.  Hard limits enforced by the real backend:
/// 500 records/call, 4 MiB/call, 1 MiB/record — the batcher never submits a
/// batch violating them.
#[async_trait]
pub trait DeliveryStream: Send + Sync {
    /// Publish `records` to `stream_name`; the result has one entry per
    /// input record, in order.
    async fn put_batch(
        &self,
        stream_name: &str,
        records: &[Vec<u8>],
    ) -> Result<Vec<RecordResult>, PublishError>;
}
