//! Per-message worker: drives one upload event end-to-end.
//!
//! extract → open object → stream lines → decode → parse → expand → filter
//! → submit to the batcher, in source order.  Errors are classified at the
//! smallest unit that can name them and never cross the message boundary:
//! a poisoned line skips that line, a missing object skips that message, a
//! transient failure leaves the message unacked for redelivery.
//!
//! The worker mints one `processing_batch_id` per message and stamps it on
//! every measurement it emits.

use crate::batcher::BatcherHandle;
use crate::blob;
use crate::codec::{self, LineDecode};
use crate::event;
use crate::filter::{DropReason, SanityFilter};
use crate::metrics::PipelineMetrics;
use crate::transform;
use chrono::Utc;
use futures_util::{StreamExt, pin_mut};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, error, info_span, warn};
use uuid::Uuid;
use wt_protocol::ports::{ObjectStore, OpenError, QueueMessage};

/// Everything one worker invocation needs; cheap to clone per message.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn ObjectStore>,
    pub batcher: BatcherHandle,
    pub filter: Arc<SanityFilter>,
    pub metrics: Arc<PipelineMetrics>,
    pub max_line_bytes: usize,
    pub max_decoded_bytes: usize,
    pub stream_read_timeout: Duration,
    /// Target stream when key derivation yields `"unknown"`.
    pub default_stream_name: String,
}

/// What the consumer should do with the message afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Terminal (processed or terminally skipped): delete the message.
    Ack,
    /// Transient failure: leave the message for redelivery.
    Redeliver,
}

/// Process one queue message.
pub async fn process_message(ctx: &WorkerContext, msg: &QueueMessage) -> WorkerOutcome {
    let extracted = match event::extract_event(&msg.body) {
        Ok(e) => e,
        Err(e) => {
            ctx.metrics.malformed_event.bump();
            error!(
                message_id = %msg.message_id,
                stage = "extract",
                error_kind = "MalformedEvent",
                error = %e,
                "message dropped"
            );
            return WorkerOutcome::Ack;
        }
    };
    if extracted.extra_records > 0 {
        ctx.metrics
            .extra_records_skipped
            .add(extracted.extra_records as u64);
        warn!(
            message_id = %msg.message_id,
            skipped = extracted.extra_records,
            "envelope carried extra records"
        );
    }

    let upload = extracted.event;
    let processing_batch_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "object",
        message_id = %msg.message_id,
        object_key = %upload.object_key,
        processing_batch_id = %processing_batch_id,
    );
    process_object(ctx, &upload, &processing_batch_id)
        .instrument(span)
        .await
}

async fn process_object(
    ctx: &WorkerContext,
    upload: &wt_protocol::UploadEvent,
    processing_batch_id: &str,
) -> WorkerOutcome {
    let byte_stream = match ctx.store.open(&upload.bucket, &upload.object_key).await {
        Ok(s) => s,
        Err(OpenError::NotFound { .. }) => {
            ctx.metrics.objects_not_found.bump();
            warn!(stage = "open", error_kind = "ObjectNotFound", "object skipped");
            return WorkerOutcome::Ack;
        }
        Err(OpenError::Transient(e)) => {
            ctx.metrics.transient_storage_errors.bump();
            warn!(
                stage = "open",
                error_kind = "TransientStorageError",
                error = %e,
                "message left for redelivery"
            );
            return WorkerOutcome::Redeliver;
        }
    };

    let stream_name = if upload.stream_name == "unknown" {
        ctx.default_stream_name.as_str()
    } else {
        upload.stream_name.as_str()
    };

    let lines = blob::lines(
        byte_stream,
        ctx.max_line_bytes,
        ctx.stream_read_timeout,
        ctx.metrics.clone(),
    );
    pin_mut!(lines);

    while let Some(item) = lines.next().await {
        let line = match item {
            Ok(line) => line,
            Err(e) => {
                ctx.metrics.transient_storage_errors.bump();
                warn!(
                    stage = "stream",
                    error_kind = "TransientStorageError",
                    error = %e,
                    "message left for redelivery"
                );
                return WorkerOutcome::Redeliver;
            }
        };

        let doc = match codec::decode_line(&line, ctx.max_decoded_bytes) {
            LineDecode::Document(doc) => doc,
            LineDecode::Empty => continue,
            LineDecode::Malformed => {
                ctx.metrics.malformed_line.bump();
                continue;
            }
        };

        let Some(payload) = transform::parse_payload(&doc) else {
            ctx.metrics.malformed_json.bump();
            continue;
        };

        ctx.metrics
            .connected_events_seen
            .add(payload.connected_events.len() as u64);
        ctx.metrics
            .disconnected_events_seen
            .add(payload.disconnected_events.len() as u64);
        let scan_entries: usize = payload.scan_results.iter().map(|s| s.results.len()).sum();
        ctx.metrics.scan_entries_seen.add(scan_entries as u64);

        let now_ms = Utc::now().timestamp_millis();
        let candidates = transform::expand(
            &payload,
            &upload.event_id,
            processing_batch_id,
            ctx.filter.accuracy_threshold_m(),
        );
        for candidate in candidates {
            match ctx.filter.apply(candidate, now_ms) {
                Ok(m) => {
                    if m.is_mobile_hotspot == Some(true) {
                        ctx.metrics.flagged_hotspot.bump();
                    }
                    ctx.metrics.accepted.bump();
                    if ctx.batcher.submit(stream_name, &m).await.is_err() {
                        warn!(
                            stage = "submit",
                            "batcher closed mid-object, message left for redelivery"
                        );
                        return WorkerOutcome::Redeliver;
                    }
                }
                Err(reason) => count_drop(&ctx.metrics, reason),
            }
        }
    }

    ctx.metrics.objects_processed.bump();
    WorkerOutcome::Ack
}

fn count_drop(metrics: &PipelineMetrics, reason: DropReason) {
    match reason {
        DropReason::Bssid => metrics.filtered_bssid.bump(),
        DropReason::Coordinates => metrics.filtered_coords.bump(),
        DropReason::Rssi => metrics.filtered_rssi.bump(),
        DropReason::Accuracy => metrics.filtered_accuracy.bump(),
        DropReason::Timestamp => metrics.filtered_timestamp.bump(),
        DropReason::MobileHotspot => metrics.filtered_hotspot.bump(),
    }
}
