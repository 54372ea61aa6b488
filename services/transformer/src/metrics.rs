//! Pipeline counters.
//!
//! Monotonic atomics, no locks on the hot path; `snapshot()` produces one
//! serializable view for the periodic log line and the shutdown report.
//! Counters are observability only — correctness never depends on them.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge that can move both ways (pending-buffer accounting).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn sub(&self, n: u64) {
        self.0.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// All counters for one pipeline instance.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    // Queue / envelope
    pub messages_received: Counter,
    pub messages_acked: Counter,
    pub messages_nacked: Counter,
    pub malformed_event: Counter,
    pub extra_records_skipped: Counter,

    // Object streaming
    pub objects_processed: Counter,
    pub objects_not_found: Counter,
    pub transient_storage_errors: Counter,
    pub lines_read: Counter,
    pub line_too_long: Counter,

    // Decode / parse
    pub malformed_line: Counter,
    pub malformed_json: Counter,

    // Transform
    pub connected_events_seen: Counter,
    pub disconnected_events_seen: Counter,
    pub scan_entries_seen: Counter,

    // Filter (categorised drops)
    pub accepted: Counter,
    pub filtered_bssid: Counter,
    pub filtered_coords: Counter,
    pub filtered_rssi: Counter,
    pub filtered_accuracy: Counter,
    pub filtered_timestamp: Counter,
    pub filtered_hotspot: Counter,
    pub flagged_hotspot: Counter,

    // Batcher / publisher
    pub record_too_large: Counter,
    pub published_records: Counter,
    pub published_batches: Counter,
    pub publish_retries: Counter,
    pub publish_gave_up: Counter,

    // Shutdown
    pub lost_on_shutdown: Counter,

    // Pending-buffer gauges (batcher-owned, consumer-read for backpressure)
    pub pending_batch_bytes: Gauge,
    pub pending_batch_records: Gauge,
}

/// Point-in-time counter values, loggable as structured fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_acked: u64,
    pub messages_nacked: u64,
    pub malformed_event: u64,
    pub extra_records_skipped: u64,
    pub objects_processed: u64,
    pub objects_not_found: u64,
    pub transient_storage_errors: u64,
    pub lines_read: u64,
    pub line_too_long: u64,
    pub malformed_line: u64,
    pub malformed_json: u64,
    pub connected_events_seen: u64,
    pub disconnected_events_seen: u64,
    pub scan_entries_seen: u64,
    pub accepted: u64,
    pub filtered_bssid: u64,
    pub filtered_coords: u64,
    pub filtered_rssi: u64,
    pub filtered_accuracy: u64,
    pub filtered_timestamp: u64,
    pub filtered_hotspot: u64,
    pub flagged_hotspot: u64,
    pub record_too_large: u64,
    pub published_records: u64,
    pub published_batches: u64,
    pub publish_retries: u64,
    pub publish_gave_up: u64,
    pub lost_on_shutdown: u64,
    pub pending_batch_bytes: u64,
    pub pending_batch_records: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        PipelineMetrics::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.get(),
            messages_acked: self.messages_acked.get(),
            messages_nacked: self.messages_nacked.get(),
            malformed_event: self.malformed_event.get(),
            extra_records_skipped: self.extra_records_skipped.get(),
            objects_processed: self.objects_processed.get(),
            objects_not_found: self.objects_not_found.get(),
            transient_storage_errors: self.transient_storage_errors.get(),
            lines_read: self.lines_read.get(),
            line_too_long: self.line_too_long.get(),
            malformed_line: self.malformed_line.get(),
            malformed_json: self.malformed_json.get(),
            connected_events_seen: self.connected_events_seen.get(),
            disconnected_events_seen: self.disconnected_events_seen.get(),
            scan_entries_seen: self.scan_entries_seen.get(),
            accepted: self.accepted.get(),
            filtered_bssid: self.filtered_bssid.get(),
            filtered_coords: self.filtered_coords.get(),
            filtered_rssi: self.filtered_rssi.get(),
            filtered_accuracy: self.filtered_accuracy.get(),
            filtered_timestamp: self.filtered_timestamp.get(),
            filtered_hotspot: self.filtered_hotspot.get(),
            flagged_hotspot: self.flagged_hotspot.get(),
            record_too_large: self.record_too_large.get(),
            published_records: self.published_records.get(),
            published_batches: self.published_batches.get(),
            publish_retries: self.publish_retries.get(),
            publish_gave_up: self.publish_gave_up.get(),
            lost_on_shutdown: self.lost_on_shutdown.get(),
            pending_batch_bytes: self.pending_batch_bytes.get(),
            pending_batch_records: self.pending_batch_records.get(),
        }
    }
}
