//! Delivery batching properties at the pipeline level: the triple size
//! bounds, cross-batch ordering, and retry behavior.

mod common;

use common::{Harness, test_config};
use serde_json::json;
use std::time::Duration;
use transformer::config::load_config_from_str;
use wt_test_utils::encode::{notification_body, object_from_docs};
use wt_test_utils::{PublishResponse, PublishedBatch};

const WAIT: Duration = Duration::from_secs(10);

fn bssid(i: usize) -> String {
    format!(
        "AA:BB:CC:{:02X}:{:02X}:{:02X}",
        (i >> 16) & 0xFF,
        (i >> 8) & 0xFF,
        i & 0xFF
    )
}

/// One document whose scan sweeps contain exactly `entries` entries with
/// sequential BSSIDs and timestamps.
fn doc_with_entries(entries: usize) -> String {
    let mut sweeps = Vec::new();
    let mut emitted = 0usize;
    while emitted < entries {
        let n = (entries - emitted).min(3);
        let results: Vec<serde_json::Value> = (0..n)
            .map(|j| json!({ "bssid": bssid(emitted + j), "rssi": -60, "frequency": 2412 }))
            .collect();
        sweeps.push(json!({
            "timestamp": 1_714_000_000_000u64 + sweeps.len() as u64,
            "location": { "latitude": 40.7, "longitude": -74.0, "accuracy": 10 },
            "results": results,
        }));
        emitted += n;
    }
    json!({ "scanResults": sweeps }).to_string()
}

fn published_bssids(calls: &[PublishedBatch]) -> Vec<String> {
    calls
        .iter()
        .flat_map(|b| b.records.iter())
        .map(|r| {
            let v: serde_json::Value = serde_json::from_slice(r).unwrap();
            v["bssid"].as_str().unwrap().to_owned()
        })
        .collect()
}

#[tokio::test]
async fn five_hundred_one_records_split_into_two_bounded_batches() {
    // Long batch timeout: only the count bound and the shutdown drain flush.
    let mut harness = Harness::start(test_config(60_000));

    let key = "uploads/bulk-2026-03-01-12-00-00.gz";
    harness
        .store
        .put("landing", key, object_from_docs(&[&doc_with_entries(501)]));
    let (body, _) = notification_body("landing", key);
    harness.source.push(&body);

    // The count bound fires as the 501st record arrives.
    harness
        .wait_until("first 500 records published", WAIT, || {
            harness.delivery.total_records() == 500
        })
        .await;
    // The remaining record flushes during shutdown drain.
    harness.stop().await;

    let calls = harness.delivery.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].records.len(), 500);
    assert_eq!(calls[1].records.len(), 1);
    for call in &calls {
        let bytes: usize = call.records.iter().map(Vec::len).sum();
        assert!(call.records.len() <= 500);
        assert!(bytes <= 4 * 1024 * 1024);
    }

    // Order preserved across the batch boundary.
    let expected: Vec<String> = (0..501).map(bssid).collect();
    assert_eq!(published_bssids(&calls), expected);
    assert_eq!(harness.metrics.published_records.get(), 501);
    assert_eq!(harness.metrics.lost_on_shutdown.get(), 0);
}

#[tokio::test]
async fn byte_bound_keeps_every_batch_under_the_configured_cap() {
    let cfg = load_config_from_str(
        r#"
        schema_version = 1
        metrics_log_interval_s = 3600

        [queue]
        url = "mem://test"
        wait_seconds = 1
        visibility_timeout_s = 30

        [delivery]
        stream_name = "wifi-measurements"
        max_batch_bytes = 4096
        max_record_bytes = 1024
        batch_timeout_ms = 60000
        retry_backoff_ms = 10

        [shutdown]
        processing_drain_s = 10
        publish_drain_s = 10
        max_total_s = 30
        "#,
    )
    .unwrap();
    let mut harness = Harness::start(cfg);

    let key = "uploads/bytes-2026-03-01-12-00-00.gz";
    harness
        .store
        .put("landing", key, object_from_docs(&[&doc_with_entries(60)]));
    let (body, _) = notification_body("landing", key);
    let message_id = harness.source.push(&body);

    harness
        .wait_until("message acked", WAIT, || {
            harness.source.acked() == vec![message_id.clone()]
        })
        .await;
    harness.stop().await;

    let calls = harness.delivery.calls();
    assert!(calls.len() > 1, "4 KiB cap must split 60 records");
    for call in &calls {
        let bytes: usize = call.records.iter().map(Vec::len).sum();
        assert!(bytes <= 4096, "batch exceeded byte cap: {bytes}");
        for record in &call.records {
            assert!(record.len() <= 1024);
        }
    }
    let expected: Vec<String> = (0..60).map(bssid).collect();
    assert_eq!(published_bssids(&calls), expected);
    assert_eq!(harness.metrics.published_records.get(), 60);
}

#[tokio::test]
async fn transient_publish_failure_retries_until_success() {
    let mut harness = Harness::start(test_config(100));
    harness.delivery.script(vec![PublishResponse::Transient]);

    let key = "uploads/retry-2026-03-01-12-00-00.gz";
    harness
        .store
        .put("landing", key, object_from_docs(&[&doc_with_entries(6)]));
    let (body, _) = notification_body("landing", key);
    harness.source.push(&body);

    harness
        .wait_until("all records published after retry", WAIT, || {
            harness.metrics.published_records.get() == 6
        })
        .await;

    assert!(harness.metrics.publish_retries.get() >= 1);
    assert_eq!(harness.metrics.publish_gave_up.get(), 0);
    // First call failed wholesale, second carried the same records.
    let calls = harness.delivery.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].records, calls[1].records);

    harness.stop().await;
}

#[tokio::test]
async fn exhausted_retries_drop_records_without_stalling_the_pipeline() {
    let mut harness = Harness::start(test_config(100));
    // Initial call + 3 retries all fail: the batch is given up.
    harness.delivery.script(vec![
        PublishResponse::Transient,
        PublishResponse::Transient,
        PublishResponse::Transient,
        PublishResponse::Transient,
    ]);

    let key = "uploads/giveup-2026-03-01-12-00-00.gz";
    harness
        .store
        .put("landing", key, object_from_docs(&[&doc_with_entries(3)]));
    let (body, _) = notification_body("landing", key);
    harness.source.push(&body);

    harness
        .wait_until("records given up", WAIT, || {
            harness.metrics.publish_gave_up.get() == 3
        })
        .await;

    // The pipeline is still live: a follow-up object publishes fine.
    let key2 = "uploads/after-2026-03-01-12-30-00.gz";
    harness
        .store
        .put("landing", key2, object_from_docs(&[&doc_with_entries(2)]));
    let (body2, _) = notification_body("landing", key2);
    harness.source.push(&body2);

    harness
        .wait_until("subsequent records published", WAIT, || {
            harness.metrics.published_records.get() == 2
        })
        .await;

    assert_eq!(harness.metrics.publish_gave_up.get(), 3);
    harness.stop().await;
}

#[tokio::test]
async fn each_record_appears_in_exactly_one_successful_batch() {
    let mut harness = Harness::start(test_config(100));
    // Second and fourth records of the first call fail retryably once.
    harness.delivery.script(vec![PublishResponse::FailRecords {
        indices: vec![1, 3],
        retryable: true,
    }]);

    let key = "uploads/exactly-once-2026-03-01-12-00-00.gz";
    harness
        .store
        .put("landing", key, object_from_docs(&[&doc_with_entries(6)]));
    let (body, _) = notification_body("landing", key);
    harness.source.push(&body);

    harness
        .wait_until("all records published", WAIT, || {
            harness.metrics.published_records.get() == 6
        })
        .await;
    harness.stop().await;

    // Every record in exactly one batch when counting only acked outcomes:
    // call 1 acked records 0,2,4,5; call 2 acked the two retried ones.
    let calls = harness.delivery.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].records.len(), 2);
    assert_eq!(calls[1].records[0], calls[0].records[1]);
    assert_eq!(calls[1].records[1], calls[0].records[3]);
    assert_eq!(harness.metrics.publish_gave_up.get(), 0);
}
