//! Graceful shutdown: receives stop, in-flight work finishes, the final
//! flush publishes everything pending, and nothing is silently lost.

mod common;

use common::{Harness, test_config};
use serde_json::json;
use std::time::Duration;
use wt_test_utils::PublishResponse;
use wt_test_utils::encode::{notification_body, object_from_docs};

const WAIT: Duration = Duration::from_secs(10);

fn doc_with_entries(entries: usize) -> String {
    let sweeps: Vec<serde_json::Value> = (0..entries)
        .map(|i| {
            json!({
                "timestamp": 1_714_000_000_000u64 + i as u64,
                "location": { "latitude": 40.7, "longitude": -74.0, "accuracy": 10 },
                "results": [
                    { "bssid": format!("AA:BB:CC:00:{:02X}:{:02X}", i / 256, i % 256), "rssi": -60 }
                ],
            })
        })
        .collect();
    json!({ "scanResults": sweeps }).to_string()
}

#[tokio::test]
async fn shutdown_flushes_pending_records_with_zero_loss() {
    // Batch timeout far beyond the test: records only leave the pending
    // buffer through the shutdown drain.
    let mut harness = Harness::start(test_config(60_000));

    for n in 0..3 {
        let key = format!("uploads/drain-{n}-2026-03-01-12-00-00.gz");
        harness
            .store
            .put("landing", &key, object_from_docs(&[&doc_with_entries(150)]));
        let (body, _) = notification_body("landing", &key);
        harness.source.push(&body);
    }

    // All three workers finish and ack; 450 records sit in the batcher.
    harness
        .wait_until("all 3 messages acked", WAIT, || {
            harness.source.acked().len() == 3
        })
        .await;
    assert_eq!(harness.metrics.accepted.get(), 450);
    assert_eq!(harness.metrics.published_records.get(), 0);

    harness.stop().await;

    assert_eq!(harness.metrics.published_records.get(), 450);
    assert_eq!(harness.metrics.lost_on_shutdown.get(), 0);
    assert_eq!(harness.metrics.pending_batch_records.get(), 0);
    assert_eq!(harness.delivery.total_records(), 450);
}

#[tokio::test]
async fn idle_pipeline_shuts_down_promptly_and_cleanly() {
    let mut harness = Harness::start(test_config(100));

    // Give the consumer a moment to enter its long poll.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = tokio::time::Instant::now();
    harness.stop().await;
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "idle shutdown must not wait out the drain deadlines"
    );

    assert_eq!(harness.metrics.accepted.get(), 0);
    assert_eq!(harness.metrics.lost_on_shutdown.get(), 0);
    assert_eq!(harness.metrics.published_records.get(), 0);
}

#[tokio::test]
async fn drain_accounts_for_records_that_exhaust_retries() {
    let mut harness = Harness::start(test_config(60_000));
    // Every publish attempt during the drain fails; retries exhaust.
    harness.delivery.script(vec![
        PublishResponse::Transient,
        PublishResponse::Transient,
        PublishResponse::Transient,
        PublishResponse::Transient,
    ]);

    let key = "uploads/doomed-2026-03-01-12-00-00.gz";
    harness
        .store
        .put("landing", key, object_from_docs(&[&doc_with_entries(5)]));
    let (body, _) = notification_body("landing", key);
    harness.source.push(&body);

    harness
        .wait_until("message acked", WAIT, || harness.source.acked().len() == 1)
        .await;
    harness.stop().await;

    // Nothing is silently dropped: every record is accounted for in the
    // give-up counter, and the pending gauges return to zero.
    assert_eq!(harness.metrics.publish_gave_up.get(), 5);
    assert_eq!(harness.metrics.lost_on_shutdown.get(), 0);
    assert_eq!(harness.metrics.pending_batch_records.get(), 0);
    assert_eq!(harness.metrics.pending_batch_bytes.get(), 0);
}

#[tokio::test]
async fn no_new_messages_are_consumed_after_shutdown() {
    let mut harness = Harness::start(test_config(100));

    let key = "uploads/early-2026-03-01-12-00-00.gz";
    harness
        .store
        .put("landing", key, object_from_docs(&[&doc_with_entries(2)]));
    let (body, _) = notification_body("landing", key);
    harness.source.push(&body);

    harness
        .wait_until("first message processed", WAIT, || {
            harness.source.acked().len() == 1
        })
        .await;

    harness.stop().await;

    // A message arriving after shutdown stays queued and untouched.
    let (late_body, _) = notification_body("landing", key);
    harness.source.push(&late_body);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.source.ready_len(), 1);
    assert_eq!(harness.source.acked().len(), 1);
}
