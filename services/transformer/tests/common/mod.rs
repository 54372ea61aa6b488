//! Shared harness: a full pipeline running against the in-memory ports.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use transformer::config::{TransformerConfig, load_config_from_str};
use transformer::lifecycle::{PipelineDeps, run_pipeline};
use transformer::metrics::PipelineMetrics;
use wt_test_utils::{MemDeliveryStream, MemMessageSource, MemObjectStore};

pub struct Harness {
    pub source: Arc<MemMessageSource>,
    pub store: Arc<MemObjectStore>,
    pub delivery: Arc<MemDeliveryStream>,
    pub metrics: Arc<PipelineMetrics>,
    shutdown: Option<oneshot::Sender<()>>,
    pipeline: Option<tokio::task::JoinHandle<()>>,
}

/// Config tuned for tests: short long-poll, fast retries.
pub fn test_config(batch_timeout_ms: u64) -> TransformerConfig {
    load_config_from_str(&format!(
        r#"
        schema_version = 1
        metrics_log_interval_s = 3600

        [queue]
        url = "mem://test"
        wait_seconds = 1
        visibility_timeout_s = 30

        [filter]
        accuracy_threshold_m = 150.0

        [delivery]
        stream_name = "wifi-measurements"
        batch_timeout_ms = {batch_timeout_ms}
        max_retries = 3
        retry_backoff_ms = 10

        [shutdown]
        processing_drain_s = 10
        publish_drain_s = 10
        max_total_s = 30
        "#
    ))
    .expect("test config must load")
}

impl Harness {
    pub fn start(cfg: TransformerConfig) -> Self {
        let source = Arc::new(MemMessageSource::new());
        let store = Arc::new(MemObjectStore::new());
        let delivery = Arc::new(MemDeliveryStream::new());
        let metrics = Arc::new(PipelineMetrics::new());

        let deps = PipelineDeps {
            source: source.clone(),
            store: store.clone(),
            delivery: delivery.clone(),
        };
        let (shutdown, rx) = oneshot::channel::<()>();
        let pipeline = tokio::spawn(run_pipeline(cfg, deps, metrics.clone(), async move {
            let _ = rx.await;
        }));

        Harness {
            source,
            store,
            delivery,
            metrics,
            shutdown: Some(shutdown),
            pipeline: Some(pipeline),
        }
    }

    /// Trigger shutdown and wait for the full drain sequence.
    pub async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.await.expect("pipeline task panicked");
        }
    }

    /// Poll `cond` until it holds or the timeout elapses.
    pub async fn wait_until(&self, what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + timeout;
        while !cond() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for: {what}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
