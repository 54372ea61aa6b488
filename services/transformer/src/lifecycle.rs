//! Pipeline lifecycle: wiring, signal handling and phased shutdown.
//!
//! Shutdown order on SIGTERM/SIGINT:
//! 1. flip the shutdown watch — the consumer stops receiving within one
//!    poll interval;
//! 2. the consumer drains in-flight workers (`processing_drain_s`);
//! 3. the batcher flushes everything pending (`publish_drain_s`);
//! 4. remaining work is abandoned, counted as `lost_on_shutdown`, and the
//!    final metrics snapshot is logged.
//!
//! The whole sequence is bounded by `max_total_s`.

use crate::batcher;
use crate::config::TransformerConfig;
use crate::consumer::Consumer;
use crate::filter::SanityFilter;
use crate::metrics::PipelineMetrics;
use crate::worker::WorkerContext;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, timeout};
use tracing::{info, warn};
use wt_protocol::ports::{DeliveryStream, MessageSource, ObjectStore};

/// The three injected capabilities the pipeline runs against.
pub struct PipelineDeps {
    pub source: Arc<dyn MessageSource>,
    pub store: Arc<dyn ObjectStore>,
    pub delivery: Arc<dyn DeliveryStream>,
}

/// Run the pipeline until `shutdown` resolves, then drain and stop.
pub async fn run_pipeline(
    cfg: TransformerConfig,
    deps: PipelineDeps,
    metrics: Arc<PipelineMetrics>,
    shutdown: impl Future<Output = ()>,
) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (batcher_handle, batcher_join) =
        batcher::spawn(cfg.delivery.clone(), deps.delivery, metrics.clone());

    let ctx = WorkerContext {
        store: deps.store,
        batcher: batcher_handle.clone(),
        filter: Arc::new(SanityFilter::from_config(&cfg.filter)),
        metrics: metrics.clone(),
        max_line_bytes: cfg.object.max_line_bytes,
        max_decoded_bytes: cfg.object.max_decoded_bytes,
        stream_read_timeout: Duration::from_secs(cfg.object.stream_read_timeout_s),
        default_stream_name: cfg.delivery.stream_name.clone(),
    };
    let consumer = Consumer::new(
        deps.source,
        ctx,
        cfg.queue.clone(),
        metrics.clone(),
        cfg.delivery.max_batch_bytes,
        Duration::from_secs(cfg.shutdown.processing_drain_s),
    );
    let consumer_join = tokio::spawn(consumer.run(shutdown_rx.clone()));

    let metrics_join = tokio::spawn(log_metrics_periodically(
        metrics.clone(),
        Duration::from_secs(cfg.metrics_log_interval_s),
        shutdown_rx,
    ));

    info!("pipeline running");
    shutdown.await;
    info!("shutdown signal received");

    let deadline = Instant::now() + Duration::from_secs(cfg.shutdown.max_total_s);
    let _ = shutdown_tx.send(true);

    // Phase 1: consumer stops receiving and drains workers (it enforces
    // processing_drain_s itself; the overall deadline is the backstop).
    let budget = deadline.saturating_duration_since(Instant::now());
    let consumer_abort = consumer_join.abort_handle();
    if timeout(budget, consumer_join).await.is_err() {
        warn!("consumer did not stop within the shutdown budget");
        consumer_abort.abort();
    }

    // Phase 2: final batch flush.
    let budget = Duration::from_secs(cfg.shutdown.publish_drain_s)
        .min(deadline.saturating_duration_since(Instant::now()));
    let batcher_abort = batcher_join.abort_handle();
    match timeout(budget, batcher_handle.flush()).await {
        Ok(Ok(())) => {
            info!("final flush complete");
            // Let the batcher task observe channel closure and exit.
            drop(batcher_handle);
            let budget = deadline.saturating_duration_since(Instant::now());
            if timeout(budget, batcher_join).await.is_err() {
                warn!("batcher did not stop within the shutdown budget");
                batcher_abort.abort();
            }
        }
        Ok(Err(_)) | Err(_) => {
            // Stop the batcher before counting, so an abandoned record
            // cannot also publish afterwards.
            batcher_abort.abort();
            let lost = metrics.pending_batch_records.get();
            metrics.lost_on_shutdown.add(lost);
            warn!(
                lost_records = lost,
                "publish drain deadline exceeded, abandoning pending records"
            );
        }
    }

    metrics_join.abort();
    let snapshot = metrics.snapshot();
    info!(
        accepted = snapshot.accepted,
        published_records = snapshot.published_records,
        publish_gave_up = snapshot.publish_gave_up,
        lost_on_shutdown = snapshot.lost_on_shutdown,
        "pipeline stopped"
    );
    info!(snapshot = ?snapshot, "final counters");
}

/// Log a metrics snapshot on an interval until shutdown.
async fn log_metrics_periodically(
    metrics: Arc<PipelineMetrics>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticks = tokio::time::interval(interval);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticks.tick().await;
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticks.tick() => {
                info!(snapshot = ?metrics.snapshot(), "pipeline counters");
            }
        }
    }
}

/// Resolve when the process is asked to stop.
///
/// SIGTERM and SIGINT both lead into the same phased drain; the signal name
/// is recorded so shutdown counters can be correlated with who asked.
pub async fn shutdown_signal() {
    let signal_name = wait_for_stop_request().await;
    info!(signal = signal_name, stage = "shutdown", "stop requested, starting drain");
}

#[cfg(unix)]
async fn wait_for_stop_request() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_request() -> &'static str {
    tokio::signal::ctrl_c().await.expect("ctrl-c handler");
    "ctrl-c"
}
