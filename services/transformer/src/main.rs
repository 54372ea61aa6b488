// transformer: Consumes upload notifications, transforms scan payloads into
// normalized WiFi measurements, and publishes them in batches.
//
// The binary wires the local filesystem backends; cloud deployments embed
// the library and inject their own MessageSource/ObjectStore/DeliveryStream.

use clap::{Arg, Command};
use std::sync::Arc;
use tracing::info;
use transformer::config::{self, TransformerConfig};
use transformer::fs_store::{FsDeliveryStream, FsMessageSource, FsObjectStore};
use transformer::lifecycle::{self, PipelineDeps};
use transformer::metrics::PipelineMetrics;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "transformer starting");

    let matches = Command::new("WiFi Scan Transformer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Transforms uploaded WiFi scan payloads into normalized measurements")
        .arg(
            Arg::new("config")
                .help("Path to transformer.toml")
                .long("config")
                .short('c')
                .value_name("PATH"),
        )
        .get_matches();

    let cfg = match matches.get_one::<String>("config") {
        Some(path) => config::load_config_from_path(std::path::Path::new(path)),
        None => config::load_config(),
    };
    let cfg = match cfg {
        Ok(cfg) => {
            info!(
                queue_url = %cfg.queue.url,
                stream_name = %cfg.delivery.stream_name,
                max_concurrent_messages = cfg.queue.max_concurrent_messages,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let deps = match build_fs_deps(&cfg) {
        Ok(deps) => deps,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    let metrics = Arc::new(PipelineMetrics::new());
    lifecycle::run_pipeline(cfg, deps, metrics, lifecycle::shutdown_signal()).await;
    info!("transformer shut down gracefully");
}

/// Wire the local filesystem backends from config.
fn build_fs_deps(cfg: &TransformerConfig) -> Result<PipelineDeps, String> {
    let spool_dir = cfg
        .queue
        .url
        .strip_prefix("spool://")
        .ok_or_else(|| format!("unsupported queue.url scheme: '{}' (expected spool://<dir>)", cfg.queue.url))?;
    let object_root = cfg
        .object
        .root
        .as_deref()
        .ok_or("object.root is required when running with the filesystem backend")?;
    let out_dir = cfg
        .delivery
        .out_dir
        .as_deref()
        .ok_or("delivery.out_dir is required when running with the filesystem backend")?;

    Ok(PipelineDeps {
        source: Arc::new(FsMessageSource::new(spool_dir)),
        store: Arc::new(FsObjectStore::new(object_root)),
        delivery: Arc::new(FsDeliveryStream::new(out_dir)),
    })
}
