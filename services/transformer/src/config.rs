//! Transformer configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/wifi-transformer/transformer.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `queue.url`
//! - `delivery.stream_name`
//!
//! Everything else has a default.  Every bound below comes from the
//! downstream hard limits (500 records / 4 MiB per call, 1 MiB per record)
//! or the queue contract (receive 1-10, long-poll 0-20 s); violations are
//! fatal at startup.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level transformer configuration, immutable after load.
#[derive(Debug, Clone)]
pub struct TransformerConfig {
    pub schema_version: u32,
    pub metrics_log_interval_s: u64,
    pub queue: QueueConfig,
    pub object: ObjectConfig,
    pub filter: FilterConfig,
    pub delivery: DeliveryConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Source queue identifier.  The shipped binary understands
    /// `spool://<dir>` (local spool directory); other schemes are wired by
    /// embedding the library with a custom `MessageSource`.
    pub url: String,
    pub max_messages_per_receive: usize,
    pub wait_seconds: u64,
    pub visibility_timeout_s: u64,
    pub max_concurrent_messages: usize,
    /// Receive pause while the batcher is above its high-water mark.
    pub backpressure_cooldown_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ObjectConfig {
    /// Object store root for the local filesystem backend (binary only).
    pub root: Option<String>,
    /// Hard cap on one encoded line; longer lines are dropped.
    pub max_line_bytes: usize,
    /// Hard cap on one decompressed document.
    pub max_decoded_bytes: usize,
    /// Idle timeout for a single object read.
    pub stream_read_timeout_s: u64,
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub accuracy_threshold_m: f64,
    pub mobile_hotspot: MobileHotspotConfig,
}

#[derive(Debug, Clone)]
pub struct MobileHotspotConfig {
    pub enabled: bool,
    pub action: HotspotAction,
    /// OUIs as 6 hex digits, e.g. `"021A11"`.
    pub ouis: Vec<String>,
}

/// What to do with a record whose BSSID OUI is in the hotspot set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotspotAction {
    Flag,
    Exclude,
    LogOnly,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub stream_name: String,
    /// Output directory for the local filesystem backend (binary only).
    pub out_dir: Option<String>,
    pub max_records_per_batch: usize,
    pub max_batch_bytes: usize,
    pub max_record_bytes: usize,
    pub batch_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub publish_timeout_ms: u64,
}

impl DeliveryConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    pub processing_drain_s: u64,
    pub publish_drain_s: u64,
    pub max_total_s: u64,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    metrics_log_interval_s: Option<u64>,
    queue: Option<RawQueueConfig>,
    object: Option<RawObjectConfig>,
    filter: Option<RawFilterConfig>,
    delivery: Option<RawDeliveryConfig>,
    shutdown: Option<RawShutdownConfig>,
}

#[derive(Debug, Deserialize)]
struct RawQueueConfig {
    url: Option<String>,
    max_messages_per_receive: Option<usize>,
    wait_seconds: Option<u64>,
    visibility_timeout_s: Option<u64>,
    max_concurrent_messages: Option<usize>,
    backpressure_cooldown_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawObjectConfig {
    root: Option<String>,
    max_line_bytes: Option<usize>,
    max_decoded_bytes: Option<usize>,
    stream_read_timeout_s: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawFilterConfig {
    accuracy_threshold_m: Option<f64>,
    mobile_hotspot: Option<RawMobileHotspotConfig>,
}

#[derive(Debug, Deserialize)]
struct RawMobileHotspotConfig {
    enabled: Option<bool>,
    action: Option<String>,
    ouis: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawDeliveryConfig {
    stream_name: Option<String>,
    out_dir: Option<String>,
    max_records_per_batch: Option<usize>,
    max_batch_bytes: Option<usize>,
    max_record_bytes: Option<usize>,
    batch_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    publish_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawShutdownConfig {
    processing_drain_s: Option<u64>,
    publish_drain_s: Option<u64>,
    max_total_s: Option<u64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<TransformerConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load config from the default path `/etc/wifi-transformer/transformer.toml`.
pub fn load_config() -> Result<TransformerConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/wifi-transformer/transformer.toml"))
}

/// Load config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<TransformerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let metrics_log_interval_s = raw.metrics_log_interval_s.unwrap_or(60);

    // Queue
    let raw_queue = raw
        .queue
        .ok_or_else(|| ConfigError::MissingField("queue".to_owned()))?;
    let url = raw_queue
        .url
        .ok_or_else(|| ConfigError::MissingField("queue.url".to_owned()))?;
    let queue = QueueConfig {
        url,
        max_messages_per_receive: in_range(
            "queue.max_messages_per_receive",
            raw_queue.max_messages_per_receive.unwrap_or(10),
            1,
            10,
        )?,
        wait_seconds: in_range("queue.wait_seconds", raw_queue.wait_seconds.unwrap_or(20), 0, 20)?,
        visibility_timeout_s: in_range(
            "queue.visibility_timeout_s",
            raw_queue.visibility_timeout_s.unwrap_or(60),
            30,
            u64::MAX,
        )?,
        max_concurrent_messages: in_range(
            "queue.max_concurrent_messages",
            raw_queue.max_concurrent_messages.unwrap_or(10),
            1,
            usize::MAX,
        )?,
        backpressure_cooldown_ms: raw_queue.backpressure_cooldown_ms.unwrap_or(1000),
    };

    // Object
    let raw_object = raw.object.unwrap_or(RawObjectConfig {
        root: None,
        max_line_bytes: None,
        max_decoded_bytes: None,
        stream_read_timeout_s: None,
    });
    let object = ObjectConfig {
        root: raw_object.root,
        max_line_bytes: in_range(
            "object.max_line_bytes",
            raw_object.max_line_bytes.unwrap_or(256 * 1024),
            1024,
            usize::MAX,
        )?,
        max_decoded_bytes: in_range(
            "object.max_decoded_bytes",
            raw_object.max_decoded_bytes.unwrap_or(1024 * 1024),
            1024,
            usize::MAX,
        )?,
        stream_read_timeout_s: in_range(
            "object.stream_read_timeout_s",
            raw_object.stream_read_timeout_s.unwrap_or(30),
            1,
            u64::MAX,
        )?,
    };

    // Filter
    let raw_filter = raw.filter.unwrap_or(RawFilterConfig {
        accuracy_threshold_m: None,
        mobile_hotspot: None,
    });
    let accuracy_threshold_m = raw_filter.accuracy_threshold_m.unwrap_or(150.0);
    if !accuracy_threshold_m.is_finite() || accuracy_threshold_m <= 0.0 {
        return Err(ConfigError::InvalidValue(format!(
            "filter.accuracy_threshold_m must be positive, got {accuracy_threshold_m}"
        )));
    }
    let raw_hotspot = raw_filter.mobile_hotspot.unwrap_or(RawMobileHotspotConfig {
        enabled: None,
        action: None,
        ouis: None,
    });
    let action = match raw_hotspot.action.as_deref() {
        None | Some("EXCLUDE") => HotspotAction::Exclude,
        Some("FLAG") => HotspotAction::Flag,
        Some("LOG_ONLY") => HotspotAction::LogOnly,
        Some(other) => {
            return Err(ConfigError::InvalidValue(format!(
                "filter.mobile_hotspot.action must be FLAG, EXCLUDE or LOG_ONLY, got '{other}'"
            )));
        }
    };
    let mut ouis = Vec::new();
    for oui in raw_hotspot.ouis.unwrap_or_default() {
        if oui.len() != 6 || !oui.bytes().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::InvalidValue(format!(
                "filter.mobile_hotspot.ouis entries must be 6 hex digits, got '{oui}'"
            )));
        }
        ouis.push(oui.to_ascii_uppercase());
    }
    let filter = FilterConfig {
        accuracy_threshold_m,
        mobile_hotspot: MobileHotspotConfig {
            enabled: raw_hotspot.enabled.unwrap_or(false),
            action,
            ouis,
        },
    };

    // Delivery
    let raw_delivery = raw
        .delivery
        .ok_or_else(|| ConfigError::MissingField("delivery".to_owned()))?;
    let stream_name = raw_delivery
        .stream_name
        .ok_or_else(|| ConfigError::MissingField("delivery.stream_name".to_owned()))?;
    let delivery = DeliveryConfig {
        stream_name,
        out_dir: raw_delivery.out_dir,
        max_records_per_batch: in_range(
            "delivery.max_records_per_batch",
            raw_delivery.max_records_per_batch.unwrap_or(500),
            1,
            500,
        )?,
        max_batch_bytes: in_range(
            "delivery.max_batch_bytes",
            raw_delivery.max_batch_bytes.unwrap_or(4 * 1024 * 1024),
            1024,
            4 * 1024 * 1024,
        )?,
        max_record_bytes: in_range(
            "delivery.max_record_bytes",
            raw_delivery.max_record_bytes.unwrap_or(1024 * 1024),
            1024,
            1024 * 1024,
        )?,
        batch_timeout_ms: in_range(
            "delivery.batch_timeout_ms",
            raw_delivery.batch_timeout_ms.unwrap_or(2000),
            1,
            u64::MAX,
        )?,
        max_retries: in_range("delivery.max_retries", raw_delivery.max_retries.unwrap_or(3), 0, 10)?,
        retry_backoff_ms: raw_delivery.retry_backoff_ms.unwrap_or(200),
        publish_timeout_ms: raw_delivery.publish_timeout_ms.unwrap_or(5000),
    };
    if delivery.max_record_bytes > delivery.max_batch_bytes {
        return Err(ConfigError::InvalidValue(format!(
            "delivery.max_record_bytes ({}) must not exceed delivery.max_batch_bytes ({})",
            delivery.max_record_bytes, delivery.max_batch_bytes
        )));
    }

    // Shutdown
    let raw_shutdown = raw.shutdown.unwrap_or(RawShutdownConfig {
        processing_drain_s: None,
        publish_drain_s: None,
        max_total_s: None,
    });
    let shutdown = ShutdownConfig {
        processing_drain_s: raw_shutdown.processing_drain_s.unwrap_or(10),
        publish_drain_s: raw_shutdown.publish_drain_s.unwrap_or(15),
        max_total_s: raw_shutdown.max_total_s.unwrap_or(30),
    };

    Ok(TransformerConfig {
        schema_version,
        metrics_log_interval_s,
        queue,
        object,
        filter,
        delivery,
        shutdown,
    })
}

fn in_range<T: PartialOrd + Copy + std::fmt::Display>(
    field: &str,
    value: T,
    min: T,
    max: T,
) -> Result<T, ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::InvalidValue(format!(
            "{field} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Fatal configuration error; the service refuses to start.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}
