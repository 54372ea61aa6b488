//! Scan payload → measurement expansion.
//!
//! One connected-event yields one CONNECTED measurement with the wifi
//! enrichment populated; one scan-result yields one SCAN measurement per
//! inner entry with the enrichment null.  Disconnected-events produce
//! nothing (the worker counts them).  Expansion is lazy: candidates are
//! produced on demand and `ingestion_timestamp` is stamped at emission.
//!
//! Every candidate from one upload event carries the same
//! `processing_batch_id`; sanity filtering happens downstream.

use chrono::Utc;
use tracing::warn;
use wt_protocol::{ConnectedEvent, ConnectionStatus, Measurement, ScanEntry, ScanPayload,
                  ScanResult, WifiLocation};

/// Decode one JSON document into the scan payload model.
///
/// Malformed JSON is logged at WARN and skipped; the surrounding object
/// stream continues.
pub fn parse_payload(doc: &str) -> Option<ScanPayload> {
    match serde_json::from_str::<ScanPayload>(doc) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(stage = "parse", error_kind = "json", error = %e, "document dropped");
            None
        }
    }
}

/// Expand one payload into measurement candidates.
pub fn expand<'a>(
    payload: &'a ScanPayload,
    event_id: &'a str,
    processing_batch_id: &'a str,
    accuracy_threshold_m: f64,
) -> impl Iterator<Item = Measurement> + 'a {
    let data_version = payload.device_metadata.data_version.as_deref();

    let connected = payload.connected_events.iter().map(move |ev| {
        from_connected(ev, event_id, processing_batch_id, data_version, accuracy_threshold_m)
    });

    let scans = payload.scan_results.iter().flat_map(move |sweep| {
        sweep.results.iter().map(move |entry| {
            from_scan_entry(
                sweep,
                entry,
                event_id,
                processing_batch_id,
                data_version,
                accuracy_threshold_m,
            )
        })
    });

    connected.chain(scans)
}

// ---------------------------------------------------------------------------
// Per-tier constructors
// ---------------------------------------------------------------------------

fn from_connected(
    ev: &ConnectedEvent,
    event_id: &str,
    processing_batch_id: &str,
    data_version: Option<&str>,
    accuracy_threshold_m: f64,
) -> Measurement {
    let status = ConnectionStatus::Connected;
    let location = ev.location.as_ref();
    Measurement {
        bssid: ev.bssid.clone(),
        measurement_timestamp: ev.timestamp,
        event_id: event_id.to_owned(),
        latitude: location.and_then(|l| l.latitude),
        longitude: location.and_then(|l| l.longitude),
        altitude: location.and_then(|l| l.altitude),
        location_accuracy: location.and_then(|l| l.accuracy),
        location_provider: location.and_then(|l| l.provider.clone()),
        location_source: location.and_then(|l| l.source.clone()),
        speed: location.and_then(|l| l.speed),
        bearing: location.and_then(|l| l.bearing),
        location_timestamp: location.and_then(|l| l.timestamp),
        ssid: ev.ssid.clone(),
        rssi: ev.rssi,
        frequency: ev.frequency,
        scan_timestamp: None,
        connection_status: status,
        quality_weight: status.quality_weight(),
        link_speed: ev.link_speed,
        channel_width: ev.channel_width,
        center_freq0: ev.center_freq0,
        center_freq1: ev.center_freq1,
        capabilities: ev.capabilities.clone(),
        is_80211mc_responder: ev.is_80211mc_responder,
        is_passpoint_network: ev.is_passpoint_network,
        operator_friendly_name: ev.operator_friendly_name.clone(),
        venue_name: ev.venue_name.clone(),
        is_captive: ev.is_captive,
        num_scan_results: ev.num_scan_results,
        ingestion_timestamp: Utc::now().timestamp_millis(),
        data_version: data_version.map(str::to_owned),
        processing_batch_id: processing_batch_id.to_owned(),
        quality_score: quality_score(status, location, accuracy_threshold_m),
        is_mobile_hotspot: None,
        is_global_outlier: None,
        global_outlier_distance_km: None,
    }
}

fn from_scan_entry(
    sweep: &ScanResult,
    entry: &ScanEntry,
    event_id: &str,
    processing_batch_id: &str,
    data_version: Option<&str>,
    accuracy_threshold_m: f64,
) -> Measurement {
    let status = ConnectionStatus::Scan;
    let location = sweep.location.as_ref();
    Measurement {
        bssid: entry.bssid.clone(),
        measurement_timestamp: sweep.timestamp,
        event_id: event_id.to_owned(),
        latitude: location.and_then(|l| l.latitude),
        longitude: location.and_then(|l| l.longitude),
        altitude: location.and_then(|l| l.altitude),
        location_accuracy: location.and_then(|l| l.accuracy),
        location_provider: location.and_then(|l| l.provider.clone()),
        location_source: location.and_then(|l| l.source.clone()),
        speed: location.and_then(|l| l.speed),
        bearing: location.and_then(|l| l.bearing),
        location_timestamp: location.and_then(|l| l.timestamp),
        ssid: entry.ssid.clone(),
        rssi: entry.rssi,
        frequency: entry.frequency,
        scan_timestamp: sweep.timestamp,
        connection_status: status,
        quality_weight: status.quality_weight(),
        link_speed: None,
        channel_width: None,
        center_freq0: None,
        center_freq1: None,
        capabilities: None,
        is_80211mc_responder: None,
        is_passpoint_network: None,
        operator_friendly_name: None,
        venue_name: None,
        is_captive: None,
        num_scan_results: None,
        ingestion_timestamp: Utc::now().timestamp_millis(),
        data_version: data_version.map(str::to_owned),
        processing_batch_id: processing_batch_id.to_owned(),
        quality_score: quality_score(status, location, accuracy_threshold_m),
        is_mobile_hotspot: None,
        is_global_outlier: None,
        global_outlier_distance_km: None,
    }
}

/// Quality score in [0, 1]: the tier weight normalised to 1.0, degraded
/// linearly by reported GPS accuracy up to the filter threshold.
fn quality_score(
    status: ConnectionStatus,
    location: Option<&WifiLocation>,
    accuracy_threshold_m: f64,
) -> f64 {
    let tier = status.quality_weight() / 2.0;
    let accuracy_factor = match location.and_then(|l| l.accuracy) {
        Some(acc) if acc.is_finite() && acc >= 0.0 => {
            1.0 - 0.5 * (acc / accuracy_threshold_m).clamp(0.0, 1.0)
        }
        _ => 1.0,
    };
    tier * accuracy_factor
}
