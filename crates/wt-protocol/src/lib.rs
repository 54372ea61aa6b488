// wt-protocol: Data model and capability interfaces for the WiFi scan
// transformer pipeline.
//
// Three data layers, in processing order: the upload-notification envelope
// that arrives on the queue, the device-reported scan payload decoded from
// object lines, and the normalized measurement schema published downstream.
// The `ports` module holds the injected queue/store/stream interfaces the
// service and its test fakes both implement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod de;
pub mod ports;

// ---------------------------------------------------------------------------
// Upload notification envelope (queue message body)
// ---------------------------------------------------------------------------

/// An object-created notification envelope, S3 notification shaped.
///
/// One envelope may carry several records; the transformer processes the
/// first and counts the rest (one queue message maps to one upload event).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Notification {
    #[serde(rename = "Records")]
    pub records: Vec<NotificationRecord>,
}

/// A single object-created record inside a [`Notification`].
///
/// `event_id` is stamped by the upstream ingestion stage (UUID); the rest is
/// standard S3 notification structure. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event_time: Option<String>,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub response_elements: ResponseElements,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ResponseElements {
    #[serde(default, rename = "x-amz-request-id")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct S3Entity {
    pub bucket: BucketRef,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BucketRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObjectRef {
    pub key: String,
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub size: Option<u64>,
    #[serde(default, rename = "eTag")]
    pub e_tag: Option<String>,
}

/// The validated, immutable upload event a worker drives end-to-end.
///
/// Constructed once from a queue message body; discarded when the message is
/// acked or redelivered. `stream_name` is derived from the object key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadEvent {
    pub event_id: String,
    pub event_time: Option<DateTime<Utc>>,
    pub bucket: String,
    pub object_key: String,
    pub object_size: Option<u64>,
    pub etag: Option<String>,
    pub stream_name: String,
    pub request_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Device scan payload (decoded from one object line)
// ---------------------------------------------------------------------------

/// One decoded device report.
///
/// Missing top-level blocks are treated as empty sequences; unknown fields
/// are ignored. Numeric fields tolerate string-typed values (see [`de`]).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanPayload {
    #[serde(default)]
    pub device_metadata: DeviceMetadata,
    #[serde(default)]
    pub connected_events: Vec<ConnectedEvent>,
    #[serde(default)]
    pub disconnected_events: Vec<DisconnectedEvent>,
    #[serde(default)]
    pub scan_results: Vec<ScanResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetadata {
    #[serde(default)]
    pub os_name: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub os_version: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub app_name_version: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub data_version: Option<String>,
}

/// Device location fix attached to connected events and scan results.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiLocation {
    #[serde(default, deserialize_with = "de::opt_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_f64")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_f64")]
    pub altitude: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_f64")]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "de::opt_f64")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_f64")]
    pub bearing: Option<f64>,
    #[serde(default, deserialize_with = "de::opt_i64")]
    pub timestamp: Option<i64>,
}

/// An active WiFi association report (CONNECTED tier source row).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedEvent {
    #[serde(default, deserialize_with = "de::opt_i64")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub location: Option<WifiLocation>,
    #[serde(default)]
    pub bssid: Option<String>,
    #[serde(default)]
    pub ssid: Option<String>,
    #[serde(default, deserialize_with = "de::opt_i32")]
    pub rssi: Option<i32>,
    #[serde(default, deserialize_with = "de::opt_i32")]
    pub frequency: Option<i32>,
    #[serde(default, deserialize_with = "de::opt_i32")]
    pub link_speed: Option<i32>,
    #[serde(default, deserialize_with = "de::opt_i32")]
    pub channel_width: Option<i32>,
    #[serde(default, deserialize_with = "de::opt_i32")]
    pub center_freq0: Option<i32>,
    #[serde(default, deserialize_with = "de::opt_i32")]
    pub center_freq1: Option<i32>,
    #[serde(default)]
    pub capabilities: Option<String>,
    #[serde(default, rename = "is80211mcResponder")]
    pub is_80211mc_responder: Option<bool>,
    #[serde(default)]
    pub is_passpoint_network: Option<bool>,
    #[serde(default)]
    pub operator_friendly_name: Option<String>,
    #[serde(default)]
    pub venue_name: Option<String>,
    #[serde(default)]
    pub is_captive: Option<bool>,
    #[serde(default, deserialize_with = "de::opt_i32")]
    pub num_scan_results: Option<i32>,
}

/// A disassociation report. Observed for metrics only; produces no
/// measurements.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectedEvent {
    #[serde(default, deserialize_with = "de::opt_i64")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub bssid: Option<String>,
}

/// One passive scan sweep: a location fix plus the visible access points.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    #[serde(default, deserialize_with = "de::opt_i64")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub location: Option<WifiLocation>,
    #[serde(default)]
    pub results: Vec<ScanEntry>,
}

/// One access point observed in a scan sweep (SCAN tier source row).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEntry {
    #[serde(default)]
    pub bssid: Option<String>,
    #[serde(default)]
    pub ssid: Option<String>,
    // Android reports signal strength as "level"; older app builds say "rssi".
    #[serde(default, alias = "level", deserialize_with = "de::opt_i32")]
    pub rssi: Option<i32>,
    #[serde(default, deserialize_with = "de::opt_i32")]
    pub frequency: Option<i32>,
}

// ---------------------------------------------------------------------------
// Measurement schema (published record)
// ---------------------------------------------------------------------------

/// Connection tier of a measurement.
///
/// | Tier      | Source row           | Weight |
/// |-----------|----------------------|--------|
/// | CONNECTED | connected-event      | 2.0    |
/// | SCAN      | scan-result entry    | 1.0    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Connected,
    Scan,
}

impl ConnectionStatus {
    pub fn quality_weight(self) -> f64 {
        match self {
            ConnectionStatus::Connected => 2.0,
            ConnectionStatus::Scan => 1.0,
        }
    }
}

/// One normalized measurement row.
///
/// Identity is (`bssid`, `measurement_timestamp`, `event_id`). Derived from
/// exactly one source row; every measurement from one upload event shares a
/// `processing_batch_id`. Optional fields stay null for SCAN-tier records
/// (connected-only enrichment) and for data the reporter did not provide;
/// sanity filtering guarantees the identity and range invariants before a
/// record reaches the batcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    // Identity
    pub bssid: Option<String>,
    pub measurement_timestamp: Option<i64>,
    pub event_id: String,
    // Location block
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub location_accuracy: Option<f64>,
    pub location_provider: Option<String>,
    pub location_source: Option<String>,
    pub speed: Option<f64>,
    pub bearing: Option<f64>,
    pub location_timestamp: Option<i64>,
    // Signal block
    pub ssid: Option<String>,
    pub rssi: Option<i32>,
    pub frequency: Option<i32>,
    pub scan_timestamp: Option<i64>,
    // Connection tier
    pub connection_status: ConnectionStatus,
    pub quality_weight: f64,
    // Connected-only enrichment (null for SCAN)
    pub link_speed: Option<i32>,
    pub channel_width: Option<i32>,
    pub center_freq0: Option<i32>,
    pub center_freq1: Option<i32>,
    pub capabilities: Option<String>,
    pub is_80211mc_responder: Option<bool>,
    pub is_passpoint_network: Option<bool>,
    pub operator_friendly_name: Option<String>,
    pub venue_name: Option<String>,
    pub is_captive: Option<bool>,
    pub num_scan_results: Option<i32>,
    // Provenance
    pub ingestion_timestamp: i64,
    pub data_version: Option<String>,
    pub processing_batch_id: String,
    pub quality_score: f64,
    // Policy / outlier fields (left null at this stage except hotspot FLAG)
    pub is_mobile_hotspot: Option<bool>,
    pub is_global_outlier: Option<bool>,
    pub global_outlier_distance_km: Option<f64>,
}

// ---------------------------------------------------------------------------
// Shape validators
// ---------------------------------------------------------------------------

/// True when `s` is a MAC address of the form `HH:HH:HH:HH:HH:HH`
/// (case-insensitive hex).
pub fn is_bssid(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() != 17 {
        return false;
    }
    for (i, &c) in b.iter().enumerate() {
        if i % 3 == 2 {
            if c != b':' {
                return false;
            }
        } else if !c.is_ascii_hexdigit() {
            return false;
        }
    }
    true
}

/// Extract the OUI (first 24 bits) of a valid BSSID, uppercased without
/// separators, e.g. `"AA:bb:cc:dd:ee:ff"` → `"AABBCC"`.
pub fn bssid_oui(s: &str) -> Option<String> {
    if !is_bssid(s) {
        return None;
    }
    let mut oui = String::with_capacity(6);
    for part in s.split(':').take(3) {
        oui.push_str(&part.to_ascii_uppercase());
    }
    Some(oui)
}

/// True when `s` is a standard 8-4-4-4-12 UUID (case-insensitive hex).
pub fn is_uuid(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() != 36 {
        return false;
    }
    for (i, &c) in b.iter().enumerate() {
        if matches!(i, 8 | 13 | 18 | 23) {
            if c != b'-' {
                return false;
            }
        } else if !c.is_ascii_hexdigit() {
            return false;
        }
    }
    true
}

/// True when `s` is a 32-digit hex ETag (case-insensitive, no quotes).
pub fn is_etag(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bssid_accepts_mixed_case_and_rejects_malformed() {
        assert!(is_bssid("AA:BB:CC:DD:EE:01"));
        assert!(is_bssid("aa:bb:cc:dd:ee:ff"));
        assert!(is_bssid("Aa:0b:C1:dD:9e:f0"));
        assert!(!is_bssid(""));
        assert!(!is_bssid("AA:BB:CC:DD:EE"));
        assert!(!is_bssid("AA:BB:CC:DD:EE:GG"));
        assert!(!is_bssid("AA-BB-CC-DD-EE-01"));
        assert!(!is_bssid("AA:BB:CC:DD:EE:011"));
    }

    #[test]
    fn oui_is_uppercased_first_three_octets() {
        assert_eq!(bssid_oui("aa:bb:cc:dd:ee:01").as_deref(), Some("AABBCC"));
        assert_eq!(bssid_oui("02:1A:11:00:00:00").as_deref(), Some("021A11"));
        assert_eq!(bssid_oui("not-a-mac"), None);
    }

    #[test]
    fn uuid_shape_check() {
        assert!(is_uuid("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0"));
        assert!(is_uuid("0F1E2D3C-4B5A-6978-8796-A5B4C3D2E1F0"));
        assert!(!is_uuid("0f1e2d3c4b5a69788796a5b4c3d2e1f0"));
        assert!(!is_uuid("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1fg"));
    }

    #[test]
    fn etag_shape_check() {
        assert!(is_etag("d41d8cd98f00b204e9800998ecf8427e"));
        assert!(is_etag("D41D8CD98F00B204E9800998ECF8427E"));
        assert!(!is_etag("d41d8cd98f00b204e9800998ecf8427"));
        assert!(!is_etag("d41d8cd98f00b204e9800998ecf8427e-2"));
    }

    #[test]
    fn scan_payload_missing_blocks_default_to_empty() {
        let p: ScanPayload = serde_json::from_str("{}").unwrap();
        assert!(p.connected_events.is_empty());
        assert!(p.disconnected_events.is_empty());
        assert!(p.scan_results.is_empty());
    }

    #[test]
    fn scan_payload_ignores_unknown_fields() {
        let p: ScanPayload = serde_json::from_str(
            r#"{"futureBlock":{"x":1},"scanResults":[{"timestamp":1700000000000,"extra":true,"results":[]}]}"#,
        )
        .unwrap();
        assert_eq!(p.scan_results.len(), 1);
        assert_eq!(p.scan_results[0].timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn scan_entry_accepts_level_alias_for_rssi() {
        let e: ScanEntry =
            serde_json::from_str(r#"{"bssid":"AA:BB:CC:DD:EE:02","level":-70}"#).unwrap();
        assert_eq!(e.rssi, Some(-70));
    }

    #[test]
    fn connection_status_weights() {
        assert_eq!(ConnectionStatus::Connected.quality_weight(), 2.0);
        assert_eq!(ConnectionStatus::Scan.quality_weight(), 1.0);
    }
}
