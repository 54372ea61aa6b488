//! Contract tests pinning the external JSON shapes: the notification
//! envelope accepted from the queue and the measurement schema published to
//! the delivery stream. These shapes are consumed by other teams — field
//! renames here are breaking changes.

use wt_protocol::{ConnectionStatus, Measurement, Notification, ScanPayload};

fn sample_measurement() -> Measurement {
    Measurement {
        bssid: Some("AA:BB:CC:DD:EE:01".to_owned()),
        measurement_timestamp: Some(1_714_000_000_000),
        event_id: "0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0".to_owned(),
        latitude: Some(40.7),
        longitude: Some(-74.0),
        altitude: Some(12.5),
        location_accuracy: Some(20.0),
        location_provider: Some("gps".to_owned()),
        location_source: Some("fused".to_owned()),
        speed: Some(1.2),
        bearing: Some(270.0),
        location_timestamp: Some(1_713_999_999_500),
        ssid: Some("CoffeeShop".to_owned()),
        rssi: Some(-65),
        frequency: Some(2437),
        scan_timestamp: None,
        connection_status: ConnectionStatus::Connected,
        quality_weight: 2.0,
        link_speed: Some(144),
        channel_width: Some(1),
        center_freq0: Some(2437),
        center_freq1: None,
        capabilities: Some("[WPA2-PSK-CCMP][ESS]".to_owned()),
        is_80211mc_responder: Some(false),
        is_passpoint_network: Some(false),
        operator_friendly_name: None,
        venue_name: None,
        is_captive: Some(false),
        num_scan_results: Some(11),
        ingestion_timestamp: 1_714_000_050_000,
        data_version: Some("3".to_owned()),
        processing_batch_id: "5c3b1a09-8d7e-4f60-92a1-b0c9d8e7f6a5".to_owned(),
        quality_score: 0.95,
        is_mobile_hotspot: None,
        is_global_outlier: None,
        global_outlier_distance_km: None,
    }
}

#[test]
fn measurement_serializes_with_frozen_field_names() {
    let json = serde_json::to_value(sample_measurement()).unwrap();
    let obj = json.as_object().unwrap();

    for field in [
        "bssid",
        "measurement_timestamp",
        "event_id",
        "latitude",
        "longitude",
        "altitude",
        "location_accuracy",
        "location_provider",
        "location_source",
        "speed",
        "bearing",
        "location_timestamp",
        "ssid",
        "rssi",
        "frequency",
        "scan_timestamp",
        "connection_status",
        "quality_weight",
        "link_speed",
        "channel_width",
        "center_freq0",
        "center_freq1",
        "capabilities",
        "is_80211mc_responder",
        "is_passpoint_network",
        "operator_friendly_name",
        "venue_name",
        "is_captive",
        "num_scan_results",
        "ingestion_timestamp",
        "data_version",
        "processing_batch_id",
        "quality_score",
        "is_mobile_hotspot",
        "is_global_outlier",
        "global_outlier_distance_km",
    ] {
        assert!(obj.contains_key(field), "missing field: {field}");
    }

    assert_eq!(obj["connection_status"], "CONNECTED");
    assert_eq!(obj["quality_weight"], 2.0);
    assert!(obj["scan_timestamp"].is_null());
    assert!(obj["is_global_outlier"].is_null());
}

#[test]
fn measurement_round_trips() {
    let m = sample_measurement();
    let json = serde_json::to_string(&m).unwrap();
    let back: Measurement = serde_json::from_str(&json).unwrap();
    assert_eq!(m, back);
}

#[test]
fn scan_tier_serializes_as_scan() {
    let mut m = sample_measurement();
    m.connection_status = ConnectionStatus::Scan;
    m.quality_weight = 1.0;
    let json = serde_json::to_value(&m).unwrap();
    assert_eq!(json["connection_status"], "SCAN");
    assert_eq!(json["quality_weight"], 1.0);
}

#[test]
fn notification_envelope_parses_s3_object_created_record() {
    let body = r#"{
        "Records": [
            {
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "eventId": "0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0",
                "eventTime": "2026-03-01T12:00:00.000Z",
                "eventName": "ObjectCreated:Put",
                "responseElements": { "x-amz-request-id": "REQ123456789" },
                "s3": {
                    "bucket": { "name": "wifi-scan-landing", "arn": "arn:aws:s3:::wifi-scan-landing" },
                    "object": {
                        "key": "uploads/wifi-scans-2026-03-01-12-00-00-abc123.gz",
                        "size": 10240,
                        "eTag": "d41d8cd98f00b204e9800998ecf8427e",
                        "sequencer": "0055AED6DCD90281E5"
                    }
                }
            }
        ]
    }"#;

    let n: Notification = serde_json::from_str(body).unwrap();
    assert_eq!(n.records.len(), 1);
    let r = &n.records[0];
    assert_eq!(
        r.event_id.as_deref(),
        Some("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0")
    );
    assert_eq!(r.s3.bucket.name, "wifi-scan-landing");
    assert_eq!(
        r.s3.object.key,
        "uploads/wifi-scans-2026-03-01-12-00-00-abc123.gz"
    );
    assert_eq!(r.s3.object.size, Some(10240));
    assert_eq!(
        r.s3.object.e_tag.as_deref(),
        Some("d41d8cd98f00b204e9800998ecf8427e")
    );
    assert_eq!(r.response_elements.request_id.as_deref(), Some("REQ123456789"));
}

#[test]
fn scan_payload_parses_full_device_report_with_string_numerics() {
    let doc = r#"{
        "deviceMetadata": {
            "osName": "Android",
            "osVersion": 14,
            "model": "Pixel 8",
            "manufacturer": "Google",
            "appNameVersion": "scanner/2.4.1",
            "dataVersion": "3"
        },
        "connectedEvents": [
            {
                "timestamp": "1714000000000",
                "location": {
                    "latitude": "40.7",
                    "longitude": -74.0,
                    "accuracy": 20,
                    "provider": "gps",
                    "timestamp": 1713999999500
                },
                "bssid": "AA:BB:CC:DD:EE:01",
                "ssid": "CoffeeShop",
                "rssi": "-65",
                "frequency": 2437,
                "linkSpeed": 144,
                "is80211mcResponder": false,
                "numScanResults": 11
            }
        ],
        "disconnectedEvents": [ { "timestamp": 1714000002000 } ],
        "scanResults": [
            {
                "timestamp": 1714000001000,
                "location": { "latitude": 40.7001, "longitude": -74.0002, "accuracy": 25 },
                "results": [
                    { "bssid": "AA:BB:CC:DD:EE:02", "ssid": "Other", "level": -70, "frequency": 5180 },
                    { "bssid": "AA:BB:CC:DD:EE:03", "rssi": "-200" }
                ]
            }
        ]
    }"#;

    let p: ScanPayload = serde_json::from_str(doc).unwrap();
    assert_eq!(p.device_metadata.os_version.as_deref(), Some("14"));
    assert_eq!(p.device_metadata.data_version.as_deref(), Some("3"));

    assert_eq!(p.connected_events.len(), 1);
    let c = &p.connected_events[0];
    assert_eq!(c.timestamp, Some(1_714_000_000_000));
    assert_eq!(c.rssi, Some(-65));
    let loc = c.location.as_ref().unwrap();
    assert_eq!(loc.latitude, Some(40.7));
    assert_eq!(loc.accuracy, Some(20.0));

    assert_eq!(p.disconnected_events.len(), 1);

    assert_eq!(p.scan_results.len(), 1);
    let s = &p.scan_results[0];
    assert_eq!(s.results.len(), 2);
    assert_eq!(s.results[0].rssi, Some(-70));
    assert_eq!(s.results[1].rssi, Some(-200));
}
