//! Builders for encoded payload objects and notification bodies.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use uuid::Uuid;

/// Encode one JSON document the way devices upload it:
/// gzip then Base64, one line per document.
pub fn gzip_base64_line(doc: &str) -> String {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(doc.as_bytes()).expect("gzip write");
    BASE64.encode(gz.finish().expect("gzip finish"))
}

/// Join encoded lines into object bytes (newline-delimited).
pub fn object_from_docs(docs: &[&str]) -> Vec<u8> {
    let mut out = String::new();
    for doc in docs {
        out.push_str(&gzip_base64_line(doc));
        out.push('\n');
    }
    out.into_bytes()
}

/// A well-formed notification body for `(bucket, key)` with a fresh event
/// id.  Returns `(body, event_id)`.
pub fn notification_body(bucket: &str, key: &str) -> (String, String) {
    let event_id = Uuid::new_v4().to_string();
    let body = format!(
        r#"{{"Records":[{{
            "eventId": "{event_id}",
            "eventTime": "2026-03-01T12:00:00.000Z",
            "eventName": "ObjectCreated:Put",
            "responseElements": {{ "x-amz-request-id": "REQ-{event_id}" }},
            "s3": {{
                "bucket": {{ "name": "{bucket}" }},
                "object": {{
                    "key": "{key}",
                    "size": 1024,
                    "eTag": "d41d8cd98f00b204e9800998ecf8427e"
                }}
            }}
        }}]}}"#
    );
    (body, event_id)
}
