//! Upload-event extraction from queue message bodies.
//!
//! The body is an S3-style object-created notification envelope (see
//! `wt_protocol::Notification`).  Structural problems are terminal for the
//! message: the caller acks and drops.  One message maps to one upload
//! event; extra records in the envelope are counted and skipped.
//!
//! # Stream name derivation
//! The delivery stream name is recovered from the object key, which the
//! upstream landing stage writes as
//! `<prefix>/<stream>-YYYY-MM-DD-HH-MM-SS-<suffix>`:
//! take the last `/` segment, truncate at the first `-YYYY-MM-DD-HH-MM-SS`
//! match, fall back to the filename without extension, then to `"unknown"`.

use chrono::{DateTime, Utc};
use thiserror::Error;
use wt_protocol::{Notification, UploadEvent, is_etag, is_uuid};

/// Terminal envelope failure; the message is acked and dropped.
#[derive(Debug, Error)]
#[error("malformed event: {0}")]
pub struct MalformedEvent(pub String);

/// Result of a successful extraction: the event plus the number of extra
/// envelope records that were skipped.
#[derive(Debug)]
pub struct ExtractedEvent {
    pub event: UploadEvent,
    pub extra_records: usize,
}

/// Parse a queue message body into an [`UploadEvent`].
pub fn extract_event(body: &str) -> Result<ExtractedEvent, MalformedEvent> {
    let notification: Notification = serde_json::from_str(body)
        .map_err(|e| MalformedEvent(format!("envelope JSON: {e}")))?;

    let mut records = notification.records.into_iter();
    let record = records
        .next()
        .ok_or_else(|| MalformedEvent("envelope has no records".to_owned()))?;
    let extra_records = records.count();

    let event_id = record
        .event_id
        .ok_or_else(|| MalformedEvent("missing eventId".to_owned()))?;
    if !is_uuid(&event_id) {
        return Err(MalformedEvent(format!("eventId is not a UUID: '{event_id}'")));
    }

    let bucket = record.s3.bucket.name;
    if bucket.is_empty() {
        return Err(MalformedEvent("empty bucket name".to_owned()));
    }
    let object_key = record.s3.object.key;
    if object_key.is_empty() {
        return Err(MalformedEvent("empty object key".to_owned()));
    }

    // S3 eTags sometimes arrive quoted; strip before shape-checking.
    let etag = match record.s3.object.e_tag {
        Some(raw) => {
            let trimmed = raw.trim_matches('"').to_owned();
            if !is_etag(&trimmed) {
                return Err(MalformedEvent(format!("malformed eTag: '{raw}'")));
            }
            Some(trimmed)
        }
        None => None,
    };

    // Unparseable event times are dropped, not fatal; the event itself is
    // still well-formed.
    let event_time = record
        .event_time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));

    let stream_name = derive_stream_name(&object_key);

    Ok(ExtractedEvent {
        event: UploadEvent {
            event_id,
            event_time,
            bucket,
            object_key: object_key.clone(),
            object_size: record.s3.object.size,
            etag,
            stream_name,
            request_id: record.response_elements.request_id,
        },
        extra_records,
    })
}

// ---------------------------------------------------------------------------
// Stream name derivation
// ---------------------------------------------------------------------------

/// Derive the target stream name from an object key.
pub fn derive_stream_name(object_key: &str) -> String {
    let file = object_key.rsplit('/').next().unwrap_or("");

    if let Some(idx) = find_timestamp_suffix(file) {
        let prefix = &file[..idx];
        if !prefix.is_empty() {
            return prefix.to_owned();
        }
    }

    let stem = match file.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => file,
    };
    if stem.is_empty() {
        "unknown".to_owned()
    } else {
        stem.to_owned()
    }
}

/// Find the byte offset of the first `-YYYY-MM-DD-HH-MM-SS` occurrence.
fn find_timestamp_suffix(s: &str) -> Option<usize> {
    // Pattern: '-' then digit groups of 4-2-2-2-2-2 separated by '-'; 20
    // bytes total.
    const GROUPS: [usize; 6] = [4, 2, 2, 2, 2, 2];
    let b = s.as_bytes();
    'outer: for start in 0..b.len() {
        if b[start] != b'-' {
            continue;
        }
        let mut pos = start;
        for len in GROUPS {
            if pos >= b.len() || b[pos] != b'-' {
                continue 'outer;
            }
            pos += 1;
            if pos + len > b.len() || !b[pos..pos + len].iter().all(u8::is_ascii_digit) {
                continue 'outer;
            }
            pos += len;
        }
        return Some(start);
    }
    None
}
