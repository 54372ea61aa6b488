//! Line codec: Base64 → gzip → JSON document.
//!
//! Each object line is a Base64-encoded gzip of one JSON document.  Decoding
//! never fails the surrounding stream: a bad line is logged at WARN and
//! skipped.  Inflation is capped so one hostile line cannot balloon memory —
//! peak per line is O(`max_decoded_bytes`).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::read::GzDecoder;
use std::io::Read;
use tracing::warn;

/// Outcome of decoding one encoded line.
#[derive(Debug, PartialEq, Eq)]
pub enum LineDecode {
    /// Blank or whitespace-only line; not an error.
    Empty,
    /// The decompressed JSON document.
    Document(String),
    /// Decode failed; already logged at WARN.  Callers count and move on.
    Malformed,
}

/// Decode one encoded line into its JSON document.
pub fn decode_line(raw: &str, max_decoded_bytes: usize) -> LineDecode {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return LineDecode::Empty;
    }

    let compressed = match BASE64.decode(trimmed) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(stage = "codec", error_kind = "base64", error = %e, "line dropped");
            return LineDecode::Malformed;
        }
    };

    // Read through the inflater with a one-byte overshoot so an oversized
    // document is detected without materializing more than the cap.
    let mut inflater = GzDecoder::new(&compressed[..]).take(max_decoded_bytes as u64 + 1);
    let mut decoded = Vec::new();
    if let Err(e) = inflater.read_to_end(&mut decoded) {
        warn!(stage = "codec", error_kind = "gzip", error = %e, "line dropped");
        return LineDecode::Malformed;
    }
    if decoded.len() > max_decoded_bytes {
        warn!(
            stage = "codec",
            error_kind = "decoded_too_large",
            limit = max_decoded_bytes,
            "line dropped"
        );
        return LineDecode::Malformed;
    }

    match String::from_utf8(decoded) {
        Ok(doc) => LineDecode::Document(doc),
        Err(e) => {
            warn!(stage = "codec", error_kind = "utf8", error = %e, "line dropped");
            LineDecode::Malformed
        }
    }
}
