//! Object line streaming.
//!
//! Wraps an [`ByteStream`] in a lazy, finite, single-use sequence of lines.
//! A fixed read buffer plus one partial-line accumulator bound peak memory
//! to O(longest line); the object is never materialized whole.
//!
//! Oversized lines (beyond `max_line_bytes`) and invalid UTF-8 lines are
//! counted, logged and skipped — they do not fail the stream.  A mid-line
//! EOF emits the final partial line.  Read errors and idle timeouts are
//! transient: the surrounding message is left unacked for redelivery.

use crate::metrics::PipelineMetrics;
use async_stream::stream;
use futures_util::Stream;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::warn;
use wt_protocol::ports::ByteStream;

/// Transient failure while streaming an object.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("object read stalled for {0:?}")]
    IdleTimeout(Duration),
}

const READ_CHUNK_BYTES: usize = 16 * 1024;

/// Stream the lines of one object.
///
/// Single-use: consumes the byte stream.  Every `read` is guarded by
/// `idle_timeout`.
pub fn lines(
    mut source: ByteStream,
    max_line_bytes: usize,
    idle_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
) -> impl Stream<Item = Result<String, BlobError>> {
    stream! {
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        let mut pending: Vec<u8> = Vec::new();
        // Set while discarding the remainder of an oversized line.
        let mut skipping = false;

        loop {
            let n = match timeout(idle_timeout, source.read(&mut chunk)).await {
                Err(_) => {
                    yield Err(BlobError::IdleTimeout(idle_timeout));
                    return;
                }
                Ok(Err(e)) => {
                    yield Err(BlobError::Read(e));
                    return;
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
            };

            let mut rest = &chunk[..n];
            while let Some(pos) = rest.iter().position(|&c| c == b'\n') {
                let head = &rest[..pos];
                rest = &rest[pos + 1..];

                if skipping {
                    skipping = false;
                    pending.clear();
                    continue;
                }
                if pending.len() + head.len() > max_line_bytes {
                    metrics.line_too_long.bump();
                    warn!(stage = "blob", limit = max_line_bytes, "oversized line dropped");
                    pending.clear();
                    continue;
                }
                pending.extend_from_slice(head);
                if let Some(line) = finish_line(&mut pending, &metrics) {
                    yield Ok(line);
                }
            }

            if skipping {
                continue;
            }
            if pending.len() + rest.len() > max_line_bytes {
                metrics.line_too_long.bump();
                warn!(stage = "blob", limit = max_line_bytes, "oversized line dropped");
                pending.clear();
                skipping = true;
                continue;
            }
            pending.extend_from_slice(rest);
        }

        // EOF mid-line: the final partial line still counts.
        if !skipping && !pending.is_empty() {
            if let Some(line) = finish_line(&mut pending, &metrics) {
                yield Ok(line);
            }
        }
    }
}

/// Take the accumulated bytes as one line, tolerating CRLF endings.
fn finish_line(pending: &mut Vec<u8>, metrics: &PipelineMetrics) -> Option<String> {
    if pending.last() == Some(&b'\r') {
        pending.pop();
    }
    match String::from_utf8(std::mem::take(pending)) {
        Ok(line) => {
            metrics.lines_read.bump();
            Some(line)
        }
        Err(e) => {
            metrics.malformed_line.bump();
            warn!(stage = "blob", error_kind = "utf8", error = %e, "line dropped");
            None
        }
    }
}
