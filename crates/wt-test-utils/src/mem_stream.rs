//! In-memory delivery stream with a scripted response queue.
//!
//! Each scripted entry drives one `put_batch` call; when the script is
//! exhausted every call succeeds.  All calls (including failed ones) are
//! recorded for assertions.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use wt_protocol::ports::{DeliveryStream, PublishError, RecordResult};

/// One recorded `put_batch` call.
#[derive(Debug, Clone)]
pub struct PublishedBatch {
    pub stream_name: String,
    pub records: Vec<Vec<u8>>,
}

/// Scripted outcome for one `put_batch` call.
pub enum PublishResponse {
    Ok,
    Transient,
    FailRecords { indices: Vec<usize>, retryable: bool },
}

#[derive(Default)]
pub struct MemDeliveryStream {
    calls: Mutex<Vec<PublishedBatch>>,
    script: Mutex<VecDeque<PublishResponse>>,
}

impl MemDeliveryStream {
    pub fn new() -> Self {
        MemDeliveryStream::default()
    }

    pub fn script(&self, responses: Vec<PublishResponse>) {
        *self.script.lock().unwrap() = responses.into();
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<PublishedBatch> {
        self.calls.lock().unwrap().clone()
    }

    /// All records that were in *successful* position across calls is not
    /// tracked here; for assertions use `calls()` together with the script.
    /// This helper decodes every record of every call for one stream.
    pub fn decoded_records(&self, stream_name: &str) -> Vec<serde_json::Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.stream_name == stream_name)
            .flat_map(|b| b.records.iter())
            .map(|r| serde_json::from_slice(r).expect("record is JSON"))
            .collect()
    }

    pub fn total_records(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|b| b.records.len())
            .sum()
    }
}

#[async_trait]
impl DeliveryStream for MemDeliveryStream {
    async fn put_batch(
        &self,
        stream_name: &str,
        records: &[Vec<u8>],
    ) -> Result<Vec<RecordResult>, PublishError> {
        self.calls.lock().unwrap().push(PublishedBatch {
            stream_name: stream_name.to_owned(),
            records: records.to_vec(),
        });

        match self.script.lock().unwrap().pop_front() {
            None | Some(PublishResponse::Ok) => {
                Ok(records.iter().map(|_| RecordResult::ok()).collect())
            }
            Some(PublishResponse::Transient) => {
                Err(PublishError::Transient("injected publish failure".to_owned()))
            }
            Some(PublishResponse::FailRecords { indices, retryable }) => Ok(records
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    if indices.contains(&i) {
                        RecordResult::failed("ServiceUnavailable", retryable)
                    } else {
                        RecordResult::ok()
                    }
                })
                .collect()),
        }
    }
}
