//! In-memory message source with at-least-once semantics.
//!
//! Received messages move to an in-flight set; `ack` settles them, `nack`
//! returns them to the front of the queue for immediate redelivery.  Tests
//! can inject transient receive failures and inspect settlement order.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use uuid::Uuid;
use wt_protocol::ports::{MessageSource, QueueError, QueueMessage};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct State {
    ready: VecDeque<QueueMessage>,
    inflight: HashMap<String, QueueMessage>,
    acked: Vec<String>,
    nacked: Vec<String>,
    extensions: Vec<String>,
    fail_receives: u32,
}

#[derive(Default)]
pub struct MemMessageSource {
    state: Mutex<State>,
}

impl MemMessageSource {
    pub fn new() -> Self {
        MemMessageSource::default()
    }

    /// Enqueue a message body; returns its message id.
    pub fn push(&self, body: &str) -> String {
        let id = Uuid::new_v4().to_string();
        self.state.lock().unwrap().ready.push_back(QueueMessage {
            message_id: id.clone(),
            receipt_handle: id.clone(),
            body: body.to_owned(),
        });
        id
    }

    /// Make the next `n` receive calls fail transiently.
    pub fn fail_next_receives(&self, n: u32) {
        self.state.lock().unwrap().fail_receives = n;
    }

    pub fn acked(&self) -> Vec<String> {
        self.state.lock().unwrap().acked.clone()
    }

    pub fn nacked(&self) -> Vec<String> {
        self.state.lock().unwrap().nacked.clone()
    }

    pub fn extension_count(&self) -> usize {
        self.state.lock().unwrap().extensions.len()
    }

    /// Messages neither settled nor in flight.
    pub fn ready_len(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    pub fn inflight_len(&self) -> usize {
        self.state.lock().unwrap().inflight.len()
    }
}

#[async_trait]
impl MessageSource for MemMessageSource {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        _visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_receives > 0 {
                state.fail_receives -= 1;
                return Err(QueueError::Transient("injected receive failure".to_owned()));
            }
        }

        let deadline = Instant::now() + wait;
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if !state.ready.is_empty() {
                    let mut out = Vec::new();
                    while out.len() < max_messages {
                        let Some(msg) = state.ready.pop_front() else {
                            break;
                        };
                        state.inflight.insert(msg.receipt_handle.clone(), msg.clone());
                        out.push(msg);
                    }
                    return Ok(out);
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn extend_visibility(
        &self,
        receipt_handle: &str,
        _timeout: Duration,
    ) -> Result<(), QueueError> {
        self.state
            .lock()
            .unwrap()
            .extensions
            .push(receipt_handle.to_owned());
        Ok(())
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = state.inflight.remove(receipt_handle) {
            state.acked.push(msg.message_id);
        }
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if let Some(msg) = state.inflight.remove(receipt_handle) {
            state.nacked.push(msg.message_id.clone());
            state.ready.push_front(msg);
        }
        Ok(())
    }
}
