//! In-memory object store with transient-failure injection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use wt_protocol::ports::{ByteStream, ObjectStore, OpenError};

#[derive(Default)]
pub struct MemObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    transient_failures: AtomicU32,
    open_calls: AtomicU32,
}

impl MemObjectStore {
    pub fn new() -> Self {
        MemObjectStore::default()
    }

    pub fn put(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_owned(), key.to_owned()), data);
    }

    /// Make the next `n` open calls fail with `TransientStorageError`.
    pub fn fail_next_opens(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// How many times `open` was called (successful or not).
    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemObjectStore {
    async fn open(&self, bucket: &str, key: &str) -> Result<ByteStream, OpenError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .transient_failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(OpenError::Transient("injected storage failure".to_owned()));
        }

        match self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_owned(), key.to_owned()))
        {
            Some(data) => Ok(Box::new(std::io::Cursor::new(data.clone())) as ByteStream),
            None => Err(OpenError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            }),
        }
    }
}
