//! Local filesystem backends for the capability ports.
//!
//! These let the binary run a complete pipeline on one machine with no
//! cloud credentials: a spool directory stands in for the queue, a plain
//! directory tree for the object store, and NDJSON append files for the
//! delivery stream.  Production deployments embed the library and inject
//! their own implementations.
//!
//! # Spool queue semantics
//! One message per `*.json` file; the filename is the receipt handle.
//! Receiving leases a file for the visibility timeout (leases are held in
//! process memory — redelivery after a crash falls out naturally because a
//! fresh process has no leases).  Ack deletes the file, nack releases the
//! lease immediately.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use uuid::Uuid;
use wt_protocol::ports::{
    ByteStream, DeliveryStream, MessageSource, ObjectStore, OpenError, PublishError, QueueError,
    QueueMessage, RecordResult,
};

const SPOOL_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Spool-directory message source
// ---------------------------------------------------------------------------

pub struct FsMessageSource {
    spool_dir: PathBuf,
    /// filename → instant the lease expires.
    leases: Mutex<HashMap<String, Instant>>,
}

impl FsMessageSource {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        FsMessageSource {
            spool_dir: spool_dir.into(),
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Drop a message body into a spool directory.  Returns the message id.
    pub async fn spool_message(spool_dir: &Path, body: &str) -> std::io::Result<String> {
        tokio::fs::create_dir_all(spool_dir).await?;
        let id = Uuid::new_v4().to_string();
        let final_path = spool_dir.join(format!("{id}.json"));
        // Write-then-rename so receivers never observe a partial body.
        let tmp_path = spool_dir.join(format!(".{id}.tmp"));
        tokio::fs::write(&tmp_path, body).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(id)
    }

    async fn scan(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut entries = tokio::fs::read_dir(&self.spool_dir)
            .await
            .map_err(|e| QueueError::Transient(format!("reading spool dir: {e}")))?;

        let mut names: Vec<String> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| QueueError::Transient(format!("reading spool dir: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();

        let now = Instant::now();
        let mut leases = self.leases.lock().await;
        let mut out = Vec::new();
        for name in names {
            if out.len() >= max_messages {
                break;
            }
            if leases.get(&name).is_some_and(|expiry| *expiry > now) {
                continue;
            }
            let body = match tokio::fs::read_to_string(self.spool_dir.join(&name)).await {
                Ok(body) => body,
                // Acked (deleted) between listing and reading.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(QueueError::Transient(format!("reading message: {e}"))),
            };
            leases.insert(name.clone(), now + visibility_timeout);
            out.push(QueueMessage {
                message_id: name.trim_end_matches(".json").to_owned(),
                receipt_handle: name,
                body,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl MessageSource for FsMessageSource {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let messages = self.scan(max_messages, visibility_timeout).await?;
            if !messages.is_empty() || Instant::now() >= deadline {
                return Ok(messages);
            }
            sleep(SPOOL_POLL_INTERVAL.min(wait)).await;
        }
    }

    async fn extend_visibility(
        &self,
        receipt_handle: &str,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        let mut leases = self.leases.lock().await;
        leases.insert(receipt_handle.to_owned(), Instant::now() + timeout);
        Ok(())
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.leases.lock().await.remove(receipt_handle);
        match tokio::fs::remove_file(self.spool_dir.join(receipt_handle)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QueueError::Transient(format!("deleting message: {e}"))),
        }
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.leases.lock().await.remove(receipt_handle);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Directory object store
// ---------------------------------------------------------------------------

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsObjectStore { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn open(&self, bucket: &str, key: &str) -> Result<ByteStream, OpenError> {
        let path = self.root.join(bucket).join(key);
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file) as ByteStream),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OpenError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            }),
            Err(e) => Err(OpenError::Transient(format!(
                "opening {}: {e}",
                path.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// NDJSON delivery stream
// ---------------------------------------------------------------------------

pub struct FsDeliveryStream {
    out_dir: PathBuf,
}

impl FsDeliveryStream {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        FsDeliveryStream {
            out_dir: out_dir.into(),
        }
    }
}

#[async_trait]
impl DeliveryStream for FsDeliveryStream {
    async fn put_batch(
        &self,
        stream_name: &str,
        records: &[Vec<u8>],
    ) -> Result<Vec<RecordResult>, PublishError> {
        tokio::fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| PublishError::Transient(format!("creating out dir: {e}")))?;

        let path = self.out_dir.join(format!("{stream_name}.ndjson"));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| PublishError::Transient(format!("opening {}: {e}", path.display())))?;

        for record in records {
            file.write_all(record)
                .await
                .map_err(|e| PublishError::Transient(format!("writing record: {e}")))?;
            file.write_all(b"\n")
                .await
                .map_err(|e| PublishError::Transient(format!("writing record: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| PublishError::Transient(format!("flushing batch: {e}")))?;

        Ok(records.iter().map(|_| RecordResult::ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn spool_receive_ack_removes_the_message() {
        let dir = tempfile::tempdir().unwrap();
        FsMessageSource::spool_message(dir.path(), r#"{"k":1}"#)
            .await
            .unwrap();
        let source = FsMessageSource::new(dir.path());

        let got = source
            .receive(10, Duration::from_millis(10), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].body, r#"{"k":1}"#);

        source.ack(&got[0].receipt_handle).await.unwrap();
        let again = source
            .receive(10, Duration::from_millis(10), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(again.is_empty());
        assert!(!dir.path().join(&got[0].receipt_handle).exists());
    }

    #[tokio::test]
    async fn leased_message_is_invisible_until_nacked() {
        let dir = tempfile::tempdir().unwrap();
        FsMessageSource::spool_message(dir.path(), "body").await.unwrap();
        let source = FsMessageSource::new(dir.path());

        let first = source
            .receive(10, Duration::from_millis(10), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        // Still leased: a second receive sees nothing.
        let hidden = source
            .receive(10, Duration::from_millis(10), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(hidden.is_empty());

        // Nack returns it immediately.
        source.nack(&first[0].receipt_handle).await.unwrap();
        let redelivered = source
            .receive(10, Duration::from_millis(10), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].receipt_handle, first[0].receipt_handle);
    }

    #[tokio::test]
    async fn receive_respects_max_messages_and_ordering() {
        let dir = tempfile::tempdir().unwrap();
        for n in 0..5 {
            FsMessageSource::spool_message(dir.path(), &format!("body-{n}"))
                .await
                .unwrap();
        }
        let source = FsMessageSource::new(dir.path());
        let got = source
            .receive(3, Duration::from_millis(10), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(got.len(), 3);
    }

    #[tokio::test]
    async fn object_store_distinguishes_not_found_from_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let err = match store.open("bucket", "a/b.gz").await {
            Err(e) => e,
            Ok(_) => panic!("expected Err, got Ok"),
        };
        assert!(matches!(err, OpenError::NotFound { .. }));

        let obj_path = dir.path().join("bucket/a");
        tokio::fs::create_dir_all(&obj_path).await.unwrap();
        tokio::fs::write(obj_path.join("b.gz"), b"line-1\nline-2\n")
            .await
            .unwrap();

        let mut stream = store.open("bucket", "a/b.gz").await.unwrap();
        let mut content = Vec::new();
        stream.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"line-1\nline-2\n");
    }

    #[tokio::test]
    async fn delivery_appends_ndjson_per_stream() {
        let dir = tempfile::tempdir().unwrap();
        let delivery = FsDeliveryStream::new(dir.path());

        let results = delivery
            .put_batch("wifi-scans", &[b"{\"a\":1}".to_vec(), b"{\"b\":2}".to_vec()])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.ok));

        delivery
            .put_batch("wifi-scans", &[b"{\"c\":3}".to_vec()])
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(dir.path().join("wifi-scans.ndjson"))
            .await
            .unwrap();
        assert_eq!(content, "{\"a\":1}\n{\"b\":2}\n{\"c\":3}\n");
    }
}
