//! File-based queue transport.
//!
//! Layout under the transport root:
//! - `<queue>/`          : ready messages, one JSON file each
//! - `<queue>/inflight/` : messages claimed by a receiver
//! - `<queue>/dedup/`    : FIFO deduplication markers
//!
//! File names start with a zero-padded microsecond timestamp so a directory
//! listing sorted by name is enqueue order. Claiming is an atomic rename, so
//! two receivers never get the same message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::time::Instant;

use super::{
    check_fifo_metadata, is_fifo, queue_name, validate_queue_name, Delivery, OutboundMessage,
    Transport, DEDUP_WINDOW,
};
use crate::error::{Error, Result};

const INFLIGHT_DIR: &str = "inflight";
const DEDUP_DIR: &str = "dedup";

/// Queue file wrapper.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct QueueFile {
    /// Unique ID (ULID)
    id: String,
    body: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    group_id: Option<String>,
    dedup_id: Option<String>,
    /// When enqueued (unix ms)
    created_at: i64,
}

/// Directory-backed queues shared by every process using the same root.
#[derive(Debug, Clone)]
pub struct FileTransport {
    root: PathBuf,
    poll_interval: Duration,
}

impl FileTransport {
    pub fn new(root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            root: root.into(),
            poll_interval,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn queue_dir(&self, address: &str) -> Result<PathBuf> {
        let name = queue_name(address);
        validate_queue_name(name)?;
        Ok(self.root.join(name))
    }

    async fn existing_queue_dir(&self, address: &str) -> Result<PathBuf> {
        let dir = self.queue_dir(address)?;
        if !fs::try_exists(&dir).await? {
            return Err(Error::transport(format!(
                "Queue {} does not exist",
                queue_name(address)
            )));
        }
        Ok(dir)
    }

    /// Count ready messages in a queue.
    pub async fn ready_count(&self, address: &str) -> Result<usize> {
        let dir = self.existing_queue_dir(address).await?;
        Ok(list_message_files(&dir).await?.len())
    }

    /// Count in-flight messages in a queue.
    pub async fn inflight_count(&self, address: &str) -> Result<usize> {
        let dir = self.existing_queue_dir(address).await?;
        Ok(list_message_files(&dir.join(INFLIGHT_DIR)).await?.len())
    }

    /// Returns the id of the message already published under `dedup_id`,
    /// if it is still inside the deduplication window.
    async fn find_duplicate(&self, dir: &Path, dedup_id: &str) -> Result<Option<String>> {
        let marker = dir.join(DEDUP_DIR).join(marker_name(dedup_id));
        let metadata = match fs::metadata(&marker).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .unwrap_or_default();
        if age >= DEDUP_WINDOW {
            return Ok(None);
        }

        Ok(Some(fs::read_to_string(&marker).await?))
    }

    /// Remove deduplication markers older than [`DEDUP_WINDOW`].
    async fn prune_dedup(&self, dir: &Path) -> Result<usize> {
        let mut entries = match fs::read_dir(dir.join(DEDUP_DIR)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let expired = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .is_some_and(|age| age >= DEDUP_WINDOW);
            if expired && fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!("Pruned {} expired dedup markers in {}", removed, dir.display());
        }
        Ok(removed)
    }

    /// Claim the oldest ready message, if any.
    async fn claim_next(&self, dir: &Path) -> Result<Option<Delivery>> {
        for file_name in list_message_files(dir).await? {
            let src = dir.join(&file_name);
            let dst = dir.join(INFLIGHT_DIR).join(&file_name);

            match fs::rename(&src, &dst).await {
                Ok(()) => {}
                // Claimed by another receiver first
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            let content = fs::read_to_string(&dst).await?;
            match serde_json::from_str::<QueueFile>(&content) {
                Ok(queue_file) => {
                    tracing::debug!("Claimed message {} from {}", queue_file.id, dir.display());
                    return Ok(Some(Delivery {
                        id: queue_file.id,
                        receipt: file_name,
                        body: queue_file.body,
                        attributes: queue_file.attributes,
                        group_id: queue_file.group_id,
                    }));
                }
                Err(e) => {
                    tracing::warn!("Dropping unreadable queue file {}: {}", dst.display(), e);
                    fs::remove_file(&dst).await.ok();
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn create_queue(&self, name: &str) -> Result<String> {
        let dir = self.queue_dir(name)?;
        fs::create_dir_all(dir.join(INFLIGHT_DIR)).await?;
        if is_fifo(name) {
            fs::create_dir_all(dir.join(DEDUP_DIR)).await?;
        }
        tracing::debug!("Created queue directory: {}", dir.display());
        Ok(queue_name(name).to_string())
    }

    async fn delete_queue(&self, address: &str) -> Result<()> {
        let dir = self.existing_queue_dir(address).await?;
        fs::remove_dir_all(&dir).await?;
        tracing::debug!("Deleted queue {}", queue_name(address));
        Ok(())
    }

    async fn publish(&self, address: &str, message: OutboundMessage) -> Result<String> {
        check_fifo_metadata(address, &message)?;
        let dir = self.existing_queue_dir(address).await?;

        if let Some(dedup_id) = message.dedup_id.as_deref() {
            self.prune_dedup(&dir).await?;
            if let Some(existing) = self.find_duplicate(&dir, dedup_id).await? {
                tracing::debug!("Duplicate {} on {}, keeping {}", dedup_id, address, existing);
                return Ok(existing);
            }
        }

        let id = ulid::Ulid::new().to_string();
        let created_at = chrono::Utc::now();
        let queue_file = QueueFile {
            id: id.clone(),
            body: message.body,
            attributes: message.attributes,
            group_id: message.group_id,
            dedup_id: message.dedup_id,
            created_at: created_at.timestamp_millis(),
        };

        // Write under a dot name first so receivers never see a partial file.
        let file_name = format!("{:020}-{}.json", created_at.timestamp_micros(), id);
        let staging = dir.join(format!(".{}", file_name));
        fs::write(&staging, serde_json::to_string_pretty(&queue_file)?).await?;
        fs::rename(&staging, dir.join(&file_name)).await?;

        if let Some(dedup_id) = queue_file.dedup_id.as_deref() {
            fs::write(dir.join(DEDUP_DIR).join(marker_name(dedup_id)), &id).await?;
        }

        tracing::debug!("Enqueued message {} to {}", id, queue_name(address));
        Ok(id)
    }

    async fn receive(&self, address: &str, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            let dir = self.existing_queue_dir(address).await?;
            if let Some(delivery) = self.claim_next(&dir).await? {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn delete_message(&self, address: &str, receipt: &str) -> Result<()> {
        let dir = self.existing_queue_dir(address).await?;
        let path = dir.join(INFLIGHT_DIR).join(receipt);

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("Deleted message {} from {}", receipt, queue_name(address));
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::transport(format!(
                "Receipt {} is not in flight on {}",
                receipt,
                queue_name(address)
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn recover(&self, address: &str) -> Result<usize> {
        let dir = self.existing_queue_dir(address).await?;
        let inflight = dir.join(INFLIGHT_DIR);

        let mut recovered = 0;
        for file_name in list_message_files(&inflight).await? {
            if fs::rename(inflight.join(&file_name), dir.join(&file_name))
                .await
                .is_ok()
            {
                tracing::info!("Recovered orphaned message: {}", file_name);
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

/// Sorted names of the `*.json` message files directly inside `dir`.
async fn list_message_files(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.ends_with(".json") && !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Dedup tokens are caller-supplied, so keep only filename-safe characters.
fn marker_name(dedup_id: &str) -> String {
    dedup_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(dir: &tempfile::TempDir) -> FileTransport {
        FileTransport::new(dir.path(), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_publish_receive_delete() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(&dir);
        let queue = t.create_queue("jobs").await.unwrap();

        let msg = OutboundMessage::new(r#"{"job_type":"GetProcesses"}"#)
            .with_attribute("ReplyTo", "reply_queue_jobs");
        let id = t.publish(&queue, msg).await.unwrap();

        let delivery = t
            .receive(&queue, Duration::from_millis(100))
            .await
            .unwrap()
            .expect("message");
        assert_eq!(delivery.id, id);
        assert_eq!(delivery.attribute("ReplyTo"), Some("reply_queue_jobs"));
        assert_eq!(t.ready_count(&queue).await.unwrap(), 0);
        assert_eq!(t.inflight_count(&queue).await.unwrap(), 1);

        t.delete_message(&queue, &delivery.receipt).await.unwrap();
        assert_eq!(t.inflight_count(&queue).await.unwrap(), 0);
        assert!(t.delete_message(&queue, &delivery.receipt).await.is_err());
    }

    #[tokio::test]
    async fn test_receive_times_out_empty() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(&dir);
        t.create_queue("idle").await.unwrap();

        let got = t.receive("idle", Duration::from_millis(30)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_missing_queue_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(&dir);

        assert!(t.publish("nope", OutboundMessage::new("{}")).await.is_err());
        assert!(t.receive("nope", Duration::ZERO).await.is_err());
        assert!(t.delete_queue("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_queue_once() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(&dir);
        t.create_queue("reply_queue_jobs").await.unwrap();

        t.delete_queue("reply_queue_jobs").await.unwrap();
        assert!(t.delete_queue("reply_queue_jobs").await.is_err());
    }

    #[tokio::test]
    async fn test_fifo_order_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(&dir);
        let queue = t.create_queue("jobs.fifo").await.unwrap();

        let first = t
            .publish(&queue, OutboundMessage::new("1").with_fifo("g", "a"))
            .await
            .unwrap();
        t.publish(&queue, OutboundMessage::new("2").with_fifo("g", "b"))
            .await
            .unwrap();
        let dup = t
            .publish(&queue, OutboundMessage::new("1 again").with_fifo("g", "a"))
            .await
            .unwrap();
        assert_eq!(dup, first);
        assert_eq!(t.ready_count(&queue).await.unwrap(), 2);

        let a = t.receive(&queue, Duration::ZERO).await.unwrap().unwrap();
        let b = t.receive(&queue, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(a.body, "1");
        assert_eq!(b.body, "2");
        assert_eq!(a.group_id.as_deref(), Some("g"));
    }

    #[tokio::test]
    async fn test_expired_dedup_markers_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(&dir);
        let queue = t.create_queue("jobs.fifo").await.unwrap();
        let markers = dir.path().join("jobs.fifo").join(DEDUP_DIR);
        let marker_count = || std::fs::read_dir(&markers).unwrap().count();

        for i in 0..20 {
            t.publish(&queue, OutboundMessage::new("{}").with_fifo("g", format!("tok-{}", i)))
                .await
                .unwrap();
            let delivery = t.receive(&queue, Duration::ZERO).await.unwrap().unwrap();
            t.delete_message(&queue, &delivery.receipt).await.unwrap();
        }
        assert_eq!(marker_count(), 20);

        let an_hour_ago = SystemTime::now() - Duration::from_secs(3600);
        for entry in std::fs::read_dir(&markers).unwrap() {
            std::fs::File::options()
                .write(true)
                .open(entry.unwrap().path())
                .unwrap()
                .set_modified(an_hour_ago)
                .unwrap();
        }

        // An expired token is accepted again
        t.publish(&queue, OutboundMessage::new("{}").with_fifo("g", "tok-0"))
            .await
            .unwrap();
        assert_eq!(marker_count(), 1);
        assert_eq!(t.ready_count(&queue).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fifo_requires_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(&dir);
        t.create_queue("jobs.fifo").await.unwrap();

        let err = t
            .publish("jobs.fifo", OutboundMessage::new("{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_recover_orphaned() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(&dir);
        t.create_queue("jobs").await.unwrap();
        t.publish("jobs", OutboundMessage::new("{}")).await.unwrap();

        let claimed = t.receive("jobs", Duration::ZERO).await.unwrap();
        assert!(claimed.is_some());
        assert_eq!(t.recover("jobs").await.unwrap(), 1);

        let again = t.receive("jobs", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.id, claimed.unwrap().id);
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let dir = tempfile::tempdir().unwrap();
        let t = transport(&dir);
        t.create_queue("jobs").await.unwrap();

        let publisher = t.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            publisher
                .publish("jobs", OutboundMessage::new("late"))
                .await
                .unwrap();
        });

        let got = t.receive("jobs", Duration::from_secs(2)).await.unwrap();
        assert_eq!(got.unwrap().body, "late");
    }
}
