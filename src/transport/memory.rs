//! In-process queue transport.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{
    check_fifo_metadata, queue_name, validate_queue_name, Delivery, OutboundMessage, Transport,
    DEDUP_WINDOW,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Stored {
    seq: u64,
    id: String,
    message: OutboundMessage,
}

#[derive(Debug, Default)]
struct MemoryQueue {
    ready: VecDeque<Stored>,
    inflight: HashMap<String, Stored>,
    dedup: HashMap<String, (Instant, String)>,
    next_seq: u64,
}

/// Queues held in memory, shared by every task holding the transport.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    queues: Mutex<HashMap<String, MemoryQueue>>,
    published: Notify,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_exists(&self, address: &str) -> bool {
        self.lock().contains_key(queue_name(address))
    }

    /// Names of all existing queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of ready messages, or `None` for a missing queue.
    pub fn ready_count(&self, address: &str) -> Option<usize> {
        self.lock().get(queue_name(address)).map(|q| q.ready.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryQueue>> {
        // A panic while holding the lock cannot leave a queue half-updated
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_claim(&self, address: &str) -> Result<Option<Delivery>> {
        let mut queues = self.lock();
        let queue = queues.get_mut(queue_name(address)).ok_or_else(|| missing(address))?;

        let Some(stored) = queue.ready.pop_front() else {
            return Ok(None);
        };
        let receipt = ulid::Ulid::new().to_string();
        let delivery = Delivery {
            id: stored.id.clone(),
            receipt: receipt.clone(),
            body: stored.message.body.clone(),
            attributes: stored.message.attributes.clone(),
            group_id: stored.message.group_id.clone(),
        };
        queue.inflight.insert(receipt, stored);
        Ok(Some(delivery))
    }
}

fn missing(address: &str) -> Error {
    Error::transport(format!("Queue {} does not exist", queue_name(address)))
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn create_queue(&self, name: &str) -> Result<String> {
        let name = queue_name(name);
        validate_queue_name(name)?;
        self.lock().entry(name.to_string()).or_default();
        Ok(name.to_string())
    }

    async fn delete_queue(&self, address: &str) -> Result<()> {
        self.lock()
            .remove(queue_name(address))
            .map(|_| ())
            .ok_or_else(|| missing(address))?;
        // Wake receivers so they observe the deletion
        self.published.notify_waiters();
        Ok(())
    }

    async fn publish(&self, address: &str, message: OutboundMessage) -> Result<String> {
        check_fifo_metadata(address, &message)?;

        let id = {
            let mut queues = self.lock();
            let queue = queues.get_mut(queue_name(address)).ok_or_else(|| missing(address))?;

            let now = Instant::now();
            queue
                .dedup
                .retain(|_, (seen, _)| now.duration_since(*seen) < DEDUP_WINDOW);
            if let Some(dedup_id) = message.dedup_id.as_deref() {
                if let Some((_, existing)) = queue.dedup.get(dedup_id) {
                    return Ok(existing.clone());
                }
            }

            let id = ulid::Ulid::new().to_string();
            if let Some(dedup_id) = message.dedup_id.clone() {
                queue.dedup.insert(dedup_id, (now, id.clone()));
            }
            queue.next_seq += 1;
            queue.ready.push_back(Stored {
                seq: queue.next_seq,
                id: id.clone(),
                message,
            });
            id
        };

        self.published.notify_waiters();
        Ok(id)
    }

    async fn receive(&self, address: &str, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before checking so a publish in between is not missed
            let notified = self.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_claim(address)? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn delete_message(&self, address: &str, receipt: &str) -> Result<()> {
        let mut queues = self.lock();
        let queue = queues.get_mut(queue_name(address)).ok_or_else(|| missing(address))?;
        queue.inflight.remove(receipt).map(|_| ()).ok_or_else(|| {
            Error::transport(format!(
                "Receipt {} is not in flight on {}",
                receipt,
                queue_name(address)
            ))
        })
    }

    async fn recover(&self, address: &str) -> Result<usize> {
        let recovered = {
            let mut queues = self.lock();
            let queue = queues.get_mut(queue_name(address)).ok_or_else(|| missing(address))?;
            let mut orphaned: Vec<Stored> = queue.inflight.drain().map(|(_, s)| s).collect();
            orphaned.sort_by_key(|s| s.seq);
            let count = orphaned.len();
            for stored in orphaned.into_iter().rev() {
                queue.ready.push_front(stored);
            }
            count
        };
        self.published.notify_waiters();
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_dedup_window() {
        let t = MemoryTransport::new();
        t.create_queue("jobs.fifo").await.unwrap();

        let a = t
            .publish("jobs.fifo", OutboundMessage::new("1").with_fifo("g", "tok"))
            .await
            .unwrap();
        let b = t
            .publish("jobs.fifo", OutboundMessage::new("1").with_fifo("g", "tok"))
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(t.ready_count("jobs.fifo"), Some(1));
    }

    #[tokio::test]
    async fn test_receive_waits_for_publish() {
        let t = Arc::new(MemoryTransport::new());
        t.create_queue("jobs").await.unwrap();

        let publisher = t.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher
                .publish("jobs", OutboundMessage::new("hello"))
                .await
                .unwrap();
        });

        let got = t.receive("jobs", Duration::from_secs(2)).await.unwrap();
        assert_eq!(got.unwrap().body, "hello");
    }

    #[tokio::test]
    async fn test_receive_fails_after_queue_deleted() {
        let t = Arc::new(MemoryTransport::new());
        t.create_queue("reply").await.unwrap();

        let deleter = t.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            deleter.delete_queue("reply").await.unwrap();
        });

        assert!(t.receive("reply", Duration::from_secs(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_recover_keeps_order() {
        let t = MemoryTransport::new();
        t.create_queue("jobs").await.unwrap();
        t.publish("jobs", OutboundMessage::new("1")).await.unwrap();
        t.publish("jobs", OutboundMessage::new("2")).await.unwrap();
        t.publish("jobs", OutboundMessage::new("3")).await.unwrap();

        t.receive("jobs", Duration::ZERO).await.unwrap();
        t.receive("jobs", Duration::ZERO).await.unwrap();
        assert_eq!(t.recover("jobs").await.unwrap(), 2);

        let mut bodies = Vec::new();
        while let Some(d) = t.receive("jobs", Duration::ZERO).await.unwrap() {
            bodies.push(d.body);
        }
        assert_eq!(bodies, vec!["1", "2", "3"]);
    }
}
