//! Transport wrappers for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{queue_name, Delivery, MemoryTransport, OutboundMessage, Transport};
use crate::error::{Error, Result};

/// Wraps a [`MemoryTransport`], recording published messages and queue
/// deletions, and optionally failing publishes.
pub struct CountingTransport {
    inner: MemoryTransport,
    deletes: Mutex<HashMap<String, usize>>,
    published: Mutex<Vec<(String, OutboundMessage)>>,
    fail_publish: AtomicBool,
}

impl CountingTransport {
    pub fn new(inner: MemoryTransport) -> Self {
        Self {
            inner,
            deletes: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            fail_publish: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &MemoryTransport {
        &self.inner
    }

    /// How many times `delete_queue` was called for `address`.
    pub fn deletes(&self, address: &str) -> usize {
        self.deletes
            .lock()
            .unwrap()
            .get(queue_name(address))
            .copied()
            .unwrap_or(0)
    }

    /// Total `delete_queue` calls whose name starts with `prefix`.
    pub fn deletes_with_prefix(&self, prefix: &str) -> usize {
        self.deletes
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(_, count)| count)
            .sum()
    }

    /// Messages published to `address`, oldest first.
    pub fn published_to(&self, address: &str) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(queue, _)| queue == queue_name(address))
            .map(|(_, message)| message.clone())
            .collect()
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for CountingTransport {
    async fn create_queue(&self, name: &str) -> Result<String> {
        self.inner.create_queue(name).await
    }

    async fn delete_queue(&self, address: &str) -> Result<()> {
        *self
            .deletes
            .lock()
            .unwrap()
            .entry(queue_name(address).to_string())
            .or_default() += 1;
        self.inner.delete_queue(address).await
    }

    async fn publish(&self, address: &str, message: OutboundMessage) -> Result<String> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::transport("publish refused"));
        }
        self.published
            .lock()
            .unwrap()
            .push((queue_name(address).to_string(), message.clone()));
        self.inner.publish(address, message).await
    }

    async fn receive(&self, address: &str, wait: Duration) -> Result<Option<Delivery>> {
        self.inner.receive(address, wait).await
    }

    async fn delete_message(&self, address: &str, receipt: &str) -> Result<()> {
        self.inner.delete_message(address, receipt).await
    }

    async fn recover(&self, address: &str) -> Result<usize> {
        self.inner.recover(address).await
    }
}
