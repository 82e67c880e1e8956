//! Named-queue transport.
//!
//! Queues are addressed by name or by a URL whose last path segment is the
//! queue name. A queue whose name ends in `.fifo` is FIFO-ordered: every
//! message published to it must carry a group id and a deduplication token,
//! and a repeated token within [`DEDUP_WINDOW`] is accepted but not enqueued
//! again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};

pub mod file;
pub mod memory;
#[cfg(test)]
pub(crate) mod testing;

pub use file::FileTransport;
pub use memory::MemoryTransport;

/// How long a FIFO deduplication token suppresses repeats.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(300);

/// Longest accepted queue name.
const MAX_QUEUE_NAME_LEN: usize = 80;

/// A message on its way into a queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub body: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub group_id: Option<String>,
    pub dedup_id: Option<String>,
}

impl OutboundMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_fifo(mut self, group_id: impl Into<String>, dedup_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self.dedup_id = Some(dedup_id.into());
        self
    }
}

/// A message handed out by [`Transport::receive`].
///
/// It stays in flight until deleted through its `receipt`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: String,
    pub receipt: String,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
    pub group_id: Option<String>,
}

impl Delivery {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Queue transport operations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a queue if it does not exist and return its address.
    async fn create_queue(&self, name: &str) -> Result<String>;

    /// Delete a queue and everything in it. Deleting a missing queue fails.
    async fn delete_queue(&self, address: &str) -> Result<()>;

    /// Publish a message and return its message id.
    async fn publish(&self, address: &str, message: OutboundMessage) -> Result<String>;

    /// Wait up to `wait` for the next message.
    async fn receive(&self, address: &str, wait: Duration) -> Result<Option<Delivery>>;

    /// Remove an in-flight message for good.
    async fn delete_message(&self, address: &str, receipt: &str) -> Result<()>;

    /// Return in-flight messages to the queue. Returns how many were moved.
    async fn recover(&self, address: &str) -> Result<usize>;
}

/// Whether the queue behind `address` is FIFO-ordered.
pub fn is_fifo(address: &str) -> bool {
    queue_name(address).to_ascii_lowercase().ends_with(".fifo")
}

/// The queue name of an address: the last path segment of a URL, or the
/// address itself.
pub fn queue_name(address: &str) -> &str {
    let trimmed = address.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Check a queue name is non-empty, short enough, does not start with a dot,
/// and uses only `[A-Za-z0-9_.-]`.
pub fn validate_queue_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_QUEUE_NAME_LEN || name.starts_with('.') {
        return Err(Error::transport(format!(
            "Invalid queue name: '{}'",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::transport(format!(
            "Invalid characters in queue name: '{}'",
            name
        )));
    }
    Ok(())
}

/// Check that FIFO metadata is present exactly when the queue is FIFO.
pub fn check_fifo_metadata(address: &str, message: &OutboundMessage) -> Result<()> {
    let has_group = message.group_id.as_deref().is_some_and(|g| !g.is_empty());
    let has_dedup = message.dedup_id.as_deref().is_some_and(|d| !d.is_empty());

    if is_fifo(address) {
        if !has_group {
            return Err(Error::transport(format!(
                "FIFO queue {} requires a message group id",
                address
            )));
        }
        if !has_dedup {
            return Err(Error::transport(format!(
                "FIFO queue {} requires a deduplication id",
                address
            )));
        }
    } else if message.group_id.is_some() {
        return Err(Error::transport(format!(
            "Message group id is only valid on FIFO queues, not {}",
            address
        )));
    }
    Ok(())
}
