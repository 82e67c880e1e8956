//! Reply channel registry.
//!
//! Every correlated call gets its own reply queue. The name is derived from
//! the target queue (`<prefix><target>_<suffix>`) with a random suffix, so
//! channels are never shared between calls or processes and are re-created
//! lazily on each acquisition. Creation for one target is serialized.
//!
//! A [`ReplyChannel`] is released exactly once: [`ReplyChannelRegistry::release`]
//! consumes it, and a channel dropped unreleased (an abandoned wait) is
//! deleted by a background task.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::transport::{queue_name, Transport};

/// Length of the random channel name suffix.
const SUFFIX_LEN: usize = 12;

struct Inner {
    transport: Arc<dyn Transport>,
    prefix: String,
    creation_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    live: Mutex<HashSet<String>>,
}

impl Inner {
    fn forget(&self, name: &str) -> bool {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }
}

/// An ephemeral reply destination owned by one call.
pub struct ReplyChannel {
    name: String,
    address: String,
    owner_key: String,
    registry: Option<Arc<Inner>>,
}

impl ReplyChannel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Name of the target queue this channel serves.
    pub fn owner_key(&self) -> &str {
        &self.owner_key
    }
}

impl std::fmt::Debug for ReplyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyChannel")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("owner_key", &self.owner_key)
            .finish()
    }
}

impl Drop for ReplyChannel {
    fn drop(&mut self) {
        let Some(inner) = self.registry.take() else {
            return;
        };
        if !inner.forget(&self.name) {
            return;
        }

        let address = std::mem::take(&mut self.address);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Reply channel {} dropped unreleased, deleting", self.name);
                handle.spawn(async move {
                    if let Err(e) = inner.transport.delete_queue(&address).await {
                        tracing::warn!("Failed to delete abandoned reply queue {}: {}", address, e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("Reply queue {} leaked: no runtime to delete it", address);
            }
        }
    }
}

/// Allocates and releases reply channels.
#[derive(Clone)]
pub struct ReplyChannelRegistry {
    inner: Arc<Inner>,
}

impl ReplyChannelRegistry {
    pub fn new(transport: Arc<dyn Transport>, prefix: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                prefix: prefix.into(),
                creation_locks: Mutex::new(HashMap::new()),
                live: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Deterministic part of the channel name for a target queue.
    pub fn channel_stem(&self, target: &str) -> String {
        let name = queue_name(target);
        let base = name
            .strip_suffix(".fifo")
            .or_else(|| name.strip_suffix(".FIFO"))
            .unwrap_or(name);
        format!("{}{}", self.inner.prefix, base)
    }

    /// Create a fresh reply channel for `target`.
    pub async fn acquire(&self, target: &str) -> Result<ReplyChannel> {
        let owner_key = queue_name(target).to_string();
        let lock = {
            let mut locks = self
                .inner
                .creation_locks
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            locks.entry(owner_key.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;

        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}_{}", self.channel_stem(target), &suffix[..SUFFIX_LEN]);
        let address = self.inner.transport.create_queue(&name).await?;

        self.inner
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.clone());
        tracing::debug!("Acquired reply channel {} for {}", name, owner_key);

        Ok(ReplyChannel {
            name,
            address,
            owner_key,
            registry: Some(self.inner.clone()),
        })
    }

    /// Delete the channel's queue.
    pub async fn release(&self, mut channel: ReplyChannel) -> Result<()> {
        let Some(inner) = channel.registry.take() else {
            return Ok(());
        };
        inner.forget(&channel.name);
        inner.transport.delete_queue(&channel.address).await?;
        tracing::debug!("Released reply channel {}", channel.name);
        Ok(())
    }

    /// Names of channels acquired and not yet released.
    pub fn live(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
