//! Request/reply correlation over a queue transport.

use std::sync::Arc;
use std::time::Duration;

use super::envelope::{JobReply, JobRequest, Outcome, ATTR_CORRELATION_ID};
use crate::error::Result;
use crate::registry::{ReplyChannel, ReplyChannelRegistry};
use crate::transport::{is_fifo, Transport};

/// Upper bound on one receive call while waiting for a reply.
const REPLY_POLL_WAIT: Duration = Duration::from_secs(1);

/// Publishes requests and waits for their correlated replies.
#[derive(Clone)]
pub struct Correlator {
    transport: Arc<dyn Transport>,
    registry: ReplyChannelRegistry,
    fifo_group_id: String,
}

impl Correlator {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: ReplyChannelRegistry,
        fifo_group_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            registry,
            fifo_group_id: fifo_group_id.into(),
        }
    }

    pub fn registry(&self) -> &ReplyChannelRegistry {
        &self.registry
    }

    /// Publish `request` to `target` and wait up to `timeout` for its reply.
    ///
    /// Never fails: every error is folded into the returned reply. The reply
    /// channel is released before returning on every path.
    pub async fn submit(
        &self,
        target: &str,
        mut request: JobRequest,
        timeout: Duration,
    ) -> JobReply {
        let channel = match self.registry.acquire(target).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::error!("Could not create reply channel for {}: {}", target, e);
                return JobReply::failed(request.correlation_id, e.to_string());
            }
        };

        request.reply_address = Some(channel.address().to_string());
        if is_fifo(target) {
            request.fifo_group_id = Some(self.fifo_group_id.clone());
            request.dedup_token = Some(uuid::Uuid::new_v4().simple().to_string());
        }

        let outcome = self.publish_and_wait(target, &request, &channel, timeout).await;

        if let Err(e) = self.registry.release(channel).await {
            tracing::warn!("Failed to release reply channel: {}", e);
        }

        JobReply {
            correlation_id: request.correlation_id,
            outcome,
        }
    }

    async fn publish_and_wait(
        &self,
        target: &str,
        request: &JobRequest,
        channel: &ReplyChannel,
        timeout: Duration,
    ) -> Outcome {
        let message = match request.encode() {
            Ok(message) => message,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        tracing::info!(
            "submit {} to {} (reply on {}, correlation {})",
            request.operation,
            target,
            channel.name(),
            request.correlation_id
        );
        if let Err(e) = self.transport.publish(target, message).await {
            tracing::error!("Publish to {} failed: {}", target, e);
            return Outcome::Failed(e.to_string());
        }

        let wait = self.await_reply(channel.address(), &request.correlation_id);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(reply)) => reply.outcome,
            Ok(Err(e)) => {
                tracing::error!("Waiting for reply on {} failed: {}", channel.name(), e);
                Outcome::Failed(e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    "No reply for {} within {}s",
                    request.correlation_id,
                    timeout.as_secs_f64()
                );
                Outcome::TimedOut
            }
        }
    }

    /// Receive on `address` until a reply for `correlation_id` arrives.
    /// Replies for other ids are deleted and skipped.
    async fn await_reply(&self, address: &str, correlation_id: &str) -> Result<JobReply> {
        loop {
            let Some(delivery) = self.transport.receive(address, REPLY_POLL_WAIT).await? else {
                continue;
            };
            self.transport.delete_message(address, &delivery.receipt).await?;

            match delivery.attribute(ATTR_CORRELATION_ID) {
                Some(id) if id == correlation_id => return JobReply::decode(&delivery),
                other => {
                    tracing::warn!(
                        "Discarding stale reply on {} (correlation {:?})",
                        address,
                        other
                    );
                }
            }
        }
    }
}
