//! Worker loop: receive requests, run them against the processing API, reply.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::actions::{self, ProcessActions};
use crate::config::DEFAULT_FIFO_GROUP_ID;
use crate::error::Result;
use crate::protocol::envelope::{ATTR_CORRELATION_ID, ATTR_REPLY_TO};
use crate::protocol::{JobReply, JobRequest, Outcome};
use crate::transport::{Delivery, Transport};

/// Single sequential consumer of the inbound queue.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    actions: Arc<dyn ProcessActions>,
    inbound: String,
    receive_wait: Duration,
    reply_group_id: String,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        actions: Arc<dyn ProcessActions>,
        inbound: impl Into<String>,
        receive_wait: Duration,
    ) -> Self {
        Self {
            transport,
            actions,
            inbound: inbound.into(),
            receive_wait,
            reply_group_id: DEFAULT_FIFO_GROUP_ID.to_string(),
        }
    }

    /// Group id for FIFO replies to requests that carried none.
    pub fn with_reply_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.reply_group_id = group_id.into();
        self
    }

    pub fn inbound(&self) -> &str {
        &self.inbound
    }

    /// Create the inbound queue and return orphaned in-flight requests to it.
    pub async fn prepare(&self) -> Result<usize> {
        self.transport.create_queue(&self.inbound).await?;
        let recovered = self.transport.recover(&self.inbound).await?;
        if recovered > 0 {
            tracing::info!("Recovered {} in-flight requests on {}", recovered, self.inbound);
        }
        Ok(recovered)
    }

    /// Run until a receive from the inbound queue fails.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Listening on {}", self.inbound);
        loop {
            self.poll_once().await?;
        }
    }

    /// Handle at most one message. Returns whether one was handled.
    ///
    /// Only a receive failure is returned as an error; anything that goes
    /// wrong with the message itself becomes an error reply.
    pub async fn poll_once(&self) -> Result<bool> {
        let delivery = match self.transport.receive(&self.inbound, self.receive_wait).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => return Ok(false),
            Err(e) => {
                tracing::error!("Receive from {} failed: {}", self.inbound, e);
                return Err(e);
            }
        };

        self.handle(delivery).await;
        Ok(true)
    }

    async fn handle(&self, delivery: Delivery) {
        tracing::info!("Received {} : {}", delivery.id, delivery.body);

        let correlation_id = delivery
            .attribute(ATTR_CORRELATION_ID)
            .unwrap_or_default()
            .to_string();
        let outcome = match self.process(&delivery).await {
            Ok(body) => Outcome::Success(body),
            Err(e) => {
                tracing::error!("Message {} failed: {}", delivery.id, e);
                Outcome::Failed(e.to_string())
            }
        };

        match delivery.attribute(ATTR_REPLY_TO) {
            Some(reply_to) => {
                let reply = JobReply {
                    correlation_id,
                    outcome,
                };
                let group = delivery.group_id.as_deref().unwrap_or(&self.reply_group_id);
                if let Err(e) = self.reply(reply_to, &reply, group).await {
                    tracing::error!("Failed to reply to {}: {}", reply_to, e);
                }
            }
            None => {
                tracing::warn!("Message {} has no reply address, dropping result", delivery.id);
            }
        }

        if let Err(e) = self
            .transport
            .delete_message(&self.inbound, &delivery.receipt)
            .await
        {
            tracing::warn!("Failed to delete message {}: {}", delivery.id, e);
        }
    }

    async fn process(&self, delivery: &Delivery) -> Result<Value> {
        let request = JobRequest::decode(delivery)?;
        tracing::info!("Received message of type : {}", request.operation);
        actions::invoke(self.actions.as_ref(), &request).await
    }

    async fn reply(&self, reply_to: &str, reply: &JobReply, group_id: &str) -> Result<()> {
        let message = reply.encode(reply_to, group_id)?;
        self.transport.publish(reply_to, message).await?;
        tracing::debug!("Replied to {} for {}", reply_to, reply.correlation_id);
        Ok(())
    }
}
