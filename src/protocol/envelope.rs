//! Request and reply envelopes and their wire encoding.
//!
//! Request body: `{"job_type", "process_id"?, "job_id"?, "payload_data"?, "uuid"?}`.
//! The correlation id and reply address travel as message attributes.
//! Reply body is the processing API's JSON passed through unchanged, or
//! `{"Error": message}` when the reply `Status` attribute is `error`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::types::OperationTag;
use crate::error::{Error, Result};
use crate::transport::{is_fifo, Delivery, OutboundMessage};

pub const ATTR_CORRELATION_ID: &str = "CorrelationId";
pub const ATTR_REPLY_TO: &str = "ReplyTo";
pub const ATTR_STATUS: &str = "Status";

const STATUS_OK: &str = "ok";
const STATUS_ERROR: &str = "error";

/// Key of the error object in failure replies.
pub const ERROR_KEY: &str = "Error";
pub const TIMEOUT_MESSAGE: &str = "Timeout";

#[derive(Debug, Serialize, Deserialize)]
struct WireRequest {
    job_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    process_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
}

/// A request for one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub operation: OperationTag,
    pub process_id: Option<String>,
    pub job_id: Option<String>,
    pub payload: Option<Value>,
    pub correlation_id: String,
    pub reply_address: Option<String>,
    pub fifo_group_id: Option<String>,
    pub dedup_token: Option<String>,
}

impl JobRequest {
    /// Create a request with a fresh correlation id.
    pub fn new(operation: OperationTag) -> Self {
        Self {
            operation,
            process_id: None,
            job_id: None,
            payload: None,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            reply_address: None,
            fifo_group_id: None,
            dedup_token: None,
        }
    }

    pub fn with_process(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = Some(process_id.into());
        self
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn require_process_id(&self) -> Result<&str> {
        self.process_id
            .as_deref()
            .ok_or_else(|| Error::handler(format!("{} requires process_id", self.operation)))
    }

    pub fn require_job_id(&self) -> Result<&str> {
        self.job_id
            .as_deref()
            .ok_or_else(|| Error::handler(format!("{} requires job_id", self.operation)))
    }

    pub fn require_payload(&self) -> Result<&Value> {
        self.payload
            .as_ref()
            .ok_or_else(|| Error::handler(format!("{} requires payload_data", self.operation)))
    }

    /// The JSON body as published.
    pub fn wire_body(&self) -> Value {
        let wire = WireRequest {
            job_type: self.operation.as_str().to_string(),
            process_id: self.process_id.clone(),
            job_id: self.job_id.clone(),
            payload_data: self.payload.clone(),
            uuid: self.dedup_token.clone(),
        };
        // A struct of strings and JSON values always serializes
        serde_json::to_value(wire).unwrap_or(Value::Null)
    }

    /// Encode as a transport message.
    pub fn encode(&self) -> Result<OutboundMessage> {
        let mut message = OutboundMessage::new(serde_json::to_string(&self.wire_body())?)
            .with_attribute(ATTR_CORRELATION_ID, self.correlation_id.clone());
        if let Some(reply_to) = &self.reply_address {
            message = message.with_attribute(ATTR_REPLY_TO, reply_to.clone());
        }
        message.group_id = self.fifo_group_id.clone();
        message.dedup_id = self.dedup_token.clone();
        Ok(message)
    }

    /// Decode a received message.
    ///
    /// An unknown `job_type` yields [`Error::UnsupportedOperation`].
    pub fn decode(delivery: &Delivery) -> Result<Self> {
        let wire: WireRequest = serde_json::from_str(&delivery.body)?;
        let operation: OperationTag = wire.job_type.parse()?;

        Ok(Self {
            operation,
            process_id: wire.process_id,
            job_id: wire.job_id,
            payload: wire.payload_data,
            correlation_id: delivery
                .attribute(ATTR_CORRELATION_ID)
                .unwrap_or_default()
                .to_string(),
            reply_address: delivery.attribute(ATTR_REPLY_TO).map(str::to_string),
            fifo_group_id: delivery.group_id.clone(),
            dedup_token: wire.uuid,
        })
    }
}

/// How a request settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    TimedOut,
    Failed(String),
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        !matches!(self, Outcome::Success(_))
    }

    /// User-facing JSON: the body, or `{"Error": message}`.
    pub fn to_json(&self) -> Value {
        match self {
            Outcome::Success(body) => body.clone(),
            Outcome::TimedOut => json!({ ERROR_KEY: TIMEOUT_MESSAGE }),
            Outcome::Failed(message) => json!({ ERROR_KEY: message }),
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self {
            Outcome::Success(body) => Ok(body),
            Outcome::TimedOut => Err(Error::Timeout),
            Outcome::Failed(message) => Err(Error::Handler(message)),
        }
    }
}

/// The settled result of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReply {
    pub correlation_id: String,
    pub outcome: Outcome,
}

impl JobReply {
    pub fn success(correlation_id: impl Into<String>, body: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: Outcome::Success(body),
        }
    }

    pub fn failed(correlation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: Outcome::Failed(message.into()),
        }
    }

    pub fn timed_out(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: Outcome::TimedOut,
        }
    }

    pub fn is_error(&self) -> bool {
        self.outcome.is_error()
    }

    /// Encode for publishing to `reply_to`.
    ///
    /// A FIFO reply queue gets the request's group (or `fallback_group`) and
    /// a fresh deduplication token.
    pub fn encode(&self, reply_to: &str, fallback_group: &str) -> Result<OutboundMessage> {
        let status = if self.is_error() { STATUS_ERROR } else { STATUS_OK };
        let mut message = OutboundMessage::new(serde_json::to_string(&self.outcome.to_json())?)
            .with_attribute(ATTR_CORRELATION_ID, self.correlation_id.clone())
            .with_attribute(ATTR_STATUS, status);

        if is_fifo(reply_to) {
            message = message.with_fifo(fallback_group, uuid::Uuid::new_v4().simple().to_string());
        }
        Ok(message)
    }

    /// Decode a received reply.
    pub fn decode(delivery: &Delivery) -> Result<Self> {
        let correlation_id = delivery
            .attribute(ATTR_CORRELATION_ID)
            .unwrap_or_default()
            .to_string();
        let body: Value = serde_json::from_str(&delivery.body)?;

        let outcome = match delivery.attribute(ATTR_STATUS) {
            Some(STATUS_ERROR) => {
                let message = match body.get(ERROR_KEY) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => body.to_string(),
                };
                if message == TIMEOUT_MESSAGE {
                    Outcome::TimedOut
                } else {
                    Outcome::Failed(message)
                }
            }
            _ => Outcome::Success(body),
        };

        Ok(Self {
            correlation_id,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn deliver(message: OutboundMessage) -> Delivery {
        Delivery {
            id: "01J0000000000000000000000".to_string(),
            receipt: "r1".to_string(),
            body: message.body,
            attributes: message.attributes,
            group_id: message.group_id,
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let mut request = JobRequest::new(OperationTag::GetStatus)
            .with_process("p1")
            .with_job("j1");
        request.reply_address = Some("reply_queue_jobs_abc".to_string());

        let message = request.encode().unwrap();
        let body: Value = serde_json::from_str(&message.body).unwrap();
        assert_eq!(
            body,
            json!({"job_type": "GetStatus", "process_id": "p1", "job_id": "j1"})
        );
        assert_eq!(
            message.attributes.get(ATTR_REPLY_TO).map(String::as_str),
            Some("reply_queue_jobs_abc")
        );
        assert!(message.group_id.is_none());
        assert!(message.dedup_id.is_none());
    }

    #[test]
    fn test_request_decode() {
        let mut request = JobRequest::new(OperationTag::Execute)
            .with_process("p1")
            .with_payload(json!({"inputs": {"x": 1}}));
        request.reply_address = Some("reply".to_string());
        request.fifo_group_id = Some("g".to_string());
        request.dedup_token = Some("tok".to_string());

        let decoded = JobRequest::decode(&deliver(request.encode().unwrap())).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_decode_unknown_job_type() {
        let delivery = Delivery {
            id: "x".to_string(),
            receipt: "r".to_string(),
            body: r#"{"job_type": "Frobnicate"}"#.to_string(),
            attributes: BTreeMap::new(),
            group_id: None,
        };
        let err = JobRequest::decode(&delivery).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(_)));
    }

    #[test]
    fn test_reply_outcomes() {
        let ok = JobReply::success("c1", json!({"processes": []}));
        let decoded = JobReply::decode(&deliver(ok.encode("reply", "g").unwrap())).unwrap();
        assert_eq!(decoded, ok);

        let failed = JobReply::failed("c2", "boom");
        let message = failed.encode("reply", "g").unwrap();
        let body: Value = serde_json::from_str(&message.body).unwrap();
        assert_eq!(body, json!({"Error": "boom"}));
        assert_eq!(JobReply::decode(&deliver(message)).unwrap(), failed);

        let timed_out = JobReply::timed_out("c3");
        assert_eq!(timed_out.outcome.to_json(), json!({"Error": "Timeout"}));
    }

    #[test]
    fn test_reply_to_fifo_queue_carries_metadata() {
        let message = JobReply::success("c1", Value::Null)
            .encode("replies.fifo", "g")
            .unwrap();
        assert_eq!(message.group_id.as_deref(), Some("g"));
        assert!(message.dedup_id.is_some());
    }
}
