//! Request/reply protocol between the client and the worker.
//!
//! - Operation tags and their processing API routes
//! - Request and reply envelopes with correlation ids
//! - The correlator that publishes a request and waits for its reply

pub mod correlation;
pub mod envelope;
pub mod types;

pub use correlation::Correlator;
pub use envelope::{JobReply, JobRequest, Outcome};
pub use types::{OperationTag, Route, TimeoutClass};
