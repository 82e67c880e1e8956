//! procrelay library root.

pub mod actions;
pub mod cli;
pub mod client;
pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use actions::{HttpProcessApi, ProcessActions};
pub use cli::Cli;
pub use client::{FullResult, ProcessClient};
pub use config::{load_settings, Settings, SettingsSource};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use protocol::{Correlator, JobReply, JobRequest, OperationTag, Outcome};
pub use registry::{ReplyChannel, ReplyChannelRegistry};
pub use transport::{FileTransport, MemoryTransport, Transport};
