//! Error types for procrelay.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout")]
    Timeout,

    #[error("Unexpected status {actual} (expected {expected}): {body}")]
    UpstreamStatus {
        expected: u16,
        actual: u16,
        body: String,
    },

    #[error("sorry!! {0} is not a supported process")]
    UnsupportedOperation(String),

    #[error("{0}")]
    Handler(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl Error {
    pub fn transport(s: impl Into<String>) -> Self {
        Error::Transport(s.into())
    }

    pub fn handler(s: impl Into<String>) -> Self {
        Error::Handler(s.into())
    }
}
