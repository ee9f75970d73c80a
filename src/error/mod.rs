//! Error handling module for the routing engine
//!
//! Nothing in here is fatal to the process: every failure path inside the engine
//! degrades to "serve the unmodified request".

use thiserror::Error;
use tokio::time::error::Elapsed;

/// Custom error type for the routing engine
#[derive(Error, Debug)]
pub enum Error {
    /// A user-submitted endpoint or node definition was rejected
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network or timeout failure during a single health check
    #[error("Probe failure: {0}")]
    ProbeFailure(String),

    /// A remote node-list source was unreachable or returned a malformed payload
    #[error("Fetch failure from {source_url}: {reason}")]
    FetchFailure { source_url: String, reason: String },

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Timeout error: {0}")]
    Timeout(#[from] Elapsed),
}

impl Error {
    pub fn fetch(source_url: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::FetchFailure {
            source_url: source_url.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for the routing engine
pub type Result<T> = std::result::Result<T, Error>;
