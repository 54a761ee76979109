//! Error types for tailgrid-core

use std::fmt;

use thiserror::Error;

/// Result type alias using tailgrid-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tailgrid-core
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP call to the provisioning API failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provisioning API rejected the request
    #[error("Provisioning error: {0}")]
    Provision(String),

    /// WebSocket handshake or transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A remote call did not finish within its deadline
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A source with this name is already tracked
    #[error("Source already exists: {0}")]
    DuplicateSource(String),

    /// A generic error
    #[error("{0}")]
    Other(String),
}

/// Which step of starting a live session failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStep {
    /// Creating the remote tail
    Provision,
    /// Opening the WebSocket connection
    Connect,
    /// Sending the initial configuration frame
    Configure,
}

impl fmt::Display for StartStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            StartStep::Provision => "create",
            StartStep::Connect => "connect to",
            StartStep::Configure => "configure",
        };
        f.write_str(step)
    }
}

/// Starting a live session failed; no session exists
#[derive(Error, Debug)]
#[error("failed to {step} tail: {source}")]
pub struct StartError {
    pub step: StartStep,
    pub source: Error,
}

impl StartError {
    pub fn new(step: StartStep, source: impl Into<Error>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }
}
