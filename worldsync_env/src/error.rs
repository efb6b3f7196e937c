//! Error types for the WorldSync environment abstraction.

use thiserror::Error;

/// Errors that can occur at the transport boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    /// The connection to the coordinator is gone
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The transport handed out a request id that is not fresh
    #[error("Request id {0} reused by transport")]
    RequestIdReused(u64),

    /// The coordinator reported a fatal condition
    #[error("Fatal remote error: {0}")]
    Fatal(String),

    /// Malformed connection arguments
    #[error("Usage error: {0}")]
    Usage(String),
}

impl EnvError {
    /// Creates a connection-lost error.
    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Self::ConnectionLost(msg.into())
    }

    /// Creates a usage error.
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }
}
