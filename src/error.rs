//! Error types for qreader.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all consumer operations.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Transport failure (refused, reset, name resolution).
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A connect, handshake or heartbeat deadline elapsed.
    #[error("Timed out after {0:?} during {1}")]
    Timeout(Duration, &'static str),

    /// The broker closed the socket.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed frame or unexpected frame during the handshake.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The broker answered a handshake command with an error frame.
    #[error("Handshake rejected by broker: {0}")]
    HandshakeRejected(String),

    /// The broker sent an error frame classified as fatal after subscribing.
    #[error("Broker error: {0}")]
    Broker(String),

    /// Command encoder was given structurally invalid parameters.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Consumer configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON error on the IDENTIFY body or the feature negotiation response.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConsumerError {
    /// Errors that end the current connection but are recovered by reconnecting.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            ConsumerError::Connection(_)
                | ConsumerError::Timeout(..)
                | ConsumerError::ConnectionClosed
                | ConsumerError::ProtocolViolation(_)
                | ConsumerError::Broker(_)
                | ConsumerError::Json(_)
        )
    }

    /// Programming errors, surfaced to the caller and never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsumerError::InvalidCommand(_) | ConsumerError::InvalidConfig(_)
        )
    }
}

/// Result type alias using ConsumerError.
pub type Result<T> = std::result::Result<T, ConsumerError>;
