//! Error types for Herald.

use thiserror::Error;

/// Herald error type.
#[derive(Error, Debug)]
pub enum HeraldError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (socket, file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (invalid frames, unexpected data)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The chat handshake could not be initiated.
    ///
    /// Distinct from other failures because it means no notification can
    /// be delivered until the next reconfiguration or reconnect.
    #[error("Handshake initiation failed: {0}")]
    Handshake(String),

    /// Graceful session teardown failed
    #[error("Session teardown failed: {0}")]
    Teardown(String),

    /// Outbound message could not be handed to the transport
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// No chat session is currently held
    #[error("No active chat session")]
    NoSession,

    /// The transport does not implement the requested operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Path error (e.g., home directory not found)
    #[error("Path error: {0}")]
    Path(String),
}

/// Result type for Herald operations.
pub type HeraldResult<T> = Result<T, HeraldError>;
