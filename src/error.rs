//! Error types for the race game client.

use thiserror::Error;

/// Errors that can occur when using the race game client.
#[derive(Debug, Error)]
pub enum RaceError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Establishing a new connection to the endpoint failed.
    #[error("connect error: {0}")]
    Connect(String),

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An inbound frame did not carry a string `$type` discriminator.
    #[error("message has no `$type` discriminator")]
    MissingDiscriminator,

    /// The connection loop has exited; no further messages can be queued.
    #[error("not connected to server")]
    NotConnected,

    /// A game operation needs a game id and user id that the session does not hold yet.
    #[error("session has no game key")]
    NoGameKey,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for race game client operations.
pub type Result<T> = std::result::Result<T, RaceError>;
