//! Client-wide error types
//!
//! This module defines a centralized error type using `thiserror` for
//! clean error handling across the client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Client-wide error type
///
/// This provides a centralized error handling strategy with:
/// - Structured error variants for transport, protocol and local failures
/// - Serde support for handing errors to a UI
/// - `Clone` so one protocol error can reject every pending waiter
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ClientError {
    /// A command was issued while no connection is open
    #[error("There is no active Cloudebug connection to send to!")]
    NotConnected,

    /// The WebSocket handshake or socket failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The handshake did not complete in time
    #[error("Connection handshake timed out after {0} ms")]
    HandshakeTimeout(u64),

    /// A later connect or a disconnect cancelled the connect attempt
    #[error("The connection attempt was cancelled")]
    ConnectCancelled,

    /// The connection closed while a reply was still awaited
    #[error("The connection was closed before a reply arrived")]
    ConnectionClosed,

    /// An inbound frame could not be decoded
    #[error("Failed to parse message body from the server.")]
    Parse(String),

    /// An inbound frame carried an unrecognized discriminant
    #[error("Unknown message type received from the server.")]
    UnknownMessage(String),

    /// The server reported that a command failed
    #[error("Action unsuccessful: {0}")]
    Server(String),

    /// An outbound command could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

/// Convert ClientError to String for hosts that only surface messages
impl From<ClientError> for String {
    fn from(error: ClientError) -> String {
        error.to_string()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ClientError>;

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
