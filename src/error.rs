//! Error types for the chat hub
//!
//! Defines application-level errors, outbound send errors and
//! metadata store errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal connection errors and errors surfaced to the
/// caller of a registry or room operation.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Connection request did not name a room
    #[error("Room ID is required")]
    MissingRoomId,

    /// Room not found with the given id
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// The room's worker is no longer accepting operations
    #[error("Room closed")]
    RoomClosed,

    /// First frame did not identify the client
    #[error("Invalid identity frame: {0}")]
    InvalidIdentity(String),

    /// No identity frame arrived in time
    #[error("Timed out waiting for identity frame")]
    IdentityTimeout,
}

/// Message send errors
///
/// Occurs when delivering to a session's outbound queue fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The queue stayed full for the whole send timeout
    #[error("Send timed out")]
    Timeout,
}

/// Metadata store errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Key holds a value of a different kind than the operation expects
    #[error("Wrong value type for key: {0}")]
    WrongType(String),

    /// Backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}
