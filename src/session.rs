//! Client session definition
//!
//! Represents an admitted connection inside a room: its id, display
//! name and the outbound queue its writer task drains.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::SendError;
use crate::message::Message;
use crate::types::SessionId;

/// Outbound queue depth per session
pub const OUTBOUND_BUFFER_SIZE: usize = 32;

/// A registered client
///
/// Owned by exactly one room while registered. Dropping it closes the
/// outbound queue, which ends the connection's writer task and closes
/// the transport.
#[derive(Debug)]
pub struct ClientSession {
    /// Unique identifier for this session
    pub id: SessionId,
    /// Display name from the identity frame
    pub name: String,
    /// Room → Client message channel
    sender: mpsc::Sender<Message>,
}

impl ClientSession {
    /// Create a session together with the receiving end of its queue
    pub fn channel(name: impl Into<String>) -> (Self, mpsc::Receiver<Message>) {
        Self::with_buffer(name, OUTBOUND_BUFFER_SIZE)
    }

    /// Like [`ClientSession::channel`] with an explicit queue depth
    pub fn with_buffer(name: impl Into<String>, buffer: usize) -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let session = Self {
            id: SessionId::new(),
            name: name.into(),
            sender,
        };
        (session, receiver)
    }

    /// Get the display name for this session
    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// Queue a message for this session
    ///
    /// Waits at most `timeout` for queue space. Fails if the writer side
    /// has gone away or the queue stays full.
    pub async fn send(&self, msg: Message, timeout: Duration) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.sender.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::ChannelClosed),
            Err(_) => Err(SendError::Timeout),
        }
    }
}
