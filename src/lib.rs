//! Multi-room WebSocket Chat Hub Library
//!
//! Many independent chat rooms, each broadcasting to its connected
//! members, tracking join/leave, and keeping a bounded window of recent
//! messages. Built with tokio-tungstenite using the Actor pattern.
//!
//! # Features
//! - Rooms with unique ids, created and listed through a registry
//! - Identity frame required before a client is admitted
//! - Real-time fan-out of chat messages to every member
//! - Join/leave notices and on-demand member lists
//! - Bounded FIFO history per room (default 100 messages)
//! - Slow or broken clients are evicted without affecting others
//!
//! # Architecture
//! - Each `Room` is an actor: one task drains a command queue, so all
//!   operations on a room happen in a single total order
//! - `RoomRegistry` maps room ids to room handles behind a reader/writer
//!   lock that room traffic never touches
//! - Each connection runs a read task and a write task bridging the
//!   WebSocket to its room
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use chat_hub::{handle_connection, Config, RoomRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let registry = Arc::new(RoomRegistry::new(config.room.clone()));
//!     registry.create("Lobby", "Say hi", "system").await;
//!
//!     let listener = TcpListener::bind(&config.addr).await.unwrap();
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let registry = registry.clone();
//!         tokio::spawn(handle_connection(stream, registry, config.identity_timeout));
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod history;
pub mod message;
pub mod registry;
pub mod room;
pub mod session;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use config::{Config, RoomConfig};
pub use error::{AppError, SendError, StoreError};
pub use handler::{handle_connection, run_session};
pub use history::History;
pub use message::{ClientFrame, Frame, FrameType, Message};
pub use registry::RoomRegistry;
pub use room::{Room, RoomInfo};
pub use session::ClientSession;
pub use store::{InMemoryStore, MetadataStore};
pub use types::{RoomId, SessionId};
