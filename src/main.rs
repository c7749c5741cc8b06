//! Multi-room WebSocket Chat Hub - Entry Point
//!
//! Builds the room registry with its metadata store, optionally seeds
//! the default rooms and accepts connections.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_hub::{handle_connection, Config, InMemoryStore, RoomRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_hub=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_hub=info")),
        )
        .init();

    let config = Config::from_env()?;

    // Room metadata is mirrored in-process; a networked backend plugs in
    // through the same MetadataStore trait
    let registry = Arc::new(
        RoomRegistry::new(config.room.clone()).with_store(Arc::new(InMemoryStore::new())),
    );
    if config.seed_default_rooms {
        for room in registry.seed_defaults().await {
            info!("Room '{}': ws://{}/ws?roomId={}", room.name(), config.addr, room.id());
        }
    }

    // Start TCP listener
    let listener = TcpListener::bind(&config.addr).await?;
    info!("Chat hub listening on {}", config.addr);

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let registry = Arc::clone(&registry);
                let identity_timeout = config.identity_timeout;

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, registry, identity_timeout).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
