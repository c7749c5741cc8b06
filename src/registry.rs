//! Room registry
//!
//! Top-level directory mapping room ids to running rooms. Constructed
//! once at startup and shared with the connection accept loop.
//!
//! The id → room map sits behind its own reader/writer lock, which is
//! never held across an `.await`; room traffic goes through each room's
//! command queue and never touches this lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::config::RoomConfig;
use crate::error::{AppError, StoreError};
use crate::room::{Room, RoomInfo};
use crate::store::{creator_rooms_key, room_key, MetadataStore, ROOMS_INDEX_KEY};
use crate::types::RoomId;

/// Rooms created at startup when seeding is enabled: (name, description)
pub const DEFAULT_ROOMS: &[(&str, &str)] = &[
    ("General Chat", "A general chat room for everyone"),
    ("Tech Talk", "Discuss technology and programming"),
    ("Random", "Chat about anything and everything"),
];

/// Creator id recorded for seeded rooms
pub const SYSTEM_CREATOR: &str = "system";

/// Registry of all rooms in the process
///
/// Rooms live for the lifetime of the registry.
pub struct RoomRegistry {
    /// All rooms: RoomId -> Room
    rooms: RwLock<HashMap<RoomId, Room>>,
    /// Settings for newly created rooms
    config: RoomConfig,
    /// Optional metadata mirror
    store: Option<Arc<dyn MetadataStore>>,
}

impl RoomRegistry {
    /// Create an empty registry
    pub fn new(config: RoomConfig) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            config,
            store: None,
        }
    }

    /// Mirror room metadata into `store` on creation
    pub fn with_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Create the default rooms
    pub async fn seed_defaults(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(DEFAULT_ROOMS.len());
        for (name, description) in DEFAULT_ROOMS {
            rooms.push(self.create(*name, *description, SYSTEM_CREATOR).await);
        }
        rooms
    }

    /// Create and start a new room
    ///
    /// Every call yields a distinct room, even with identical arguments.
    pub async fn create(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        creator_id: impl Into<String>,
    ) -> Room {
        let room = Room::spawn(name, description, creator_id, &self.config);

        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room.id(), room.clone());

        info!(
            "Room {} '{}' created by {}",
            room.id(),
            room.name(),
            room.creator_id()
        );

        if let Some(store) = &self.store {
            match room.info().await {
                Ok(info) => {
                    if let Err(e) = persist(store.as_ref(), &info) {
                        warn!("Failed to persist metadata for room {}: {}", info.id, e);
                    }
                }
                Err(e) => warn!("Failed to read info for room {}: {}", room.id(), e),
            }
        }

        room
    }

    /// Find a room by id; never creates one
    pub fn lookup(&self, id: &RoomId) -> Result<Room, AppError> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::RoomNotFound(id.to_string()))
    }

    /// Find a room by its textual id
    ///
    /// Malformed ids are reported as not found.
    pub fn lookup_str(&self, id: &str) -> Result<Room, AppError> {
        let parsed: RoomId = id
            .parse()
            .map_err(|_| AppError::RoomNotFound(id.to_string()))?;
        self.lookup(&parsed)
    }

    /// Snapshot of every room, oldest first
    pub async fn list_all(&self) -> Vec<RoomInfo> {
        let rooms = self.snapshot(|_| true);
        collect_info(rooms).await
    }

    /// Snapshot of the rooms created by `creator_id`, oldest first
    pub async fn list_by_creator(&self, creator_id: &str) -> Vec<RoomInfo> {
        let rooms = self.snapshot(|room| room.creator_id() == creator_id);
        collect_info(rooms).await
    }

    /// Number of rooms
    pub fn len(&self) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone matching handles out so no lock is held while querying rooms
    fn snapshot(&self, filter: impl Fn(&Room) -> bool) -> Vec<Room> {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        let mut selected: Vec<Room> = rooms.values().filter(|room| filter(*room)).cloned().collect();
        selected.sort_by_key(|r| (r.created_at(), r.id().0));
        selected
    }
}

async fn collect_info(rooms: Vec<Room>) -> Vec<RoomInfo> {
    let mut infos = Vec::with_capacity(rooms.len());
    for room in rooms {
        match room.info().await {
            Ok(info) => infos.push(info),
            Err(e) => debug!("Skipping room {}: {}", room.id(), e),
        }
    }
    infos
}

fn persist(store: &dyn MetadataStore, info: &RoomInfo) -> Result<(), StoreError> {
    let id = info.id.to_string();
    let json = serde_json::to_string(info).map_err(|e| StoreError::Backend(e.to_string()))?;
    store.set(&room_key(&id), json)?;
    store.set_add(ROOMS_INDEX_KEY, id.clone())?;
    store.set_add(&creator_rooms_key(&info.creator_id), id)?;
    Ok(())
}
