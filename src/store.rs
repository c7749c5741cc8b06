//! Room metadata store
//!
//! Key-value interface for mirroring room metadata outside the live
//! room actors, with an in-memory implementation. The binary attaches an
//! `InMemoryStore` to its registry. The room and registry logic never
//! depends on which backend is attached.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use crate::error::StoreError;

/// Key of the set holding every room id
pub const ROOMS_INDEX_KEY: &str = "chatrooms";

/// Key holding one room's JSON metadata
pub fn room_key(room_id: &str) -> String {
    format!("chatroom:{}", room_id)
}

/// Key of the set of rooms created by one user
pub fn creator_rooms_key(creator_id: &str) -> String {
    format!("user:{}:chatrooms", creator_id)
}

/// String values and string sets addressed by key
pub trait MetadataStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Add a member to the set at `key`, creating it if needed
    ///
    /// Returns whether the member was newly added.
    fn set_add(&self, key: &str, member: String) -> Result<bool, StoreError>;

    /// Members of the set at `key`; empty if absent
    fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, Clone)]
enum Entry {
    Value(String),
    Set(BTreeSet<String>),
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            None => Ok(None),
            Some(Entry::Value(value)) => Ok(Some(value.clone())),
            Some(Entry::Set(_)) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), Entry::Value(value));
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.contains_key(key))
    }

    fn set_add(&self, key: &str, member: String) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(BTreeSet::new()))
        {
            Entry::Set(set) => Ok(set.insert(member)),
            Entry::Value(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(Entry::Value(_)) => Err(StoreError::WrongType(key.to_string())),
        }
    }
}
