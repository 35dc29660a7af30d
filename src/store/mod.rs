//! Store gateway for rooms, users, and messages
//!
//! The durable store is an external collaborator; the core only talks to it
//! through the [`StoreGateway`] trait. Rooms are created out of band (seed
//! data) and never mutated here. Users are ephemeral rows keyed by
//! connection ID. Messages are append-only.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::messages::{ChatPayload, UserEntry};

/// A named chat room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    /// Display name, unique across rooms
    pub name: String,
}

impl Room {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A currently connected participant, keyed by connection ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredUser {
    /// Connection ID, doubling as user ID
    pub id: String,
    pub room_id: String,
    pub username: String,
}

impl StoredUser {
    pub fn to_entry(&self) -> UserEntry {
        UserEntry {
            id: self.id.clone(),
            username: self.username.clone(),
            room_id: self.room_id.clone(),
        }
    }
}

/// An immutable record of one chat utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub room_id: String,
    pub username: String,
    pub content: String,
    /// Client-supplied, epoch milliseconds
    pub timestamp: u64,
}

impl StoredMessage {
    pub fn to_payload(&self) -> ChatPayload {
        ChatPayload {
            content: self.content.clone(),
            room_id: self.room_id.clone(),
            timestamp: self.timestamp,
            username: self.username.clone(),
        }
    }
}

/// Payload for persisting a new message
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: String,
    pub username: String,
    pub content: String,
    pub timestamp: u64,
}

/// Interface to the durable store consumed by the core
///
/// Implementations are expected to serialize conflicting writes to the same
/// user/message row; the core performs no transaction coordination beyond
/// upsert/delete-by-id.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Look up a room by ID
    async fn find_room(&self, id: &str) -> Result<Option<Room>>;

    /// List all rooms, sorted by name
    async fn list_rooms(&self) -> Result<Vec<Room>>;

    /// Create or update the user bound to a connection ID
    async fn upsert_user(&self, id: &str, room_id: &str, username: &str) -> Result<StoredUser>;

    /// Delete the user bound to a connection ID (idempotent)
    async fn delete_user(&self, id: &str) -> Result<()>;

    /// Delete every user row (stale-session cleanup at server start)
    async fn clear_users(&self) -> Result<()>;

    /// List users in a room, sorted by username
    async fn users_in_room(&self, room_id: &str) -> Result<Vec<StoredUser>>;

    /// Persist a message
    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage>;

    /// Messages for a room newer than `max_age_secs`, ascending by
    /// timestamp, capped to the most recent `limit`
    async fn recent_messages(
        &self,
        room_id: &str,
        max_age_secs: u64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>>;
}
