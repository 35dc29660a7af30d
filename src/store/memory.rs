//! In-memory store gateway implementation
//!
//! Stand-in for the external durable store. Suitable for single-process
//! deployments and tests; rooms are seeded at construction time.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::{current_timestamp, generate_message_id};

use super::{NewMessage, Room, StoreGateway, StoredMessage, StoredUser};

/// In-memory implementation of [`StoreGateway`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<String, Room>>,
    users: RwLock<HashMap<String, StoredUser>>,
    messages: RwLock<Vec<StoredMessage>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the given rooms
    pub fn with_rooms(rooms: impl IntoIterator<Item = Room>) -> Self {
        let map: HashMap<String, Room> = rooms
            .into_iter()
            .map(|room| (room.id.clone(), room))
            .collect();
        Self {
            rooms: RwLock::new(map),
            ..Self::default()
        }
    }

    /// Number of persisted messages (across all rooms)
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn find_room(&self, id: &str) -> Result<Option<Room>> {
        let rooms = self.rooms.read().await;
        Ok(rooms.get(id).cloned())
    }

    async fn list_rooms(&self) -> Result<Vec<Room>> {
        let rooms = self.rooms.read().await;
        let mut list: Vec<Room> = rooms.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn upsert_user(&self, id: &str, room_id: &str, username: &str) -> Result<StoredUser> {
        let user = StoredUser {
            id: id.to_string(),
            room_id: room_id.to_string(),
            username: username.to_string(),
        };
        let mut users = self.users.write().await;
        users.insert(id.to_string(), user.clone());
        Ok(user)
    }

    async fn delete_user(&self, id: &str) -> Result<()> {
        let mut users = self.users.write().await;
        users.remove(id);
        Ok(())
    }

    async fn clear_users(&self) -> Result<()> {
        let mut users = self.users.write().await;
        users.clear();
        Ok(())
    }

    async fn users_in_room(&self, room_id: &str) -> Result<Vec<StoredUser>> {
        let users = self.users.read().await;
        let mut list: Vec<StoredUser> = users
            .values()
            .filter(|u| u.room_id == room_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.username.cmp(&b.username).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage> {
        let stored = StoredMessage {
            id: generate_message_id(),
            room_id: message.room_id,
            username: message.username,
            content: message.content,
            timestamp: message.timestamp,
        };
        let mut messages = self.messages.write().await;
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn recent_messages(
        &self,
        room_id: &str,
        max_age_secs: u64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let cutoff = current_timestamp().saturating_sub(max_age_secs * 1000);

        let messages = self.messages.read().await;
        let mut recent: Vec<StoredMessage> = messages
            .iter()
            .filter(|m| m.room_id == room_id && m.timestamp >= cutoff)
            .cloned()
            .collect();
        recent.sort_by_key(|m| m.timestamp);

        // Keep only the most recent `limit`, still oldest-first
        if recent.len() > limit {
            recent.drain(..recent.len() - limit);
        }
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> MemoryStore {
        MemoryStore::with_rooms([
            Room::new("r1", "General"),
            Room::new("r2", "Major"),
            Room::new("r3", "Private"),
        ])
    }

    #[tokio::test]
    async fn test_find_room() {
        let store = seeded_store();

        let room = store.find_room("r1").await.unwrap().unwrap();
        assert_eq!(room.name, "General");

        assert!(store.find_room("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_rooms_sorted_by_name() {
        let store = MemoryStore::with_rooms([
            Room::new("a", "Zulu"),
            Room::new("b", "Alpha"),
            Room::new("c", "Mike"),
        ]);

        let rooms = store.list_rooms().await.unwrap();
        let names: Vec<&str> = rooms.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Mike", "Zulu"]);
    }

    #[tokio::test]
    async fn test_upsert_user_rebinds() {
        let store = seeded_store();

        store.upsert_user("conn-1", "r1", "alice").await.unwrap();
        let rebound = store.upsert_user("conn-1", "r2", "alice2").await.unwrap();
        assert_eq!(rebound.room_id, "r2");
        assert_eq!(rebound.username, "alice2");

        // Exactly one live user row per connection ID
        assert!(store.users_in_room("r1").await.unwrap().is_empty());
        assert_eq!(store.users_in_room("r2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_user_idempotent() {
        let store = seeded_store();

        store.upsert_user("conn-1", "r1", "alice").await.unwrap();
        store.delete_user("conn-1").await.unwrap();
        // Double delete is a no-op
        store.delete_user("conn-1").await.unwrap();

        assert!(store.users_in_room("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_users() {
        let store = seeded_store();
        store.upsert_user("conn-1", "r1", "alice").await.unwrap();
        store.upsert_user("conn-2", "r2", "bob").await.unwrap();

        store.clear_users().await.unwrap();
        assert!(store.users_in_room("r1").await.unwrap().is_empty());
        assert!(store.users_in_room("r2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_users_in_room_sorted() {
        let store = seeded_store();
        store.upsert_user("conn-2", "r1", "carol").await.unwrap();
        store.upsert_user("conn-1", "r1", "alice").await.unwrap();
        store.upsert_user("conn-3", "r1", "bob").await.unwrap();

        let users = store.users_in_room("r1").await.unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn test_recent_messages_window_and_cap() {
        let store = seeded_store();
        let now = current_timestamp();

        // One message too old for a 1-hour window
        store
            .create_message(NewMessage {
                room_id: "r1".to_string(),
                username: "alice".to_string(),
                content: "ancient".to_string(),
                timestamp: now - 2 * 60 * 60 * 1000,
            })
            .await
            .unwrap();

        // 120 fresh messages, deliberately inserted newest-first
        for i in (0..120u64).rev() {
            store
                .create_message(NewMessage {
                    room_id: "r1".to_string(),
                    username: "alice".to_string(),
                    content: format!("msg {}", i),
                    timestamp: now - 120 + i,
                })
                .await
                .unwrap();
        }

        // A message in another room must not leak in
        store
            .create_message(NewMessage {
                room_id: "r2".to_string(),
                username: "bob".to_string(),
                content: "elsewhere".to_string(),
                timestamp: now,
            })
            .await
            .unwrap();

        let recent = store.recent_messages("r1", 60 * 60, 100).await.unwrap();

        // Capped to the most recent 100, oldest first
        assert_eq!(recent.len(), 100);
        assert_eq!(recent[0].content, "msg 20");
        assert_eq!(recent[99].content, "msg 119");
        assert!(recent.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(recent.iter().all(|m| m.room_id == "r1"));
    }
}
