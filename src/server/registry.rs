//! Connection registry and derived room rosters
//!
//! Tracks every live connection together with the room/user identity bound
//! to it, plus the outbound channel used to push frames to that connection.
//! The roster of a room is never stored separately: it is derived by
//! scanning the registry, so it cannot drift out of sync with the actual
//! set of connections.
//!
//! Binding and detaching compute the post-mutation roster under the same
//! write lock, so a join and a concurrent disconnect in the same room can
//! never hand out an inconsistent roster snapshot.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};

use crate::error::{ChatError, Result};
use crate::protocol::frame::Frame;
use crate::protocol::messages::UserEntry;

/// Identity bound to a live connection while joined to a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundUser {
    /// Connection ID, doubling as user ID
    pub id: String,
    pub username: String,
    pub room_id: String,
}

impl BoundUser {
    pub fn to_entry(&self) -> UserEntry {
        UserEntry {
            id: self.id.clone(),
            username: self.username.clone(),
            room_id: self.room_id.clone(),
        }
    }
}

/// One live connection: its outbound frame channel and optional binding
#[derive(Debug)]
struct Peer {
    outbound: mpsc::UnboundedSender<Frame>,
    user: Option<BoundUser>,
}

/// Result of binding a connection into a room
#[derive(Debug)]
pub struct BindOutcome {
    /// Prior binding replaced by this one (rebind/upsert semantics)
    pub previous: Option<BoundUser>,
    /// Roster of the joined room, including the new member
    pub roster: Vec<BoundUser>,
}

/// Result of detaching a connection
#[derive(Debug)]
pub struct Departure {
    /// The binding the connection held, if any
    pub user: Option<BoundUser>,
    /// Roster of the former room, excluding the departed member
    pub roster: Vec<BoundUser>,
}

/// Registry of live connections and their room bindings
#[derive(Debug)]
pub struct ConnectionRegistry {
    peers: RwLock<HashMap<String, Peer>>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Register a new connection and its outbound channel
    pub async fn attach(
        &self,
        connection_id: &str,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Result<()> {
        let mut peers = self.peers.write().await;

        if peers.len() >= self.max_connections {
            return Err(ChatError::resource_limit(format!(
                "Maximum connections reached: {}",
                self.max_connections
            )));
        }

        peers.insert(
            connection_id.to_string(),
            Peer {
                outbound,
                user: None,
            },
        );
        Ok(())
    }

    /// Look up the user bound to a connection, if any
    pub async fn lookup(&self, connection_id: &str) -> Option<BoundUser> {
        let peers = self.peers.read().await;
        peers.get(connection_id).and_then(|p| p.user.clone())
    }

    /// Get the outbound channel for a connection
    pub async fn sender_of(&self, connection_id: &str) -> Option<mpsc::UnboundedSender<Frame>> {
        let peers = self.peers.read().await;
        peers.get(connection_id).map(|p| p.outbound.clone())
    }

    /// Bind a connection into a room, replacing any prior binding
    ///
    /// Fails if the connection is no longer attached, which happens when a
    /// disconnect races ahead of an in-flight join. The returned roster is
    /// computed under the same write lock as the mutation.
    pub async fn bind(
        &self,
        connection_id: &str,
        room_id: &str,
        username: &str,
    ) -> Result<BindOutcome> {
        let mut peers = self.peers.write().await;

        let peer = peers.get_mut(connection_id).ok_or_else(|| {
            ChatError::connection(format!("Connection {} is not attached", connection_id))
        })?;

        let previous = peer.user.replace(BoundUser {
            id: connection_id.to_string(),
            username: username.to_string(),
            room_id: room_id.to_string(),
        });

        let roster = roster_locked(&peers, room_id);
        Ok(BindOutcome { previous, roster })
    }

    /// Restore a prior binding after a failed join step
    pub async fn restore(&self, connection_id: &str, previous: Option<BoundUser>) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(connection_id) {
            peer.user = previous;
        }
    }

    /// Remove a connection and return its binding plus the refreshed roster
    /// of its former room
    ///
    /// Idempotent: returns None if the connection was already detached.
    pub async fn detach(&self, connection_id: &str) -> Option<Departure> {
        let mut peers = self.peers.write().await;
        let peer = peers.remove(connection_id)?;

        let roster = match &peer.user {
            Some(user) => roster_locked(&peers, &user.room_id),
            None => Vec::new(),
        };

        Some(Departure {
            user: peer.user,
            roster,
        })
    }

    /// Current roster of a room, sorted by username (ties broken by
    /// connection ID)
    pub async fn roster_of(&self, room_id: &str) -> Vec<BoundUser> {
        let peers = self.peers.read().await;
        roster_locked(&peers, room_id)
    }

    /// Outbound channels for every member of a room, optionally excluding
    /// one connection
    pub async fn senders_for(
        &self,
        room_id: &str,
        exclude: Option<&str>,
    ) -> Vec<mpsc::UnboundedSender<Frame>> {
        let peers = self.peers.read().await;
        peers
            .iter()
            .filter(|(id, peer)| {
                peer.user.as_ref().is_some_and(|u| u.room_id == room_id)
                    && exclude != Some(id.as_str())
            })
            .map(|(_, peer)| peer.outbound.clone())
            .collect()
    }

    /// Number of attached connections
    pub async fn connection_count(&self) -> usize {
        let peers = self.peers.read().await;
        peers.len()
    }
}

fn roster_locked(peers: &HashMap<String, Peer>, room_id: &str) -> Vec<BoundUser> {
    let mut roster: Vec<BoundUser> = peers
        .values()
        .filter_map(|p| p.user.clone())
        .filter(|u| u.room_id == room_id)
        .collect();
    roster.sort_by(|a, b| a.username.cmp(&b.username).then(a.id.cmp(&b.id)));
    roster
}
