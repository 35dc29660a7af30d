//! Presence fan-out for room events
//!
//! Pure delivery utility: pushes joined/left notices and roster snapshots to
//! every connection currently bound to a room. Delivery is fire-and-forget
//! per recipient; each connection has a dedicated writer task draining its
//! unbounded channel, so a slow or broken recipient never blocks the rest.

use std::sync::Arc;

use tracing::{debug, error};

use crate::protocol::codec::Encodable;
use crate::protocol::frame::Frame;
use crate::protocol::messages::{UserJoined, UserLeft, UsersInRoom};

use super::registry::{BoundUser, ConnectionRegistry};

/// Fan-out of presence events to room members
#[derive(Debug, Clone)]
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Notify a room that a user has joined (the joiner included)
    pub async fn user_joined(&self, room_id: &str, username: &str, timestamp: u64) -> usize {
        let notice = UserJoined {
            username: username.to_string(),
            timestamp,
        };
        match notice.encode_frame() {
            Ok(frame) => self.broadcast(room_id, frame, None).await,
            Err(e) => {
                error!("Failed to encode userJoined notice: {}", e);
                0
            }
        }
    }

    /// Notify a room that a user has left
    pub async fn user_left(&self, room_id: &str, username: &str, timestamp: u64) -> usize {
        let notice = UserLeft {
            username: username.to_string(),
            timestamp,
        };
        match notice.encode_frame() {
            Ok(frame) => self.broadcast(room_id, frame, None).await,
            Err(e) => {
                error!("Failed to encode userLeft notice: {}", e);
                0
            }
        }
    }

    /// Push a refreshed roster snapshot to a room
    pub async fn roster(&self, room_id: &str, roster: &[BoundUser]) -> usize {
        let snapshot = UsersInRoom {
            users: roster.iter().map(BoundUser::to_entry).collect(),
        };
        match snapshot.encode_frame() {
            Ok(frame) => self.broadcast(room_id, frame, None).await,
            Err(e) => {
                error!("Failed to encode roster snapshot: {}", e);
                0
            }
        }
    }

    /// Deliver a frame to every member of a room, optionally excluding one
    /// connection. Returns the number of recipients the frame was queued
    /// for; no delivery acknowledgement is tracked.
    pub async fn broadcast(&self, room_id: &str, frame: Frame, exclude: Option<&str>) -> usize {
        let senders = self.registry.senders_for(room_id, exclude).await;
        let mut delivered = 0;
        for tx in &senders {
            // A closed channel means the peer is mid-disconnect; skip it
            if tx.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(
            "Broadcast {:?} to room {} reached {} member(s)",
            frame.frame_type, room_id, delivered
        );
        delivered
    }
}
