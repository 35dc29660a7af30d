//! Message relay: fan out a chat message, then persist it
//!
//! Delivery and durability are independent, best-effort operations. The
//! broadcast goes to every room member except the sender (clients render
//! their own copy locally), and a persistence failure is logged without
//! retracting the already-delivered broadcast or retrying.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::protocol::codec::Encodable;
use crate::protocol::messages::ChatPayload;
use crate::store::{NewMessage, StoreGateway};

use super::registry::ConnectionRegistry;

/// Validates and fans out chat messages for a room
pub struct MessageRelay {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn StoreGateway>,
}

impl MessageRelay {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn StoreGateway>) -> Self {
        Self { registry, store }
    }

    /// Relay a chat message from the given sender connection
    ///
    /// The only validation is that the target room is the sender's
    /// currently-joined room; content is trusted as-is. Returns the number
    /// of recipients the message was queued for.
    pub async fn send(&self, sender_id: &str, payload: ChatPayload) -> Result<usize> {
        let binding = self
            .registry
            .lookup(sender_id)
            .await
            .ok_or_else(|| ChatError::protocol("Sender is not joined to any room"))?;

        if binding.room_id != payload.room_id {
            return Err(ChatError::protocol(format!(
                "Sender is joined to room {}, not {}",
                binding.room_id, payload.room_id
            )));
        }

        let frame = payload
            .encode_frame()
            .map_err(|e| ChatError::serialization(e.to_string()))?;

        // Broadcast first: everyone in the room except the sender
        let senders = self
            .registry
            .senders_for(&payload.room_id, Some(sender_id))
            .await;
        let mut delivered = 0;
        for tx in &senders {
            if tx.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(
            "Relayed message from {} to {} member(s) of room {}",
            payload.username, delivered, payload.room_id
        );

        // Then persist; a failure here does not retract the broadcast
        if let Err(e) = self
            .store
            .create_message(NewMessage {
                room_id: payload.room_id.clone(),
                username: payload.username.clone(),
                content: payload.content.clone(),
                timestamp: payload.timestamp,
            })
            .await
        {
            warn!("Failed to persist message for room {}: {}", payload.room_id, e);
        }

        Ok(delivered)
    }
}
