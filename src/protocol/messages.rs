//! Protocol message types for the chat system
//!
//! All message payloads that can be serialized/deserialized within frames.
//! Payloads use camelCase field names on the wire. Requests carry a
//! `request_id` that the matching response echoes back; this replaces the
//! emit-with-callback pairing of transports that support it natively.

use serde::{Deserialize, Serialize};

/// Correlation ID pairing a request frame with its response frame
pub type RequestId = u64;

// =============================================================================
// Control Messages (0x00 - 0x0F)
// =============================================================================

/// Ping message for keepalive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    /// Timestamp when ping was sent (for RTT measurement)
    pub timestamp: u64,
}

/// Pong response to Ping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
    /// Echo back the timestamp from Ping
    pub timestamp: u64,
}

/// Graceful disconnect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goodbye {
    /// Reason for disconnect
    pub reason: String,
}

// =============================================================================
// Requests (0x10 - 0x2F) - Client -> Server
// =============================================================================

/// Request the list of available rooms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRoomList {
    /// Correlation ID echoed back in the RoomList response
    pub request_id: RequestId,
}

/// Request to join a room under a display name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinRequest {
    /// Correlation ID echoed back in the UserJoinResponse
    pub request_id: RequestId,
    /// Display name to join as (not required to be unique)
    pub username: String,
    /// Room to join
    pub room_id: String,
}

/// A chat message payload
///
/// Used both for SendChatMessage (client -> server) and for the ChatMessage
/// broadcast (server -> other room members). The timestamp is supplied by
/// the sending client, in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub content: String,
    pub room_id: String,
    pub timestamp: u64,
    pub username: String,
}

// =============================================================================
// Responses and Room Events (0x30 - 0x4F) - Server -> Client
// =============================================================================

/// A room as listed in the lobby
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
}

/// Response to GetRoomList
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomList {
    pub request_id: RequestId,
    /// Rooms sorted by name
    pub rooms: Vec<RoomSummary>,
}

/// A user currently joined to a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntry {
    /// Connection ID, doubling as user ID
    pub id: String,
    pub username: String,
    pub room_id: String,
}

/// Room detail returned on a successful join
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: String,
    pub name: String,
    /// Recent history, oldest first
    pub messages: Vec<ChatPayload>,
    /// Current roster, sorted by username
    pub users: Vec<UserEntry>,
}

/// Response to UserJoinRequest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoinResponse {
    pub request_id: RequestId,
    pub success: bool,
    /// Present iff success is true
    pub room: Option<RoomInfo>,
}

/// Refreshed roster broadcast to a room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersInRoom {
    /// Sorted by username ascending, ties broken by connection ID
    pub users: Vec<UserEntry>,
}

/// A user joined the room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoined {
    pub username: String,
    pub timestamp: u64,
}

/// A user left the room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub username: String,
    pub timestamp: u64,
}

// =============================================================================
// Error Message (0xFF)
// =============================================================================

/// Error notice surfaced to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    /// Error code
    pub code: u32,
    /// Client-safe error message
    pub message: String,
    /// Related entity (room id, frame type, etc.)
    pub context: Option<String>,
    /// Set when the error answers a specific request; the client fails
    /// that request instead of waiting out its timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl ErrorNotice {
    // Common error codes
    pub const INVALID_FRAME: u32 = 1001;
    pub const NOT_FOUND: u32 = 1005;
    pub const STORE_UNAVAILABLE: u32 = 1006;
    pub const VALIDATION_FAILED: u32 = 1007;
    pub const NOT_JOINED: u32 = 1012;

    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
            request_id: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn for_request(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_FRAME, message)
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::new(Self::NOT_FOUND, format!("{} not found", entity.into()))
    }

    pub fn store_unavailable() -> Self {
        Self::new(Self::STORE_UNAVAILABLE, "Service temporarily unavailable")
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(Self::VALIDATION_FAILED, message)
    }

    pub fn not_joined() -> Self {
        Self::new(Self::NOT_JOINED, "Not joined to this room")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_join_request() {
        let req = UserJoinRequest {
            request_id: 7,
            username: "alice".to_string(),
            room_id: "room-1".to_string(),
        };

        let json = serde_json::to_string(&req).unwrap();
        // camelCase on the wire
        assert!(json.contains("\"requestId\":7"));
        assert!(json.contains("\"roomId\":\"room-1\""));

        let decoded: UserJoinRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.request_id, req.request_id);
        assert_eq!(decoded.username, req.username);
        assert_eq!(decoded.room_id, req.room_id);
    }

    #[test]
    fn test_serialize_chat_payload() {
        let msg = ChatPayload {
            content: "Hello, World!".to_string(),
            room_id: "room-1".to_string(),
            timestamp: 1234567890,
            username: "bob".to_string(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"roomId\":\"room-1\""));

        let decoded: ChatPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_join_response_failure_shape() {
        let resp = UserJoinResponse {
            request_id: 1,
            success: false,
            room: None,
        };

        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"room\":null"));
    }

    #[test]
    fn test_error_constructors() {
        let err = ErrorNotice::not_found("Room").with_context("roomId=123");
        assert_eq!(err.code, ErrorNotice::NOT_FOUND);
        assert_eq!(err.context, Some("roomId=123".to_string()));

        let err = ErrorNotice::validation_failed("username too long");
        assert_eq!(err.code, ErrorNotice::VALIDATION_FAILED);
        assert_eq!(err.request_id, None);
    }

    #[test]
    fn test_error_request_correlation() {
        let err = ErrorNotice::store_unavailable().for_request(42);
        assert_eq!(err.request_id, Some(42));

        // requestId only appears on the wire when set
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"requestId\":42"));
        let json = serde_json::to_string(&ErrorNotice::not_joined()).unwrap();
        assert!(!json.contains("requestId"));

        // and older peers that omit it still decode
        let decoded: ErrorNotice =
            serde_json::from_str(r#"{"code":1006,"message":"x","context":null}"#).unwrap();
        assert_eq!(decoded.request_id, None);
    }
}
