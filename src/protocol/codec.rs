//! Codec for encoding/decoding protocol messages to/from frames
//!
//! This module provides the bridge between typed messages and binary frames.

use super::frame::{Frame, FrameType};
use super::messages::*;
use bytes::Bytes;
use std::io::{self, Error as IoError, ErrorKind};

/// Trait for messages that can be encoded to frames
pub trait Encodable {
    /// Get the frame type for this message
    fn frame_type(&self) -> FrameType;

    /// Encode the message payload to bytes
    fn encode_payload(&self) -> io::Result<Bytes>;

    /// Encode the complete frame
    fn encode_frame(&self) -> io::Result<Frame> {
        Ok(Frame::new(self.frame_type(), self.encode_payload()?))
    }
}

/// Trait for messages that can be decoded from frames
pub trait Decodable: Sized {
    /// Expected frame type for this message
    fn expected_frame_type() -> FrameType;

    /// Decode the message from a payload
    fn decode_payload(payload: &[u8]) -> io::Result<Self>;

    /// Decode from a complete frame, validating the frame type
    fn decode_frame(frame: &Frame) -> io::Result<Self> {
        if frame.frame_type != Self::expected_frame_type() {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "Expected frame type {:?}, got {:?}",
                    Self::expected_frame_type(),
                    frame.frame_type
                ),
            ));
        }
        Self::decode_payload(&frame.payload)
    }
}

/// Helper macro to implement Encodable and Decodable for a message type
macro_rules! impl_codec {
    ($type:ty, $frame_type:expr) => {
        impl Encodable for $type {
            fn frame_type(&self) -> FrameType {
                $frame_type
            }

            fn encode_payload(&self) -> io::Result<Bytes> {
                serde_json::to_vec(self)
                    .map(Bytes::from)
                    .map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }

        impl Decodable for $type {
            fn expected_frame_type() -> FrameType {
                $frame_type
            }

            fn decode_payload(payload: &[u8]) -> io::Result<Self> {
                serde_json::from_slice(payload).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
            }
        }
    };
}

// Control messages
impl_codec!(Ping, FrameType::Ping);
impl_codec!(Pong, FrameType::Pong);
impl_codec!(Goodbye, FrameType::Goodbye);

// Requests
impl_codec!(GetRoomList, FrameType::GetRoomList);
impl_codec!(UserJoinRequest, FrameType::UserJoinRequest);

// Responses and room events
impl_codec!(RoomList, FrameType::RoomList);
impl_codec!(UserJoinResponse, FrameType::UserJoinResponse);
impl_codec!(UsersInRoom, FrameType::UsersInRoom);
impl_codec!(UserJoined, FrameType::UserJoined);
impl_codec!(UserLeft, FrameType::UserLeft);

// Error message
impl_codec!(ErrorNotice, FrameType::Error);

// ChatPayload rides two frame types (SendChatMessage inbound, ChatMessage
// outbound), so it cannot use impl_codec. Encodable defaults to the
// outbound broadcast type; the client wraps sends explicitly.
impl Encodable for ChatPayload {
    fn frame_type(&self) -> FrameType {
        FrameType::ChatMessage
    }

    fn encode_payload(&self) -> io::Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| IoError::new(ErrorKind::InvalidData, e))
    }
}

impl ChatPayload {
    /// Encode as a client -> server SendChatMessage frame
    pub fn encode_send_frame(&self) -> io::Result<Frame> {
        Ok(Frame::new(FrameType::SendChatMessage, self.encode_payload()?))
    }
}

/// Decode any frame into a typed message enum
#[derive(Debug, Clone)]
pub enum DecodedMessage {
    // Control
    Ping(Ping),
    Pong(Pong),
    Goodbye(Goodbye),

    // Requests
    GetRoomList(GetRoomList),
    UserJoinRequest(UserJoinRequest),
    SendChatMessage(ChatPayload),

    // Responses and room events
    RoomList(RoomList),
    UserJoinResponse(UserJoinResponse),
    ChatMessage(ChatPayload),
    UsersInRoom(UsersInRoom),
    UserJoined(UserJoined),
    UserLeft(UserLeft),

    // Error
    Error(ErrorNotice),
}

impl DecodedMessage {
    /// Decode a frame into a typed message
    pub fn decode(frame: &Frame) -> io::Result<Self> {
        match frame.frame_type {
            FrameType::Ping => Ok(Self::Ping(Ping::decode_frame(frame)?)),
            FrameType::Pong => Ok(Self::Pong(Pong::decode_frame(frame)?)),
            FrameType::Goodbye => Ok(Self::Goodbye(Goodbye::decode_frame(frame)?)),

            FrameType::GetRoomList => Ok(Self::GetRoomList(GetRoomList::decode_frame(frame)?)),
            FrameType::UserJoinRequest => {
                Ok(Self::UserJoinRequest(UserJoinRequest::decode_frame(frame)?))
            }
            // ChatPayload rides two frame types, so it bypasses decode_frame
            FrameType::SendChatMessage => {
                Ok(Self::SendChatMessage(serde_json::from_slice(&frame.payload)?))
            }
            FrameType::ChatMessage => {
                Ok(Self::ChatMessage(serde_json::from_slice(&frame.payload)?))
            }

            FrameType::RoomList => Ok(Self::RoomList(RoomList::decode_frame(frame)?)),
            FrameType::UserJoinResponse => {
                Ok(Self::UserJoinResponse(UserJoinResponse::decode_frame(frame)?))
            }
            FrameType::UsersInRoom => Ok(Self::UsersInRoom(UsersInRoom::decode_frame(frame)?)),
            FrameType::UserJoined => Ok(Self::UserJoined(UserJoined::decode_frame(frame)?)),
            FrameType::UserLeft => Ok(Self::UserLeft(UserLeft::decode_frame(frame)?)),

            FrameType::Error => Ok(Self::Error(ErrorNotice::decode_frame(frame)?)),
        }
    }
}
