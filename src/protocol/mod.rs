//! Wire protocol: frames, message payloads, and codec
//!
//! The protocol is a set of length-prefixed binary frames carrying JSON
//! payloads over a single bidirectional stream. Requests carry a request ID
//! that the matching response echoes back; room events are fire-and-forget.

pub mod codec;
pub mod frame;
pub mod messages;

pub use codec::{Decodable, DecodedMessage, Encodable};
pub use frame::{Frame, FrameCodec, FrameType, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
