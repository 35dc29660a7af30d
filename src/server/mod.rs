//! Server-side modules: connection registry, presence fan-out, message
//! relay, the join/disconnect session coordinator, and the QUIC front end.

pub mod chat_server;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod session;

pub use chat_server::ChatServer;
pub use registry::{BoundUser, ConnectionRegistry};
pub use session::SessionCoordinator;
