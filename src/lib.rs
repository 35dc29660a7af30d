//! QUIC-based chat room server with JSON serialization
//!
//! This library provides a chat server that lets clients join named rooms,
//! exchange text messages in real time, see a live roster of who is present,
//! and replay recent history when they join. Rooms, users, and messages live
//! behind a pluggable store gateway; presence and message fan-out are
//! coordinated in memory per connection.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;

pub use client::{ChatClient, ChatClientConfig, ClientEvent};
pub use error::{ChatError, Result};
pub use server::ChatServer;

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a unique connection ID
///
/// The connection ID doubles as the user ID for as long as the connection
/// is bound to a room.
pub fn generate_connection_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a unique message ID
pub fn generate_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Chat server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Server listen address
    pub bind_addr: std::net::SocketAddr,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Connection idle timeout in seconds
    pub idle_timeout_secs: u64,
    /// Maximum frame payload size in bytes
    pub max_message_size: usize,
    /// History lookback window applied when replaying messages on join
    pub history_max_age_secs: u64,
    /// Maximum number of messages replayed on join
    pub history_limit: usize,
    /// Pacing delay applied before answering a room-list request.
    ///
    /// Deliberate UX pacing inherited from the protocol, not a timeout or
    /// backoff. Clients must not interpret it as a cancellation signal or
    /// retry the request early.
    pub room_list_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4433".parse().unwrap(),
            max_connections: 1000,
            idle_timeout_secs: 300,
            max_message_size: 64 * 1024, // 64KB
            history_max_age_secs: 60 * 60 * 24,
            history_limit: 100,
            room_list_delay: Duration::from_millis(1500),
        }
    }
}
