//! Error handling for the chat server

use std::fmt;

/// Result type alias for chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Chat server error types
#[derive(Debug, Clone)]
pub enum ChatError {
    /// Network-related errors
    Network(String),
    /// Connection errors
    Connection(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// Protocol errors (unexpected or out-of-order frames)
    Protocol(String),
    /// Invalid message format or size
    InvalidMessage(String),
    /// Requested entity (room, user) does not exist
    NotFound(String),
    /// The durable store is unreachable or failed mid-operation
    Store(String),
    /// Payload rejected by validation
    Validation(String),
    /// Configuration error
    Config(String),
    /// Timeout error
    Timeout(String),
    /// Resource limit exceeded
    ResourceLimit(String),
    /// Server internal error
    Internal(String),
}

impl ChatError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Network(_) => 1000,
            ChatError::Connection(_) => 1001,
            ChatError::Serialization(_) => 1002,
            ChatError::Protocol(_) => 1003,
            ChatError::InvalidMessage(_) => 1004,
            ChatError::NotFound(_) => 1005,
            ChatError::Store(_) => 1006,
            ChatError::Validation(_) => 1007,
            ChatError::Config(_) => 1008,
            ChatError::Timeout(_) => 1009,
            ChatError::ResourceLimit(_) => 1010,
            ChatError::Internal(_) => 1011,
        }
    }

    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            ChatError::Network(msg)
            | ChatError::Connection(msg)
            | ChatError::Serialization(msg)
            | ChatError::Protocol(msg)
            | ChatError::InvalidMessage(msg)
            | ChatError::NotFound(msg)
            | ChatError::Store(msg)
            | ChatError::Validation(msg)
            | ChatError::Config(msg)
            | ChatError::Timeout(msg)
            | ChatError::ResourceLimit(msg)
            | ChatError::Internal(msg) => msg,
        }
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }

    /// Create a connection error
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        ChatError::Connection(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ChatError::Serialization(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ChatError::Protocol(msg.into())
    }

    /// Create an invalid message error
    pub fn invalid_message<T: Into<String>>(msg: T) -> Self {
        ChatError::InvalidMessage(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        ChatError::NotFound(msg.into())
    }

    /// Create a store error
    pub fn store<T: Into<String>>(msg: T) -> Self {
        ChatError::Store(msg.into())
    }

    /// Create a validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        ChatError::Validation(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<T: Into<String>>(msg: T) -> Self {
        ChatError::Timeout(msg.into())
    }

    /// Create a resource limit error
    pub fn resource_limit<T: Into<String>>(msg: T) -> Self {
        ChatError::ResourceLimit(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Network(msg) => write!(f, "Network error: {}", msg),
            ChatError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ChatError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ChatError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ChatError::InvalidMessage(msg) => write!(f, "Invalid message: {}", msg),
            ChatError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ChatError::Store(msg) => write!(f, "Store error: {}", msg),
            ChatError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ChatError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ChatError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ChatError::ResourceLimit(msg) => write!(f, "Resource limit exceeded: {}", msg),
            ChatError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<quinn::ConnectError> for ChatError {
    fn from(err: quinn::ConnectError) -> Self {
        ChatError::Connection(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ConnectionError> for ChatError {
    fn from(err: quinn::ConnectionError) -> Self {
        ChatError::Connection(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ReadError> for ChatError {
    fn from(err: quinn::ReadError) -> Self {
        ChatError::Network(format!("QUIC read error: {}", err))
    }
}

impl From<quinn::WriteError> for ChatError {
    fn from(err: quinn::WriteError) -> Self {
        ChatError::Network(format!("QUIC write error: {}", err))
    }
}

impl From<quinn::ClosedStream> for ChatError {
    fn from(err: quinn::ClosedStream) -> Self {
        ChatError::Connection(format!("Stream closed: {}", err))
    }
}
