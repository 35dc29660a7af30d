//! QUIC front end: endpoint setup, accept loop, per-connection I/O
//!
//! Each accepted connection uses a single bidirectional stream. Inbound
//! frames are parsed off the stream and dispatched to the session
//! coordinator; outbound frames flow through the connection's unbounded
//! channel into a dedicated writer task, so fan-out to one connection never
//! waits on another.

use std::sync::Arc;

use quinn::Endpoint;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ChatError, Result};
use crate::generate_connection_id;
use crate::protocol::codec::DecodedMessage;
use crate::protocol::frame::{Frame, FrameCodec};
use crate::protocol::messages::ErrorNotice;
use crate::server::session::SessionCoordinator;
use crate::store::StoreGateway;
use crate::ServerConfig;

const READ_BUF_SIZE: usize = 8192;

/// QUIC chat server
pub struct ChatServer {
    config: ServerConfig,
    coordinator: Arc<SessionCoordinator>,
    endpoint: Option<Endpoint>,
}

impl ChatServer {
    pub fn new(store: Arc<dyn StoreGateway>, config: ServerConfig) -> Self {
        let coordinator = Arc::new(SessionCoordinator::new(store, config.clone()));
        Self {
            config,
            coordinator,
            endpoint: None,
        }
    }

    pub fn coordinator(&self) -> Arc<SessionCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Start listening and run the accept loop until the endpoint stops
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting chat server on {}", self.config.bind_addr);

        // Self-signed certificate for development
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()])
            .map_err(|e| ChatError::config(format!("Failed to generate certificate: {}", e)))?;

        let cert_der = CertificateDer::from(
            cert.serialize_der()
                .map_err(|e| ChatError::config(format!("Failed to serialize certificate: {}", e)))?,
        );
        let key_der =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));

        let mut tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .map_err(|e| ChatError::config(format!("Failed to configure TLS: {}", e)))?;
        tls_config.alpn_protocols = vec![b"chat".to_vec()];

        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_concurrent_bidi_streams(1u32.into());
        transport_config.max_concurrent_uni_streams(0u32.into());
        transport_config.max_idle_timeout(Some(
            std::time::Duration::from_secs(self.config.idle_timeout_secs)
                .try_into()
                .map_err(|_| ChatError::config("Idle timeout out of range"))?,
        ));

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
                .map_err(|e| ChatError::config(format!("Failed to create QUIC config: {}", e)))?,
        ));
        server_config.transport_config(Arc::new(transport_config));

        let endpoint = Endpoint::server(server_config, self.config.bind_addr)
            .map_err(|e| ChatError::network(format!("Failed to create endpoint: {}", e)))?;

        info!("Server listening on {}", endpoint.local_addr()?);
        self.endpoint = Some(endpoint.clone());

        // The user table describes live connections only; a fresh process
        // has none
        self.coordinator.clear_stale_users().await?;

        self.accept_connections(endpoint).await
    }

    async fn accept_connections(&self, endpoint: Endpoint) -> Result<()> {
        let registry = self.coordinator.registry();
        while let Some(incoming) = endpoint.accept().await {
            if registry.connection_count().await >= self.config.max_connections {
                warn!("Connection limit reached, refusing connection");
                incoming.refuse();
                continue;
            }

            let coordinator = Arc::clone(&self.coordinator);
            let max_message_size = self.config.max_message_size;
            tokio::spawn(async move {
                if let Err(e) = handle_incoming(coordinator, incoming, max_message_size).await {
                    debug!("Connection ended with error: {}", e);
                }
            });
        }
        warn!("Endpoint stopped accepting connections");
        Ok(())
    }

    /// Close the endpoint and drop all connections
    pub async fn shutdown(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"Server shutdown");
            info!("Server shutdown complete");
        }
    }
}

async fn handle_incoming(
    coordinator: Arc<SessionCoordinator>,
    incoming: quinn::Incoming,
    max_message_size: usize,
) -> Result<()> {
    let connection = incoming.await?;
    let remote_addr = connection.remote_address();
    let connection_id = generate_connection_id();

    debug!("New connection {} from {}", connection_id, remote_addr);

    // The client opens the stream; wait for it
    let (send, recv) = connection.accept_bi().await?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    coordinator.connect(&connection_id, outbound_tx).await?;

    let writer = tokio::spawn(write_frames(send, outbound_rx));

    let result = read_frames(&coordinator, &connection_id, recv, max_message_size).await;

    // Teardown runs exactly once per connection regardless of how the read
    // loop ended; the registry makes duplicates no-ops anyway
    coordinator.disconnect(&connection_id).await;
    writer.abort();
    connection.close(0u32.into(), b"bye");

    result
}

/// Drain the outbound channel onto the send stream
async fn write_frames(
    mut send: quinn::SendStream,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        if let Err(e) = send.write_all(&frame.encode_to_bytes()).await {
            debug!("Write failed, stopping writer: {}", e);
            break;
        }
    }
    let _ = send.finish();
}

/// Parse frames off the receive stream and dispatch them
async fn read_frames(
    coordinator: &SessionCoordinator,
    connection_id: &str,
    mut recv: quinn::RecvStream,
    max_message_size: usize,
) -> Result<()> {
    let mut codec = FrameCodec::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let n = match recv.read(&mut buf).await? {
            Some(n) => n,
            None => {
                debug!("Connection {} closed its stream", connection_id);
                return Ok(());
            }
        };
        codec.feed(&buf[..n]);

        loop {
            let frame = match codec.decode_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    // Framing is unrecoverable once out of sync; drop the
                    // connection
                    warn!("Malformed frame from {}: {}", connection_id, e);
                    coordinator
                        .error_to(connection_id, ErrorNotice::invalid_frame(e.to_string()))
                        .await;
                    return Err(ChatError::invalid_message(e.to_string()));
                }
            };

            if frame.payload.len() > max_message_size {
                coordinator
                    .error_to(
                        connection_id,
                        ErrorNotice::invalid_frame(format!(
                            "Payload exceeds {} bytes",
                            max_message_size
                        )),
                    )
                    .await;
                continue;
            }

            if !dispatch(coordinator, connection_id, &frame).await {
                return Ok(());
            }
        }
    }
}

/// Dispatch one inbound frame. Returns false when the connection should
/// close gracefully.
async fn dispatch(
    coordinator: &SessionCoordinator,
    connection_id: &str,
    frame: &Frame,
) -> bool {
    let message = match DecodedMessage::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                "Undecodable {:?} payload from {}: {}",
                frame.frame_type, connection_id, e
            );
            coordinator
                .error_to(connection_id, ErrorNotice::invalid_frame(e.to_string()))
                .await;
            return true;
        }
    };

    match message {
        DecodedMessage::Ping(ping) => {
            coordinator.ping(connection_id, ping).await;
        }
        DecodedMessage::Goodbye(_) => {
            debug!("Connection {} said goodbye", connection_id);
            return false;
        }
        DecodedMessage::GetRoomList(request) => {
            coordinator.room_list(connection_id, request).await;
        }
        DecodedMessage::UserJoinRequest(request) => {
            coordinator.join(connection_id, request).await;
        }
        DecodedMessage::SendChatMessage(payload) => {
            coordinator.chat(connection_id, payload).await;
        }
        // Server-to-client frames have no business arriving here
        _ => {
            warn!(
                "Unexpected {:?} frame from {}",
                frame.frame_type, connection_id
            );
            coordinator
                .error_to(
                    connection_id,
                    ErrorNotice::invalid_frame("Frame type not accepted by server"),
                )
                .await;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::Encodable;
    use crate::protocol::messages::Ping;
    use crate::store::MemoryStore;

    fn server() -> ChatServer {
        let store = Arc::new(MemoryStore::new()) as Arc<dyn StoreGateway>;
        ChatServer::new(store, ServerConfig::default())
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = server();
        assert!(server.endpoint.is_none());
        assert_eq!(server.coordinator().registry().connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_dispatch_goodbye_requests_close() {
        let server = server();
        let coordinator = server.coordinator();
        let (tx, _rx) = mpsc::unbounded_channel();
        coordinator.connect("conn-1", tx).await.unwrap();

        let frame = crate::protocol::messages::Goodbye {
            reason: "done".to_string(),
        }
        .encode_frame()
        .unwrap();
        assert!(!dispatch(&coordinator, "conn-1", &frame).await);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_server_frames() {
        let server = server();
        let coordinator = server.coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.connect("conn-1", tx).await.unwrap();

        // A client must not send server-originated frame types
        let frame = crate::protocol::messages::UserJoined {
            username: "mallory".to_string(),
            timestamp: 1,
        }
        .encode_frame()
        .unwrap();

        assert!(dispatch(&coordinator, "conn-1", &frame).await);
        let reply = rx.try_recv().unwrap();
        match DecodedMessage::decode(&reply).unwrap() {
            DecodedMessage::Error(e) => assert_eq!(e.code, ErrorNotice::INVALID_FRAME),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_undecodable_payload_reports_error() {
        let server = server();
        let coordinator = server.coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.connect("conn-1", tx).await.unwrap();

        let frame = Frame::new(
            crate::protocol::frame::FrameType::UserJoinRequest,
            &b"not json"[..],
        );
        assert!(dispatch(&coordinator, "conn-1", &frame).await);

        let reply = rx.try_recv().unwrap();
        match DecodedMessage::decode(&reply).unwrap() {
            DecodedMessage::Error(e) => assert_eq!(e.code, ErrorNotice::INVALID_FRAME),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_ping_answers_pong() {
        let server = server();
        let coordinator = server.coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.connect("conn-1", tx).await.unwrap();

        let frame = Ping { timestamp: 5 }.encode_frame().unwrap();
        assert!(dispatch(&coordinator, "conn-1", &frame).await);

        let reply = rx.try_recv().unwrap();
        match DecodedMessage::decode(&reply).unwrap() {
            DecodedMessage::Pong(p) => assert_eq!(p.timestamp, 5),
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}
