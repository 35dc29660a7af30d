//! QUIC chat client
//!
//! Connects to the chat server over a single bidirectional stream, matches
//! responses to requests by request ID, and surfaces room events through an
//! event channel. The client remembers its username and room after a
//! successful join so a reconnect can simply join again; the server rebuilds
//! all state from that fresh join.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig as QuinnClientConfig, Connection, Endpoint};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::current_timestamp;
use crate::error::{ChatError, Result};
use crate::protocol::codec::{DecodedMessage, Encodable};
use crate::protocol::frame::{Frame, FrameCodec};
use crate::protocol::messages::{
    ChatPayload, ErrorNotice, GetRoomList, Goodbye, Ping, RequestId, RoomInfo, RoomSummary,
    UserJoinRequest, UserJoined, UserLeft, UsersInRoom,
};

/// Chat client configuration
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Client bind address (use 0.0.0.0:0 for auto)
    pub bind_addr: SocketAddr,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Per-request response timeout in seconds
    ///
    /// Must comfortably exceed the server's room-list pacing delay.
    pub request_timeout_secs: u64,
    /// Keep-alive ping interval in seconds
    pub keep_alive_secs: u64,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:4433".parse().unwrap(),
            bind_addr: "0.0.0.0:0".parse().unwrap(),
            connect_timeout_secs: 10,
            request_timeout_secs: 10,
            keep_alive_secs: 30,
        }
    }
}

/// Room events pushed by the server outside the request/response flow
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A chat message from another room member
    ChatMessage(ChatPayload),
    /// Someone joined the room
    UserJoined(UserJoined),
    /// Someone left the room
    UserLeft(UserLeft),
    /// Refreshed roster snapshot
    UsersInRoom(UsersInRoom),
    /// Server-reported error
    Error(ErrorNotice),
    /// The connection was lost
    Disconnected(String),
}

/// Identity remembered from the last successful join
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub room_id: String,
}

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<DecodedMessage>>>>;

/// QUIC chat client
pub struct ChatClient {
    config: ChatClientConfig,
    connection: Option<Connection>,
    endpoint: Option<Endpoint>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    pending: PendingMap,
    next_request_id: AtomicU64,
    identity: Option<Identity>,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Self {
        Self {
            config,
            connection: None,
            endpoint: None,
            outbound: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: AtomicU64::new(1),
            identity: None,
        }
    }

    /// Connect to the server and start the I/O tasks
    ///
    /// Returns the receiver for room events. The remembered identity (if
    /// any) is kept, so `rejoin` works after a reconnect.
    pub async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        info!("Connecting to chat server at {}", self.config.server_addr);

        let client_config = self.configure_client()?;

        let mut endpoint = Endpoint::client(self.config.bind_addr)
            .map_err(|e| ChatError::network(format!("Failed to create endpoint: {}", e)))?;
        endpoint.set_default_client_config(client_config);
        self.endpoint = Some(endpoint.clone());

        let connecting = endpoint
            .connect(self.config.server_addr, "localhost")
            .map_err(|e| ChatError::connection(format!("Failed to initiate connection: {}", e)))?;

        let connection = tokio::time::timeout(
            Duration::from_secs(self.config.connect_timeout_secs),
            connecting,
        )
        .await
        .map_err(|_| ChatError::timeout("Connection timeout"))?
        .map_err(|e| ChatError::connection(format!("Failed to connect: {}", e)))?;

        info!("Connected to server");

        // One stream carries the whole session
        let (send, recv) = connection.open_bi().await?;
        self.connection = Some(connection);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound_tx.clone());

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_frames(send, outbound_rx));
        tokio::spawn(read_frames(recv, Arc::clone(&self.pending), event_tx));
        tokio::spawn(keep_alive(outbound_tx, self.config.keep_alive_secs));

        Ok(event_rx)
    }

    fn configure_client(&self) -> Result<QuinnClientConfig> {
        // Accepts the server's self-signed certificate. Development only.
        let mut crypto = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();
        crypto.alpn_protocols = vec![b"chat".to_vec()];

        Ok(QuinnClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| ChatError::config(format!("Failed to create QUIC config: {}", e)))?,
        )))
    }

    /// Fetch the list of rooms
    ///
    /// The server paces this reply deliberately; expect it to take on the
    /// order of seconds.
    pub async fn get_room_list(&self) -> Result<Vec<RoomSummary>> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = GetRoomList { request_id }
            .encode_frame()
            .map_err(|e| ChatError::serialization(e.to_string()))?;

        match self.request(request_id, frame).await? {
            DecodedMessage::RoomList(list) => Ok(list.rooms),
            other => Err(ChatError::protocol(format!(
                "Unexpected reply to room list request: {:?}",
                other
            ))),
        }
    }

    /// Join a room, remembering the identity for later rejoins
    pub async fn join(&mut self, username: &str, room_id: &str) -> Result<RoomInfo> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = UserJoinRequest {
            request_id,
            username: username.to_string(),
            room_id: room_id.to_string(),
        }
        .encode_frame()
        .map_err(|e| ChatError::serialization(e.to_string()))?;

        let reply = self.request(request_id, frame).await?;
        let response = match reply {
            DecodedMessage::UserJoinResponse(response) => response,
            other => {
                return Err(ChatError::protocol(format!(
                    "Unexpected reply to join request: {:?}",
                    other
                )))
            }
        };

        let room = match (response.success, response.room) {
            (true, Some(room)) => room,
            _ => {
                return Err(ChatError::not_found(format!(
                    "Could not join room {}",
                    room_id
                )))
            }
        };

        self.identity = Some(Identity {
            username: username.to_string(),
            room_id: room.id.clone(),
        });
        info!("Joined room '{}' as '{}'", room.name, username);
        Ok(room)
    }

    /// Re-join with the identity remembered from the last successful join
    pub async fn rejoin(&mut self) -> Result<RoomInfo> {
        let identity = self
            .identity
            .clone()
            .ok_or_else(|| ChatError::internal("No identity to rejoin with"))?;
        self.join(&identity.username, &identity.room_id).await
    }

    /// Send a chat message to the joined room
    pub async fn send_chat(&self, content: &str) -> Result<()> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| ChatError::protocol("Not joined to any room"))?;

        let payload = ChatPayload {
            content: content.to_string(),
            room_id: identity.room_id.clone(),
            timestamp: current_timestamp(),
            username: identity.username.clone(),
        };
        let frame = payload
            .encode_send_frame()
            .map_err(|e| ChatError::serialization(e.to_string()))?;

        self.send_frame(frame)?;
        debug!("Sent chat message to room {}", identity.room_id);
        Ok(())
    }

    /// Tell the server we are leaving, then drop the connection
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Ok(frame) = (Goodbye {
            reason: "client disconnect".to_string(),
        })
        .encode_frame()
        {
            let _ = self.send_frame(frame);
        }
        self.outbound = None;

        if let Some(connection) = self.connection.take() {
            connection.close(0u32.into(), b"Client disconnect");
            info!("Disconnected from chat server");
        }
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"Client shutdown");
        }

        // Identity survives so a reconnect can rejoin
        Ok(())
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn send_frame(&self, frame: Frame) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| ChatError::connection("Not connected to server"))?;
        outbound
            .send(frame)
            .map_err(|_| ChatError::connection("Connection closed"))
    }

    async fn request(&self, request_id: RequestId, frame: Frame) -> Result<DecodedMessage> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        if let Err(e) = self.send_frame(frame) {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(Duration::from_secs(self.config.request_timeout_secs), rx).await
        {
            Ok(Ok(DecodedMessage::Error(notice))) => Err(error_from_notice(notice)),
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(ChatError::connection(
                "Connection closed while awaiting response",
            )),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(ChatError::timeout("Request timed out"))
            }
        }
    }
}

/// Map a server error notice onto the client error taxonomy
fn error_from_notice(notice: ErrorNotice) -> ChatError {
    match notice.code {
        ErrorNotice::STORE_UNAVAILABLE => ChatError::store(notice.message),
        ErrorNotice::VALIDATION_FAILED => ChatError::validation(notice.message),
        ErrorNotice::NOT_FOUND => ChatError::not_found(notice.message),
        _ => ChatError::protocol(notice.message),
    }
}

/// Drain the outbound channel onto the send stream
async fn write_frames(mut send: quinn::SendStream, mut outbound_rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = outbound_rx.recv().await {
        if let Err(e) = send.write_all(&frame.encode_to_bytes()).await {
            debug!("Write failed, stopping writer: {}", e);
            break;
        }
    }
    let _ = send.finish();
}

/// Read frames, resolve pending requests, forward everything else as events
async fn read_frames(
    mut recv: quinn::RecvStream,
    pending: PendingMap,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
) {
    let mut codec = FrameCodec::new();
    let mut buf = vec![0u8; 8192];

    let reason = loop {
        let n = match recv.read(&mut buf).await {
            Ok(Some(n)) => n,
            Ok(None) => break "Server closed the stream".to_string(),
            Err(e) => break format!("Connection lost: {}", e),
        };
        codec.feed(&buf[..n]);

        loop {
            let frame = match codec.decode_next() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    error!("Malformed frame from server: {}", e);
                    return;
                }
            };
            let message = match DecodedMessage::decode(&frame) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Undecodable {:?} frame: {}", frame.frame_type, e);
                    continue;
                }
            };
            dispatch(message, &pending, &event_tx).await;
        }
    };

    // Fail any requests still in flight
    pending.lock().await.clear();
    let _ = event_tx.send(ClientEvent::Disconnected(reason));
}

async fn dispatch(
    message: DecodedMessage,
    pending: &PendingMap,
    event_tx: &mpsc::UnboundedSender<ClientEvent>,
) {
    match message {
        DecodedMessage::RoomList(ref list) => {
            resolve(pending, list.request_id, message.clone()).await;
        }
        DecodedMessage::UserJoinResponse(ref response) => {
            resolve(pending, response.request_id, message.clone()).await;
        }
        DecodedMessage::ChatMessage(payload) => {
            let _ = event_tx.send(ClientEvent::ChatMessage(payload));
        }
        DecodedMessage::UserJoined(notice) => {
            let _ = event_tx.send(ClientEvent::UserJoined(notice));
        }
        DecodedMessage::UserLeft(notice) => {
            let _ = event_tx.send(ClientEvent::UserLeft(notice));
        }
        DecodedMessage::UsersInRoom(snapshot) => {
            let _ = event_tx.send(ClientEvent::UsersInRoom(snapshot));
        }
        DecodedMessage::Error(ref notice) => {
            // Correlated errors fail the waiting request; the rest are
            // connection-level events
            let resolved = match notice.request_id {
                Some(request_id) => resolve(pending, request_id, message.clone()).await,
                None => false,
            };
            if !resolved {
                let _ = event_tx.send(ClientEvent::Error(notice.clone()));
            }
        }
        DecodedMessage::Pong(pong) => {
            debug!("Pong (timestamp {})", pong.timestamp);
        }
        other => {
            warn!("Ignoring unexpected message: {:?}", other);
        }
    }
}

async fn resolve(pending: &PendingMap, request_id: RequestId, message: DecodedMessage) -> bool {
    match pending.lock().await.remove(&request_id) {
        Some(tx) => {
            let _ = tx.send(message);
            true
        }
        None => {
            warn!("Response for unknown request {}", request_id);
            false
        }
    }
}

/// Send a keep-alive ping at a fixed interval until the channel closes
async fn keep_alive(outbound: mpsc::UnboundedSender<Frame>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.tick().await; // first tick is immediate
    loop {
        interval.tick().await;
        let ping = Ping {
            timestamp: current_timestamp(),
        };
        let frame = match ping.encode_frame() {
            Ok(frame) => frame,
            Err(_) => return,
        };
        if outbound.send(frame).is_err() {
            return;
        }
    }
}

/// Certificate verifier that accepts any certificate (INSECURE - for
/// development only)
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA1,
            rustls::SignatureScheme::ECDSA_SHA1_Legacy,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ED448,
        ]
    }
}
