//! Join/reconnect protocol handling and disconnect teardown
//!
//! Each connection moves through Disconnected -> Joining -> Joined ->
//! Disconnected. There is no re-entry into Joining: a second join request
//! while already joined simply rebinds the connection (replaces its
//! username/room) with upsert semantics. Reconnection is not a distinct
//! protocol either; a client that lost its transport re-issues a normal
//! join with its remembered username/room and state is rebuilt from
//! scratch. No server-side session token or grace period exists.
//!
//! Every store call is caught at its own protocol step and translated into
//! a response or a log line; a failure after the registry has been mutated
//! rolls that mutation back so the registry never drifts from reality.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::protocol::codec::Encodable;
use crate::protocol::frame::Frame;
use crate::protocol::messages::{
    ChatPayload, ErrorNotice, GetRoomList, Ping, Pong, RequestId, RoomInfo, RoomList, RoomSummary,
    UserEntry, UserJoinRequest, UserJoinResponse,
};
use crate::store::{StoreGateway, StoredMessage};
use crate::{current_timestamp, ServerConfig};

use super::presence::PresenceBroadcaster;
use super::registry::{BoundUser, ConnectionRegistry};
use super::relay::MessageRelay;

/// Maximum accepted username length
const MAX_USERNAME_LEN: usize = 50;

/// Orchestrates the per-connection protocol: joins, chat relay, room list,
/// and disconnect teardown
pub struct SessionCoordinator {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn StoreGateway>,
    presence: PresenceBroadcaster,
    relay: MessageRelay,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn StoreGateway>, config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let presence = PresenceBroadcaster::new(Arc::clone(&registry));
        let relay = MessageRelay::new(Arc::clone(&registry), Arc::clone(&store));
        Self {
            config,
            registry,
            store,
            presence,
            relay,
        }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Drop user rows left behind by a previous process run
    pub async fn clear_stale_users(&self) -> Result<()> {
        self.store.clear_users().await
    }

    /// Register a freshly accepted connection and its outbound channel
    pub async fn connect(
        &self,
        connection_id: &str,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Result<()> {
        self.registry.attach(connection_id, outbound).await?;
        info!("Connection {} attached", connection_id);
        Ok(())
    }

    /// Answer a room-list request
    ///
    /// The reply is deliberately delayed by the configured pacing interval
    /// before it is sent. This is UX pacing, not a timeout; the request is
    /// never cancelled or retried because of it.
    pub async fn room_list(&self, connection_id: &str, request: GetRoomList) {
        debug!("Room list requested by {}", connection_id);

        let Some(outbound) = self.registry.sender_of(connection_id).await else {
            return;
        };

        let rooms = match self.store.list_rooms().await {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!("Room list lookup failed: {}", e);
                // Correlated so the requester fails fast instead of timing out
                self.error_to(
                    connection_id,
                    ErrorNotice::store_unavailable().for_request(request.request_id),
                )
                .await;
                return;
            }
        };

        let response = RoomList {
            request_id: request.request_id,
            rooms: rooms
                .into_iter()
                .map(|r| RoomSummary {
                    id: r.id,
                    name: r.name,
                })
                .collect(),
        };
        let frame = match response.encode_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode room list: {}", e);
                return;
            }
        };

        let delay = self.config.room_list_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = outbound.send(frame);
        });
    }

    /// Handle a join (or re-join) request
    pub async fn join(&self, connection_id: &str, request: UserJoinRequest) {
        debug!(
            "Connection {} wants to join room {} as '{}'",
            connection_id, request.room_id, request.username
        );

        if request.username.is_empty() || request.username.len() > MAX_USERNAME_LEN {
            self.error_to(
                connection_id,
                ErrorNotice::validation_failed("Username must be 1-50 characters"),
            )
            .await;
            self.reply_join_failure(connection_id, request.request_id)
                .await;
            return;
        }

        // Step 1: the room must exist; otherwise fail with no side effects
        let room = match self.store.find_room(&request.room_id).await {
            Ok(room) => room,
            Err(e) => {
                warn!("Room lookup failed for {}: {}", request.room_id, e);
                self.reply_join_failure(connection_id, request.request_id)
                    .await;
                return;
            }
        };
        let Some(room) = room else {
            debug!("Join rejected: room {} does not exist", request.room_id);
            self.reply_join_failure(connection_id, request.request_id)
                .await;
            return;
        };

        // History is read before binding; messages are append-only, so the
        // window is the same either way
        let history = match self
            .store
            .recent_messages(
                &room.id,
                self.config.history_max_age_secs,
                self.config.history_limit,
            )
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!("History lookup failed for room {}: {}", room.id, e);
                self.reply_join_failure(connection_id, request.request_id)
                    .await;
                return;
            }
        };

        // Step 2: bind into the room. This refuses if the connection has
        // already detached, i.e. a disconnect raced ahead of this join.
        let outcome = match self
            .registry
            .bind(connection_id, &room.id, &request.username)
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(
                    "Join aborted: connection {} detached mid-join",
                    connection_id
                );
                // Make sure no orphaned user row survives the race
                if let Err(e) = self.store.delete_user(connection_id).await {
                    warn!("Orphan cleanup failed for {}: {}", connection_id, e);
                }
                return;
            }
        };

        if let Some(previous) = &outcome.previous {
            debug!(
                "Connection {} rebound from room {} to {}",
                connection_id, previous.room_id, room.id
            );
        }

        // Step 3: upsert the durable user row; roll the binding back if the
        // store refuses
        if let Err(e) = self
            .store
            .upsert_user(connection_id, &room.id, &request.username)
            .await
        {
            warn!("User upsert failed for {}: {}", connection_id, e);
            self.registry.restore(connection_id, outcome.previous).await;
            self.reply_join_failure(connection_id, request.request_id)
                .await;
            return;
        }

        let roster_entries: Vec<UserEntry> =
            outcome.roster.iter().map(BoundUser::to_entry).collect();

        // Step 4: personalized response to the requester first
        let response = UserJoinResponse {
            request_id: request.request_id,
            success: true,
            room: Some(RoomInfo {
                id: room.id.clone(),
                name: room.name.clone(),
                messages: history.iter().map(StoredMessage::to_payload).collect(),
                users: roster_entries,
            }),
        };
        self.send_encoded(connection_id, &response).await;

        info!(
            "'{}' joined room '{}' ({} member(s))",
            request.username,
            room.name,
            outcome.roster.len()
        );

        // Step 5: room-wide notices, the joiner included. Observers may see
        // these reordered relative to the join response.
        let now = current_timestamp();
        self.presence
            .user_joined(&room.id, &request.username, now)
            .await;
        self.presence.roster(&room.id, &outcome.roster).await;
    }

    /// Relay a chat message from a connection
    pub async fn chat(&self, connection_id: &str, payload: ChatPayload) {
        if let Err(e) = self.relay.send(connection_id, payload).await {
            debug!("Rejected chat message from {}: {}", connection_id, e);
            self.error_to(connection_id, ErrorNotice::not_joined()).await;
        }
    }

    /// Tear down a connection
    ///
    /// Idempotent: duplicate disconnect signals for the same connection are
    /// no-ops, and the current binding is re-checked here rather than
    /// assumed from any in-flight join.
    pub async fn disconnect(&self, connection_id: &str) {
        let Some(departure) = self.registry.detach(connection_id).await else {
            return;
        };
        info!("Connection {} detached", connection_id);

        let Some(user) = departure.user else {
            return;
        };

        if let Err(e) = self.store.delete_user(&user.id).await {
            warn!("User delete failed for {}: {}", user.id, e);
        }

        let now = current_timestamp();
        self.presence
            .user_left(&user.room_id, &user.username, now)
            .await;
        self.presence.roster(&user.room_id, &departure.roster).await;
    }

    /// Answer a keepalive ping
    pub async fn ping(&self, connection_id: &str, ping: Ping) {
        let pong = Pong {
            timestamp: ping.timestamp,
        };
        self.send_encoded(connection_id, &pong).await;
    }

    /// Push an error notice to a connection
    pub async fn error_to(&self, connection_id: &str, notice: ErrorNotice) {
        self.send_encoded(connection_id, &notice).await;
    }

    async fn reply_join_failure(&self, connection_id: &str, request_id: RequestId) {
        let response = UserJoinResponse {
            request_id,
            success: false,
            room: None,
        };
        self.send_encoded(connection_id, &response).await;
    }

    async fn send_encoded<M: Encodable>(&self, connection_id: &str, message: &M) {
        let frame = match message.encode_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode frame for {}: {}", connection_id, e);
                return;
            }
        };
        if let Some(outbound) = self.registry.sender_of(connection_id).await {
            let _ = outbound.send(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::protocol::codec::DecodedMessage;
    use crate::store::{MemoryStore, NewMessage, Room, StoredUser};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const GENERAL: &str = "r-general";
    const MAJOR: &str = "r-major";

    /// Store wrapper whose failure modes can be switched on mid-test
    struct FailingStore {
        inner: MemoryStore,
        fail_upserts: AtomicBool,
        fail_room_list: AtomicBool,
    }

    impl FailingStore {
        fn wrapping(inner: MemoryStore) -> Arc<Self> {
            Arc::new(Self {
                inner,
                fail_upserts: AtomicBool::new(false),
                fail_room_list: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl StoreGateway for FailingStore {
        async fn find_room(&self, id: &str) -> Result<Option<Room>> {
            self.inner.find_room(id).await
        }

        async fn list_rooms(&self) -> Result<Vec<Room>> {
            if self.fail_room_list.load(Ordering::SeqCst) {
                return Err(ChatError::store("room table offline"));
            }
            self.inner.list_rooms().await
        }

        async fn upsert_user(
            &self,
            id: &str,
            room_id: &str,
            username: &str,
        ) -> Result<StoredUser> {
            if self.fail_upserts.load(Ordering::SeqCst) {
                return Err(ChatError::store("user table offline"));
            }
            self.inner.upsert_user(id, room_id, username).await
        }

        async fn delete_user(&self, id: &str) -> Result<()> {
            self.inner.delete_user(id).await
        }

        async fn clear_users(&self) -> Result<()> {
            self.inner.clear_users().await
        }

        async fn users_in_room(&self, room_id: &str) -> Result<Vec<StoredUser>> {
            self.inner.users_in_room(room_id).await
        }

        async fn create_message(&self, message: NewMessage) -> Result<StoredMessage> {
            self.inner.create_message(message).await
        }

        async fn recent_messages(
            &self,
            room_id: &str,
            max_age_secs: u64,
            limit: usize,
        ) -> Result<Vec<StoredMessage>> {
            self.inner.recent_messages(room_id, max_age_secs, limit).await
        }
    }

    fn failing_coordinator() -> (Arc<SessionCoordinator>, Arc<FailingStore>) {
        let store = FailingStore::wrapping(MemoryStore::with_rooms([
            Room::new(GENERAL, "General"),
            Room::new(MAJOR, "Major"),
        ]));
        let config = ServerConfig {
            room_list_delay: Duration::ZERO,
            ..ServerConfig::default()
        };
        let coordinator = Arc::new(SessionCoordinator::new(
            store.clone() as Arc<dyn StoreGateway>,
            config,
        ));
        (coordinator, store)
    }

    fn coordinator() -> (Arc<SessionCoordinator>, Arc<MemoryStore>) {
        coordinator_with_delay(Duration::ZERO)
    }

    fn coordinator_with_delay(delay: Duration) -> (Arc<SessionCoordinator>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::with_rooms([
            Room::new(GENERAL, "General"),
            Room::new(MAJOR, "Major"),
        ]));
        let config = ServerConfig {
            room_list_delay: delay,
            ..ServerConfig::default()
        };
        let coordinator = Arc::new(SessionCoordinator::new(
            store.clone() as Arc<dyn StoreGateway>,
            config,
        ));
        (coordinator, store)
    }

    async fn attach(
        coordinator: &SessionCoordinator,
        connection_id: &str,
    ) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        coordinator.connect(connection_id, tx).await.unwrap();
        rx
    }

    async fn join(
        coordinator: &SessionCoordinator,
        connection_id: &str,
        username: &str,
        room_id: &str,
    ) {
        coordinator
            .join(
                connection_id,
                UserJoinRequest {
                    request_id: 1,
                    username: username.to_string(),
                    room_id: room_id.to_string(),
                },
            )
            .await;
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<DecodedMessage> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(DecodedMessage::decode(&frame).unwrap());
        }
        out
    }

    fn chat(room_id: &str, username: &str, content: &str) -> ChatPayload {
        ChatPayload {
            content: content.to_string(),
            room_id: room_id.to_string(),
            timestamp: current_timestamp(),
            username: username.to_string(),
        }
    }

    #[tokio::test]
    async fn test_join_unknown_room_creates_nothing() {
        let (coordinator, store) = coordinator();
        let mut rx = attach(&coordinator, "conn-a").await;

        join(&coordinator, "conn-a", "alice", "no-such-room").await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodedMessage::UserJoinResponse(resp) => {
                assert!(!resp.success);
                assert!(resp.room.is_none());
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        // No partial state anywhere
        assert!(coordinator.registry().lookup("conn-a").await.is_none());
        assert!(store.users_in_room(GENERAL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_join_invalid_username_rejected() {
        let (coordinator, store) = coordinator();
        let mut rx = attach(&coordinator, "conn-a").await;

        join(&coordinator, "conn-a", "", GENERAL).await;

        let events = drain(&mut rx);
        assert!(matches!(events[0], DecodedMessage::Error(_)));
        assert!(matches!(
            &events[1],
            DecodedMessage::UserJoinResponse(resp) if !resp.success
        ));
        assert!(store.users_in_room(GENERAL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_first_join_response_then_broadcast() {
        let (coordinator, store) = coordinator();
        let mut rx = attach(&coordinator, "conn-a").await;

        join(&coordinator, "conn-a", "alice", GENERAL).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);

        // Personalized response arrives before the room-wide notices
        match &events[0] {
            DecodedMessage::UserJoinResponse(resp) => {
                assert!(resp.success);
                let room = resp.room.as_ref().unwrap();
                assert_eq!(room.name, "General");
                assert!(room.messages.is_empty());
                assert_eq!(room.users.len(), 1);
                assert_eq!(room.users[0].username, "alice");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(
            matches!(&events[1], DecodedMessage::UserJoined(n) if n.username == "alice")
        );
        assert!(
            matches!(&events[2], DecodedMessage::UsersInRoom(s) if s.users.len() == 1)
        );

        // Durable user row exists
        let users = store.users_in_room(GENERAL).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "conn-a");
    }

    #[tokio::test]
    async fn test_history_replay_on_join() {
        let (coordinator, store) = coordinator();
        let now = current_timestamp();
        for (i, content) in ["first", "second"].iter().enumerate() {
            store
                .create_message(NewMessage {
                    room_id: GENERAL.to_string(),
                    username: "earlier".to_string(),
                    content: content.to_string(),
                    timestamp: now - 10 + i as u64,
                })
                .await
                .unwrap();
        }

        let mut rx = attach(&coordinator, "conn-a").await;
        join(&coordinator, "conn-a", "alice", GENERAL).await;

        let events = drain(&mut rx);
        match &events[0] {
            DecodedMessage::UserJoinResponse(resp) => {
                let room = resp.room.as_ref().unwrap();
                let contents: Vec<&str> =
                    room.messages.iter().map(|m| m.content.as_str()).collect();
                assert_eq!(contents, vec!["first", "second"]);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    // The full walkthrough: alice joins, bob joins, bob talks, alice leaves
    #[tokio::test]
    async fn test_general_room_scenario() {
        let (coordinator, store) = coordinator();

        let mut alice = attach(&coordinator, "conn-a").await;
        join(&coordinator, "conn-a", "alice", GENERAL).await;
        drain(&mut alice);

        // Bob joins: both see the refreshed roster, alice sees the notice
        let mut bob = attach(&coordinator, "conn-b").await;
        join(&coordinator, "conn-b", "bob", GENERAL).await;

        let alice_events = drain(&mut alice);
        assert_eq!(alice_events.len(), 2);
        assert!(
            matches!(&alice_events[0], DecodedMessage::UserJoined(n) if n.username == "bob")
        );
        match &alice_events[1] {
            DecodedMessage::UsersInRoom(snapshot) => {
                let names: Vec<&str> =
                    snapshot.users.iter().map(|u| u.username.as_str()).collect();
                assert_eq!(names, vec!["alice", "bob"]);
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let bob_events = drain(&mut bob);
        match &bob_events[0] {
            DecodedMessage::UserJoinResponse(resp) => {
                let room = resp.room.as_ref().unwrap();
                let names: Vec<&str> = room.users.iter().map(|u| u.username.as_str()).collect();
                assert_eq!(names, vec!["alice", "bob"]);
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        // Bob talks: only alice receives it, and it is persisted
        coordinator.chat("conn-b", chat(GENERAL, "bob", "hi")).await;
        let alice_events = drain(&mut alice);
        assert_eq!(alice_events.len(), 1);
        assert!(
            matches!(&alice_events[0], DecodedMessage::ChatMessage(p) if p.content == "hi")
        );
        assert!(drain(&mut bob).is_empty());
        assert_eq!(store.message_count().await, 1);

        // Alice disconnects: bob sees the departure and the shrunken roster
        coordinator.disconnect("conn-a").await;
        let bob_events = drain(&mut bob);
        assert_eq!(bob_events.len(), 2);
        assert!(
            matches!(&bob_events[0], DecodedMessage::UserLeft(n) if n.username == "alice")
        );
        match &bob_events[1] {
            DecodedMessage::UsersInRoom(snapshot) => {
                assert_eq!(snapshot.users.len(), 1);
                assert_eq!(snapshot.users[0].username, "bob");
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let remaining = store.users_in_room(GENERAL).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "conn-b");
    }

    #[tokio::test]
    async fn test_chat_does_not_cross_rooms() {
        let (coordinator, _store) = coordinator();

        let mut alice = attach(&coordinator, "conn-a").await;
        let mut bob = attach(&coordinator, "conn-b").await;
        let mut carol = attach(&coordinator, "conn-c").await;
        join(&coordinator, "conn-a", "alice", GENERAL).await;
        join(&coordinator, "conn-b", "bob", GENERAL).await;
        join(&coordinator, "conn-c", "carol", MAJOR).await;
        drain(&mut alice);
        drain(&mut bob);
        drain(&mut carol);

        coordinator.chat("conn-b", chat(GENERAL, "bob", "hi")).await;

        assert_eq!(drain(&mut alice).len(), 1);
        assert!(drain(&mut bob).is_empty());
        assert!(drain(&mut carol).is_empty());
    }

    #[tokio::test]
    async fn test_chat_without_join_surfaces_error() {
        let (coordinator, store) = coordinator();
        let mut rx = attach(&coordinator, "conn-a").await;

        coordinator.chat("conn-a", chat(GENERAL, "alice", "hi")).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(
            matches!(&events[0], DecodedMessage::Error(e) if e.code == ErrorNotice::NOT_JOINED)
        );
        assert_eq!(store.message_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_unbound_is_noop() {
        let (coordinator, _store) = coordinator();

        let mut alice = attach(&coordinator, "conn-a").await;
        join(&coordinator, "conn-a", "alice", GENERAL).await;
        drain(&mut alice);

        // Never-attached and attached-but-unbound connections
        coordinator.disconnect("ghost").await;
        let _unbound = attach(&coordinator, "conn-b").await;
        coordinator.disconnect("conn-b").await;

        // Alice saw none of it
        assert!(drain(&mut alice).is_empty());

        // Double disconnect of a bound connection emits exactly one notice
        let mut bob = attach(&coordinator, "conn-c").await;
        join(&coordinator, "conn-c", "bob", GENERAL).await;
        drain(&mut bob);
        coordinator.disconnect("conn-a").await;
        coordinator.disconnect("conn-a").await;
        let bob_events = drain(&mut bob);
        assert_eq!(bob_events.len(), 2); // one UserLeft + one roster
    }

    #[tokio::test]
    async fn test_rejoin_switches_room_without_notifying_old_room() {
        let (coordinator, store) = coordinator();

        let mut alice = attach(&coordinator, "conn-a").await;
        let mut bob = attach(&coordinator, "conn-b").await;
        join(&coordinator, "conn-a", "alice", GENERAL).await;
        join(&coordinator, "conn-b", "bob", GENERAL).await;
        drain(&mut alice);
        drain(&mut bob);

        // Alice rebinds to another room over the same connection
        join(&coordinator, "conn-a", "alice", MAJOR).await;

        let alice_events = drain(&mut alice);
        match &alice_events[0] {
            DecodedMessage::UserJoinResponse(resp) => {
                assert!(resp.success);
                assert_eq!(resp.room.as_ref().unwrap().id, MAJOR);
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        // Upsert semantics: the old room gets no departure notice
        assert!(drain(&mut bob).is_empty());
        assert!(coordinator.registry().roster_of(GENERAL).await.len() == 1);

        let row = store.users_in_room(MAJOR).await.unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row[0].id, "conn-a");
    }

    #[tokio::test]
    async fn test_disconnect_racing_join_leaves_no_orphan() {
        let (coordinator, store) = coordinator();

        let _rx = attach(&coordinator, "conn-a").await;
        // Disconnect lands before the join is processed
        coordinator.disconnect("conn-a").await;
        join(&coordinator, "conn-a", "alice", GENERAL).await;

        assert!(coordinator.registry().lookup("conn-a").await.is_none());
        assert!(store.users_in_room(GENERAL).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_list_pacing_delay() {
        let (coordinator, _store) = coordinator_with_delay(Duration::from_millis(1500));
        let mut rx = attach(&coordinator, "conn-a").await;

        let started = tokio::time::Instant::now();
        coordinator
            .room_list("conn-a", GetRoomList { request_id: 9 })
            .await;

        let frame = rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1500));

        match DecodedMessage::decode(&frame).unwrap() {
            DecodedMessage::RoomList(list) => {
                assert_eq!(list.request_id, 9);
                let names: Vec<&str> = list.rooms.iter().map(|r| r.name.as_str()).collect();
                assert_eq!(names, vec!["General", "Major"]); // sorted by name
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_upsert_rolls_back_binding() {
        let (coordinator, store) = failing_coordinator();
        let mut alice = attach(&coordinator, "conn-a").await;
        join(&coordinator, "conn-a", "alice", GENERAL).await;
        drain(&mut alice);

        // The store starts refusing writes; alice tries to switch rooms
        store.fail_upserts.store(true, Ordering::SeqCst);
        join(&coordinator, "conn-a", "alice", MAJOR).await;

        let events = drain(&mut alice);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            DecodedMessage::UserJoinResponse(resp) if !resp.success && resp.room.is_none()
        ));

        // Registry restored to the prior binding; the target room stays empty
        let binding = coordinator.registry().lookup("conn-a").await.unwrap();
        assert_eq!(binding.room_id, GENERAL);
        assert!(coordinator.registry().roster_of(MAJOR).await.is_empty());

        // The durable row was never touched
        let rows = store.inner.users_in_room(GENERAL).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "conn-a");
        assert!(store.inner.users_in_room(MAJOR).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upsert_on_first_join_leaves_no_binding() {
        let (coordinator, store) = failing_coordinator();
        let mut rx = attach(&coordinator, "conn-a").await;
        store.fail_upserts.store(true, Ordering::SeqCst);

        join(&coordinator, "conn-a", "alice", GENERAL).await;

        let events = drain(&mut rx);
        assert!(matches!(
            &events[0],
            DecodedMessage::UserJoinResponse(resp) if !resp.success
        ));
        assert!(coordinator.registry().lookup("conn-a").await.is_none());
        assert!(coordinator.registry().roster_of(GENERAL).await.is_empty());
        assert!(store.inner.users_in_room(GENERAL).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_room_list_store_failure_fails_the_request() {
        let (coordinator, store) = failing_coordinator();
        let mut rx = attach(&coordinator, "conn-a").await;
        store.fail_room_list.store(true, Ordering::SeqCst);

        coordinator
            .room_list("conn-a", GetRoomList { request_id: 9 })
            .await;

        // The error answers the request directly, with no pacing delay
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            DecodedMessage::Error(e) => {
                assert_eq!(e.code, ErrorNotice::STORE_UNAVAILABLE);
                assert_eq!(e.request_id, Some(9));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (coordinator, _store) = coordinator();
        let mut rx = attach(&coordinator, "conn-a").await;

        coordinator.ping("conn-a", Ping { timestamp: 77 }).await;

        let events = drain(&mut rx);
        assert!(matches!(&events[0], DecodedMessage::Pong(p) if p.timestamp == 77));
    }
}
