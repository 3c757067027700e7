//! Per-connection session: the `Connecting → Joined → Leaving →
//! Terminated` state machine between a transport and a room.
//!
//! The session owns no sockets. The transport layer feeds it decoded
//! envelopes and forwards whatever the room hands back; that keeps the
//! state machine testable without a network and reusable across
//! transports.

use crate::error::{SyncError, SyncResult};
use crate::gateway::RoomGateway;
use crate::protocol::{Envelope, Payload, ServerHello, SessionState};
use crate::room::{ClientUpdate, RoomHandle, SessionStreams};
use log::{debug, warn};
use std::sync::Arc;

/// Version string advertised in every ServerHello.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result of feeding one inbound envelope to the session.
#[derive(Debug)]
pub enum SessionReply {
    /// Handshake completed: send the ServerHello and start pumping the
    /// session streams.
    Hello(Box<(Envelope, SessionStreams)>),
    /// Nothing to send back.
    None,
}

pub struct Session {
    gateway: Arc<RoomGateway>,
    state: SessionState,
    room: Option<RoomHandle>,
    client_id: String,
    room_id: String,
    violations: u32,
}

impl Session {
    pub fn new(gateway: Arc<RoomGateway>) -> Self {
        Self {
            gateway,
            state: SessionState::Connecting,
            room: None,
            client_id: String::new(),
            room_id: String::new(),
            violations: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Count a protocol violation (malformed frame). Returns `true` once
    /// the connection has exhausted its tolerance and must be closed.
    pub fn record_violation(&mut self) -> bool {
        self.violations += 1;
        self.violations >= self.gateway.config().max_protocol_violations
    }

    /// Feed one inbound envelope.
    ///
    /// Store-level errors (`DuplicateEntity`, `UnknownEntity`) surface
    /// here and concern only this session; the room keeps running.
    pub async fn on_envelope(&mut self, envelope: Envelope) -> SyncResult<SessionReply> {
        match self.state {
            SessionState::Connecting => self.handshake(envelope).await,
            SessionState::Joined => self.forward(envelope).await.map(|()| SessionReply::None),
            SessionState::Leaving | SessionState::Terminated => {
                debug!(
                    "Session '{}': dropping frame received after leave",
                    self.client_id
                );
                Ok(SessionReply::None)
            }
        }
    }

    async fn handshake(&mut self, envelope: Envelope) -> SyncResult<SessionReply> {
        let kind = envelope.payload.kind();
        let Payload::ClientHello(hello) = envelope.payload else {
            // Only a hello may open the stream; anything else is noise
            // from an out-of-sync client.
            warn!("Dropping pre-handshake frame ({kind:?})");
            return Ok(SessionReply::None);
        };
        let requested_room = hello.requested_room.clone();

        let (room, streams) = self.gateway.connect(&hello).await?;

        self.state = SessionState::Joined;
        self.client_id = streams.assigned_client_id.clone();
        self.room_id = streams.room_id.clone();
        self.room = Some(room);

        debug!(
            "Session joined room '{}' as '{}' (requested '{}')",
            self.room_id, self.client_id, requested_room
        );

        let hello_reply = Envelope::new(Payload::ServerHello(ServerHello {
            server_version: SERVER_VERSION.to_string(),
            assigned_client_id: streams.assigned_client_id.clone(),
            room_id: streams.room_id.clone(),
            initial_state: streams.initial_state.clone(),
        }));
        Ok(SessionReply::Hello(Box::new((hello_reply, streams))))
    }

    async fn forward(&mut self, envelope: Envelope) -> SyncResult<()> {
        let room = self
            .room
            .as_ref()
            .ok_or_else(|| SyncError::RoomClosed(self.room_id.clone()))?;

        match envelope.payload {
            Payload::ClientHello(_) => Err(SyncError::AlreadyJoined(self.client_id.clone())),
            Payload::ServerHello(_) => {
                warn!(
                    "Session '{}': client sent a ServerHello; dropping",
                    self.client_id
                );
                Ok(())
            }
            // Hot path: stale drops are the only outcome besides success,
            // so these skip the reply round-trip.
            Payload::PositionUpdate(update) => {
                room.apply_nowait(&self.client_id, ClientUpdate::Position(update))
                    .await
            }
            Payload::VoiceData(voice) => {
                room.apply_nowait(&self.client_id, ClientUpdate::Voice(voice))
                    .await
            }
            Payload::EntitySpawn(spawn) => {
                room.apply(&self.client_id, ClientUpdate::Spawn(spawn)).await
            }
            Payload::EntityUpdate(update) => {
                room.apply(&self.client_id, ClientUpdate::Update(update))
                    .await
            }
            Payload::EntityDespawn(despawn) => {
                room.apply(&self.client_id, ClientUpdate::Despawn(despawn))
                    .await
            }
            Payload::ChatMessage(chat) => {
                room.apply(&self.client_id, ClientUpdate::Chat(chat)).await
            }
            Payload::PresenceEvent(event) => {
                room.apply(&self.client_id, ClientUpdate::Presence(event))
                    .await
            }
        }
    }

    /// Drive `Joined → Leaving → Terminated`. Safe to call any number of
    /// times and from any state; transport close and explicit leave both
    /// land here.
    pub async fn leave(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.state = SessionState::Leaving;
        if let Some(room) = self.room.take() {
            // The room may already be gone; that is a completed leave.
            let _ = room.leave(&self.client_id).await;
            self.gateway.remove_if_empty(room.room_id()).await;
        }
        self.state = SessionState::Terminated;
    }
}
