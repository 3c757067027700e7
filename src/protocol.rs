//! Room sync wire protocol.
//!
//! This module owns **every message that crosses the transport boundary**
//! between the sync service and any client (browser, native, another
//! server…).
//!
//! ## Message kinds
//!
//! | Kind              | Direction          | Sequenced | Carried by           |
//! |-------------------|--------------------|-----------|----------------------|
//! | `ClientHello`     | client → server    | no        | sync stream handshake|
//! | `ServerHello`     | server → client    | no        | sync stream handshake|
//! | `PositionUpdate`  | both               | per entity| sync stream          |
//! | `VoiceData`       | both               | per sender| sync stream          |
//! | `EntitySpawn`     | both               | no        | sync stream          |
//! | `EntityUpdate`    | both               | no        | sync stream          |
//! | `EntityDespawn`   | both               | no        | sync stream          |
//! | `ChatMessage`     | both               | no        | sync stream          |
//! | `PresenceEvent`   | server → client    | no        | sync + presence feed |
//!
//! ## Design rules
//!
//! 1. Every struct is `Serialize + Deserialize` with snake_case JSON for
//!    diagnostics and config tooling; the transport path uses the binary
//!    codec in [`crate::wire`].
//! 2. The in-memory envelope holds exactly one payload — the [`Payload`]
//!    enum makes a multi-payload frame unrepresentable. The wire carries a
//!    separate `type` discriminator, and decoding validates it against the
//!    populated variant.
//! 3. Voice payloads are opaque: `audio_data` is relayed byte-for-byte and
//!    never inspected.
//! 4. Snapshots ([`WorldState`]) are point-in-time copies, never written
//!    back through.

use crate::types::{now_millis, Quaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Discriminators
// ---------------------------------------------------------------------------

/// Wire discriminator for the envelope payload.
///
/// Values are part of the wire contract and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ClientHello,
    ServerHello,
    PositionUpdate,
    VoiceData,
    EntitySpawn,
    EntityUpdate,
    EntityDespawn,
    ChatMessage,
    PresenceJoin,
    PresenceLeave,
    PresenceUpdate,
}

impl MessageType {
    pub const fn raw(self) -> u32 {
        match self {
            Self::ClientHello => 1,
            Self::ServerHello => 2,
            Self::PositionUpdate => 10,
            Self::VoiceData => 11,
            Self::EntitySpawn => 20,
            Self::EntityUpdate => 21,
            Self::EntityDespawn => 22,
            Self::ChatMessage => 30,
            Self::PresenceJoin => 40,
            Self::PresenceLeave => 41,
            Self::PresenceUpdate => 42,
        }
    }

    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::ClientHello),
            2 => Some(Self::ServerHello),
            10 => Some(Self::PositionUpdate),
            11 => Some(Self::VoiceData),
            20 => Some(Self::EntitySpawn),
            21 => Some(Self::EntityUpdate),
            22 => Some(Self::EntityDespawn),
            30 => Some(Self::ChatMessage),
            40 => Some(Self::PresenceJoin),
            41 => Some(Self::PresenceLeave),
            42 => Some(Self::PresenceUpdate),
            _ => None,
        }
    }
}

/// Audio codec tag carried alongside voice frames. The relay never
/// interprets it; clients use it to pick a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceCodec {
    Opus,
    Pcmu,
    Pcma,
}

impl VoiceCodec {
    pub const fn raw(self) -> u32 {
        match self {
            Self::Opus => 0,
            Self::Pcmu => 1,
            Self::Pcma => 2,
        }
    }

    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Opus),
            1 => Some(Self::Pcmu),
            2 => Some(Self::Pcma),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Normal,
    Whisper,
    Shout,
}

impl ChatKind {
    pub const fn raw(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::Whisper => 1,
            Self::Shout => 2,
        }
    }

    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Normal),
            1 => Some(Self::Whisper),
            2 => Some(Self::Shout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    Join,
    Leave,
    Update,
}

impl PresenceKind {
    pub const fn raw(self) -> u32 {
        match self {
            Self::Join => 0,
            Self::Leave => 1,
            Self::Update => 2,
        }
    }

    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Join),
            1 => Some(Self::Leave),
            2 => Some(Self::Update),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Payload messages
// ---------------------------------------------------------------------------

/// Opening message of a sync stream. The auth token is opaque to this
/// service; an external verifier turns it into a canonical identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientHello {
    /// Client-suggested id. Empty or colliding ids get a server-generated
    /// replacement.
    pub client_id: String,
    pub display_name: String,
    pub auth_token: String,
    pub requested_room: String,
}

/// Handshake reply. Carries the full room snapshot the client hydrates
/// from before applying incremental deltas.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerHello {
    pub server_version: String,
    pub assigned_client_id: String,
    pub room_id: String,
    pub initial_state: WorldState,
}

/// Authoritative transform for one entity.
///
/// Sent at high frequency (tens of Hz per entity); `sequence_number`
/// strictly increases per entity within a room, and stale values are
/// dropped rather than errored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionUpdate {
    pub entity_id: String,
    pub position: Vector3,
    pub rotation: Quaternion,
    pub sequence_number: u32,
}

/// An opaque audio frame. `sequence_number` strictly increases per
/// sending client within a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceData {
    pub from_client_id: String,
    pub audio_data: Vec<u8>,
    pub sequence_number: u32,
    pub codec: VoiceCodec,
}

/// An entity entered the room.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntitySpawn {
    pub entity_id: String,
    /// Game-defined archetype string (e.g. "prop/chair", "media/frame").
    pub template_id: String,
    pub owner_id: String,
    pub components: HashMap<String, Vec<u8>>,
}

/// Component state merge for a live entity (last-write-wins per key).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityUpdate {
    pub entity_id: String,
    pub components: HashMap<String, Vec<u8>>,
}

/// An entity left the room or was destroyed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityDespawn {
    pub entity_id: String,
}

/// Stateless chat line; always forwarded, never sequenced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub from_client_id: String,
    pub message: String,
    pub timestamp: i64,
    pub kind: ChatKind,
}

/// Player metadata carried by presence events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PresenceData {
    pub display_name: String,
    pub avatar_url: String,
    pub position: Option<Vector3>,
    pub rotation: Option<Quaternion>,
}

/// Join/leave/update lifecycle event for a player.
///
/// JOIN and LEAVE are derived from session lifecycle, never
/// client-supplied; only UPDATE content originates from clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceEvent {
    pub client_id: String,
    pub kind: PresenceKind,
    pub data: Option<PresenceData>,
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Full room snapshot sent on join or reconnect. `last_update` is
/// monotonically non-decreasing per room.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorldState {
    pub entities: Vec<EntitySnapshot>,
    pub players: Vec<PlayerSnapshot>,
    pub last_update: i64,
}

/// Point-in-time projection of a store entity. Snapshot transfer only —
/// never a write path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntitySnapshot {
    pub id: String,
    pub template_id: String,
    pub position: Vector3,
    pub rotation: Quaternion,
    pub components: HashMap<String, Vec<u8>>,
}

/// Point-in-time projection of a joined player.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerSnapshot {
    pub client_id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub position: Vector3,
    pub rotation: Quaternion,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The discriminated payload. Exactly one variant per envelope; frames
/// populating more than one are rejected at decode time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    PositionUpdate(PositionUpdate),
    VoiceData(VoiceData),
    EntitySpawn(EntitySpawn),
    EntityUpdate(EntityUpdate),
    EntityDespawn(EntityDespawn),
    ChatMessage(ChatMessage),
    PresenceEvent(PresenceEvent),
}

impl Payload {
    /// The wire discriminator matching this variant.
    pub fn kind(&self) -> MessageType {
        match self {
            Self::ClientHello(_) => MessageType::ClientHello,
            Self::ServerHello(_) => MessageType::ServerHello,
            Self::PositionUpdate(_) => MessageType::PositionUpdate,
            Self::VoiceData(_) => MessageType::VoiceData,
            Self::EntitySpawn(_) => MessageType::EntitySpawn,
            Self::EntityUpdate(_) => MessageType::EntityUpdate,
            Self::EntityDespawn(_) => MessageType::EntityDespawn,
            Self::ChatMessage(_) => MessageType::ChatMessage,
            Self::PresenceEvent(ev) => match ev.kind {
                PresenceKind::Join => MessageType::PresenceJoin,
                PresenceKind::Leave => MessageType::PresenceLeave,
                PresenceKind::Update => MessageType::PresenceUpdate,
            },
        }
    }
}

/// Every frame crossing the transport is wrapped in this envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Unique per frame; used for tracing, not dedup.
    pub message_id: String,
    /// Sender wall clock, unix milliseconds.
    pub timestamp: i64,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(payload: Payload) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            timestamp: now_millis(),
            payload,
        }
    }

    pub fn kind(&self) -> MessageType {
        self.payload.kind()
    }

    pub fn position_update(
        entity_id: impl Into<String>,
        position: Vector3,
        rotation: Quaternion,
        sequence_number: u32,
    ) -> Self {
        Self::new(Payload::PositionUpdate(PositionUpdate {
            entity_id: entity_id.into(),
            position,
            rotation,
            sequence_number,
        }))
    }

    pub fn voice_data(
        from_client_id: impl Into<String>,
        audio_data: Vec<u8>,
        sequence_number: u32,
        codec: VoiceCodec,
    ) -> Self {
        Self::new(Payload::VoiceData(VoiceData {
            from_client_id: from_client_id.into(),
            audio_data,
            sequence_number,
            codec,
        }))
    }

    pub fn entity_spawn(spawn: EntitySpawn) -> Self {
        Self::new(Payload::EntitySpawn(spawn))
    }

    pub fn entity_update(update: EntityUpdate) -> Self {
        Self::new(Payload::EntityUpdate(update))
    }

    pub fn entity_despawn(entity_id: impl Into<String>) -> Self {
        Self::new(Payload::EntityDespawn(EntityDespawn {
            entity_id: entity_id.into(),
        }))
    }

    pub fn chat(from_client_id: impl Into<String>, message: impl Into<String>, kind: ChatKind) -> Self {
        Self::new(Payload::ChatMessage(ChatMessage {
            from_client_id: from_client_id.into(),
            message: message.into(),
            timestamp: now_millis(),
            kind,
        }))
    }

    pub fn presence(
        client_id: impl Into<String>,
        kind: PresenceKind,
        data: Option<PresenceData>,
    ) -> Self {
        Self::new(Payload::PresenceEvent(PresenceEvent {
            client_id: client_id.into(),
            kind,
            data,
        }))
    }
}

// ---------------------------------------------------------------------------
// Gateway request / response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JoinRequest {
    pub room_id: String,
    pub auth_token: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JoinResponse {
    pub success: bool,
    pub room_id: String,
    pub assigned_client_id: String,
    pub initial_state: WorldState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LeaveRequest {
    pub room_id: String,
    pub client_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LeaveResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PresenceRequest {
    pub room_id: String,
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

/// Per-connection state machine. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Joined,
    Leaving,
    Terminated,
}
