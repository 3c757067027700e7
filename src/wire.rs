//! Binary envelope codec.
//!
//! Field-tagged wire grammar compatible with the protobuf encoding rules:
//! `tag = (field_number << 3) | wire_type`, with wire types varint (0),
//! fixed64 (1), length-delimited (2) and fixed32 (5). Counters and enums
//! are varints, vector/quaternion components are fixed 32-bit floats, and
//! strings/bytes/nested messages are length-delimited.
//!
//! Decoding rules:
//!
//! * Unknown **fields** are skipped by wire type — old servers tolerate new
//!   clients and vice versa.
//! * Unknown **enum values** and malformed frames are rejected.
//! * An envelope must populate exactly one payload field; a second payload
//!   field fails with [`DecodeError::MultiplePayloads`], and a `type`
//!   discriminator that disagrees with the populated field fails with
//!   [`DecodeError::TypeMismatch`].

use crate::protocol::{
    ChatKind, ChatMessage, ClientHello, EntityDespawn, EntitySnapshot, EntitySpawn, EntityUpdate,
    Envelope, MessageType, Payload, PlayerSnapshot, PositionUpdate, PresenceData, PresenceEvent,
    PresenceKind, ServerHello, VoiceCodec, VoiceData, WorldState,
};
use crate::types::{Quaternion, Vector3};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame truncated")]
    Truncated,

    #[error("varint exceeds 64 bits")]
    VarintOverflow,

    #[error("unsupported wire type {0}")]
    InvalidWireType(u32),

    #[error("string field is not valid utf-8")]
    InvalidUtf8,

    #[error("unknown message type {0}")]
    UnknownMessageType(u32),

    #[error("unknown {field} value {value}")]
    UnknownEnumValue { field: &'static str, value: u32 },

    #[error("envelope populates more than one payload variant")]
    MultiplePayloads,

    #[error("envelope carries no payload")]
    MissingPayload,

    #[error("envelope carries no type discriminator")]
    MissingType,

    #[error("declared type {declared:?} does not match payload {found:?}")]
    TypeMismatch {
        declared: MessageType,
        found: MessageType,
    },
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

const WT_VARINT: u32 = 0;
const WT_FIXED64: u32 = 1;
const WT_LEN: u32 = 2;
const WT_FIXED32: u32 = 5;

// ---------------------------------------------------------------------------
// Writer primitives
// ---------------------------------------------------------------------------

fn put_varint(buf: &mut BytesMut, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

fn put_tag(buf: &mut BytesMut, field: u32, wire_type: u32) {
    put_varint(buf, u64::from((field << 3) | wire_type));
}

/// Varint-encoded unsigned scalar; zero values are omitted.
fn put_uint(buf: &mut BytesMut, field: u32, v: u64) {
    if v != 0 {
        put_tag(buf, field, WT_VARINT);
        put_varint(buf, v);
    }
}

/// Varint-encoded signed scalar (two's-complement, as protobuf int64).
fn put_int(buf: &mut BytesMut, field: u32, v: i64) {
    if v != 0 {
        put_tag(buf, field, WT_VARINT);
        put_varint(buf, v as u64);
    }
}

fn put_f32(buf: &mut BytesMut, field: u32, v: f32) {
    if v != 0.0 {
        put_tag(buf, field, WT_FIXED32);
        buf.put_f32_le(v);
    }
}

fn put_str(buf: &mut BytesMut, field: u32, v: &str) {
    if !v.is_empty() {
        put_tag(buf, field, WT_LEN);
        put_varint(buf, v.len() as u64);
        buf.put_slice(v.as_bytes());
    }
}

fn put_bytes(buf: &mut BytesMut, field: u32, v: &[u8]) {
    if !v.is_empty() {
        put_tag(buf, field, WT_LEN);
        put_varint(buf, v.len() as u64);
        buf.put_slice(v);
    }
}

/// Length-delimited nested message, always emitted (presence of the field
/// distinguishes `Some(default)` from `None` for optional messages).
fn put_message(buf: &mut BytesMut, field: u32, body: &BytesMut) {
    put_tag(buf, field, WT_LEN);
    put_varint(buf, body.len() as u64);
    buf.put_slice(body);
}

fn put_map(buf: &mut BytesMut, field: u32, map: &HashMap<String, Vec<u8>>) {
    // Deterministic entry order keeps encodings comparable in tests/logs.
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        let mut entry = BytesMut::new();
        put_str(&mut entry, 1, key);
        put_bytes(&mut entry, 2, &map[key]);
        put_message(buf, field, &entry);
    }
}

// ---------------------------------------------------------------------------
// Reader primitives
// ---------------------------------------------------------------------------

fn read_varint(buf: &mut &[u8]) -> Result<u64, DecodeError> {
    let mut value: u64 = 0;
    for shift in 0..10 {
        if !buf.has_remaining() {
            return Err(DecodeError::Truncated);
        }
        let byte = buf.get_u8();
        if shift == 9 && byte > 0x01 {
            return Err(DecodeError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << (shift * 7);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(DecodeError::VarintOverflow)
}

fn read_tag(buf: &mut &[u8]) -> Result<(u32, u32), DecodeError> {
    let raw = read_varint(buf)?;
    let field = (raw >> 3) as u32;
    let wire_type = (raw & 0x7) as u32;
    Ok((field, wire_type))
}

fn read_f32(buf: &mut &[u8]) -> Result<f32, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_f32_le())
}

fn read_len_prefixed<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], DecodeError> {
    let len = read_varint(buf)? as usize;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated);
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn read_str(buf: &mut &[u8]) -> Result<String, DecodeError> {
    let raw = read_len_prefixed(buf)?;
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|_| DecodeError::InvalidUtf8)
}

fn read_u32(buf: &mut &[u8]) -> Result<u32, DecodeError> {
    Ok(read_varint(buf)? as u32)
}

/// Skip a field of any known wire type. Unknown wire types are a hard
/// error — there is no way to find the next field boundary past one.
fn skip_field(buf: &mut &[u8], wire_type: u32) -> Result<(), DecodeError> {
    match wire_type {
        WT_VARINT => {
            read_varint(buf)?;
        }
        WT_FIXED64 => {
            if buf.remaining() < 8 {
                return Err(DecodeError::Truncated);
            }
            buf.advance(8);
        }
        WT_LEN => {
            read_len_prefixed(buf)?;
        }
        WT_FIXED32 => {
            if buf.remaining() < 4 {
                return Err(DecodeError::Truncated);
            }
            buf.advance(4);
        }
        other => return Err(DecodeError::InvalidWireType(other)),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Value-type codecs
// ---------------------------------------------------------------------------

fn encode_vector3(v: &Vector3) -> BytesMut {
    let mut buf = BytesMut::new();
    put_f32(&mut buf, 1, v.x);
    put_f32(&mut buf, 2, v.y);
    put_f32(&mut buf, 3, v.z);
    buf
}

fn decode_vector3(mut buf: &[u8]) -> Result<Vector3, DecodeError> {
    let mut v = Vector3::zero();
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_FIXED32) => v.x = read_f32(&mut buf)?,
            (2, WT_FIXED32) => v.y = read_f32(&mut buf)?,
            (3, WT_FIXED32) => v.z = read_f32(&mut buf)?,
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(v)
}

fn encode_quaternion(q: &Quaternion) -> BytesMut {
    let mut buf = BytesMut::new();
    put_f32(&mut buf, 1, q.x);
    put_f32(&mut buf, 2, q.y);
    put_f32(&mut buf, 3, q.z);
    put_f32(&mut buf, 4, q.w);
    buf
}

fn decode_quaternion(mut buf: &[u8]) -> Result<Quaternion, DecodeError> {
    let mut q = Quaternion::new(0.0, 0.0, 0.0, 0.0);
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_FIXED32) => q.x = read_f32(&mut buf)?,
            (2, WT_FIXED32) => q.y = read_f32(&mut buf)?,
            (3, WT_FIXED32) => q.z = read_f32(&mut buf)?,
            (4, WT_FIXED32) => q.w = read_f32(&mut buf)?,
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(q)
}

fn decode_map_entry(
    mut buf: &[u8],
    map: &mut HashMap<String, Vec<u8>>,
) -> Result<(), DecodeError> {
    let mut key = String::new();
    let mut value = Vec::new();
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => key = read_str(&mut buf)?,
            (2, WT_LEN) => value = read_len_prefixed(&mut buf)?.to_vec(),
            _ => skip_field(&mut buf, wt)?,
        }
    }
    // Last write wins on duplicate keys.
    map.insert(key, value);
    Ok(())
}

// ---------------------------------------------------------------------------
// Payload codecs
// ---------------------------------------------------------------------------

fn encode_client_hello(m: &ClientHello) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.client_id);
    put_str(&mut buf, 2, &m.display_name);
    put_str(&mut buf, 3, &m.auth_token);
    put_str(&mut buf, 4, &m.requested_room);
    buf
}

fn decode_client_hello(mut buf: &[u8]) -> Result<ClientHello, DecodeError> {
    let mut m = ClientHello::default();
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.client_id = read_str(&mut buf)?,
            (2, WT_LEN) => m.display_name = read_str(&mut buf)?,
            (3, WT_LEN) => m.auth_token = read_str(&mut buf)?,
            (4, WT_LEN) => m.requested_room = read_str(&mut buf)?,
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

fn encode_server_hello(m: &ServerHello) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.server_version);
    put_str(&mut buf, 2, &m.assigned_client_id);
    put_str(&mut buf, 3, &m.room_id);
    put_message(&mut buf, 4, &encode_world_state(&m.initial_state));
    buf
}

fn decode_server_hello(mut buf: &[u8]) -> Result<ServerHello, DecodeError> {
    let mut m = ServerHello::default();
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.server_version = read_str(&mut buf)?,
            (2, WT_LEN) => m.assigned_client_id = read_str(&mut buf)?,
            (3, WT_LEN) => m.room_id = read_str(&mut buf)?,
            (4, WT_LEN) => m.initial_state = decode_world_state(read_len_prefixed(&mut buf)?)?,
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

fn encode_position_update(m: &PositionUpdate) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.entity_id);
    put_message(&mut buf, 2, &encode_vector3(&m.position));
    put_message(&mut buf, 3, &encode_quaternion(&m.rotation));
    put_uint(&mut buf, 4, u64::from(m.sequence_number));
    buf
}

fn decode_position_update(mut buf: &[u8]) -> Result<PositionUpdate, DecodeError> {
    let mut m = PositionUpdate {
        entity_id: String::new(),
        position: Vector3::zero(),
        rotation: Quaternion::new(0.0, 0.0, 0.0, 0.0),
        sequence_number: 0,
    };
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.entity_id = read_str(&mut buf)?,
            (2, WT_LEN) => m.position = decode_vector3(read_len_prefixed(&mut buf)?)?,
            (3, WT_LEN) => m.rotation = decode_quaternion(read_len_prefixed(&mut buf)?)?,
            (4, WT_VARINT) => m.sequence_number = read_u32(&mut buf)?,
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

fn encode_voice_data(m: &VoiceData) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.from_client_id);
    put_bytes(&mut buf, 2, &m.audio_data);
    put_uint(&mut buf, 3, u64::from(m.sequence_number));
    put_uint(&mut buf, 4, u64::from(m.codec.raw()));
    buf
}

fn decode_voice_data(mut buf: &[u8]) -> Result<VoiceData, DecodeError> {
    let mut m = VoiceData {
        from_client_id: String::new(),
        audio_data: Vec::new(),
        sequence_number: 0,
        codec: VoiceCodec::Opus,
    };
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.from_client_id = read_str(&mut buf)?,
            (2, WT_LEN) => m.audio_data = read_len_prefixed(&mut buf)?.to_vec(),
            (3, WT_VARINT) => m.sequence_number = read_u32(&mut buf)?,
            (4, WT_VARINT) => {
                let raw = read_u32(&mut buf)?;
                m.codec = VoiceCodec::from_raw(raw).ok_or(DecodeError::UnknownEnumValue {
                    field: "voice codec",
                    value: raw,
                })?;
            }
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

fn encode_entity_spawn(m: &EntitySpawn) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.entity_id);
    put_str(&mut buf, 2, &m.template_id);
    put_str(&mut buf, 3, &m.owner_id);
    put_map(&mut buf, 4, &m.components);
    buf
}

fn decode_entity_spawn(mut buf: &[u8]) -> Result<EntitySpawn, DecodeError> {
    let mut m = EntitySpawn::default();
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.entity_id = read_str(&mut buf)?,
            (2, WT_LEN) => m.template_id = read_str(&mut buf)?,
            (3, WT_LEN) => m.owner_id = read_str(&mut buf)?,
            (4, WT_LEN) => decode_map_entry(read_len_prefixed(&mut buf)?, &mut m.components)?,
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

fn encode_entity_update(m: &EntityUpdate) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.entity_id);
    put_map(&mut buf, 2, &m.components);
    buf
}

fn decode_entity_update(mut buf: &[u8]) -> Result<EntityUpdate, DecodeError> {
    let mut m = EntityUpdate::default();
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.entity_id = read_str(&mut buf)?,
            (2, WT_LEN) => decode_map_entry(read_len_prefixed(&mut buf)?, &mut m.components)?,
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

fn encode_entity_despawn(m: &EntityDespawn) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.entity_id);
    buf
}

fn decode_entity_despawn(mut buf: &[u8]) -> Result<EntityDespawn, DecodeError> {
    let mut m = EntityDespawn::default();
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.entity_id = read_str(&mut buf)?,
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

fn encode_chat_message(m: &ChatMessage) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.from_client_id);
    put_str(&mut buf, 2, &m.message);
    put_int(&mut buf, 3, m.timestamp);
    put_uint(&mut buf, 4, u64::from(m.kind.raw()));
    buf
}

fn decode_chat_message(mut buf: &[u8]) -> Result<ChatMessage, DecodeError> {
    let mut m = ChatMessage {
        from_client_id: String::new(),
        message: String::new(),
        timestamp: 0,
        kind: ChatKind::Normal,
    };
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.from_client_id = read_str(&mut buf)?,
            (2, WT_LEN) => m.message = read_str(&mut buf)?,
            (3, WT_VARINT) => m.timestamp = read_varint(&mut buf)? as i64,
            (4, WT_VARINT) => {
                let raw = read_u32(&mut buf)?;
                m.kind = ChatKind::from_raw(raw).ok_or(DecodeError::UnknownEnumValue {
                    field: "chat kind",
                    value: raw,
                })?;
            }
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

fn encode_presence_data(m: &PresenceData) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.display_name);
    put_str(&mut buf, 2, &m.avatar_url);
    if let Some(position) = &m.position {
        put_message(&mut buf, 3, &encode_vector3(position));
    }
    if let Some(rotation) = &m.rotation {
        put_message(&mut buf, 4, &encode_quaternion(rotation));
    }
    buf
}

fn decode_presence_data(mut buf: &[u8]) -> Result<PresenceData, DecodeError> {
    let mut m = PresenceData::default();
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.display_name = read_str(&mut buf)?,
            (2, WT_LEN) => m.avatar_url = read_str(&mut buf)?,
            (3, WT_LEN) => m.position = Some(decode_vector3(read_len_prefixed(&mut buf)?)?),
            (4, WT_LEN) => m.rotation = Some(decode_quaternion(read_len_prefixed(&mut buf)?)?),
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

fn encode_presence_event(m: &PresenceEvent) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.client_id);
    put_uint(&mut buf, 2, u64::from(m.kind.raw()));
    if let Some(data) = &m.data {
        put_message(&mut buf, 3, &encode_presence_data(data));
    }
    buf
}

fn decode_presence_event(mut buf: &[u8]) -> Result<PresenceEvent, DecodeError> {
    let mut m = PresenceEvent {
        client_id: String::new(),
        kind: PresenceKind::Join,
        data: None,
    };
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.client_id = read_str(&mut buf)?,
            (2, WT_VARINT) => {
                let raw = read_u32(&mut buf)?;
                m.kind = PresenceKind::from_raw(raw).ok_or(DecodeError::UnknownEnumValue {
                    field: "presence kind",
                    value: raw,
                })?;
            }
            (3, WT_LEN) => m.data = Some(decode_presence_data(read_len_prefixed(&mut buf)?)?),
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

// ---------------------------------------------------------------------------
// Snapshot codecs
// ---------------------------------------------------------------------------

fn encode_entity_snapshot(m: &EntitySnapshot) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.id);
    put_str(&mut buf, 2, &m.template_id);
    put_message(&mut buf, 3, &encode_vector3(&m.position));
    put_message(&mut buf, 4, &encode_quaternion(&m.rotation));
    put_map(&mut buf, 5, &m.components);
    buf
}

fn decode_entity_snapshot(mut buf: &[u8]) -> Result<EntitySnapshot, DecodeError> {
    let mut m = EntitySnapshot::default();
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.id = read_str(&mut buf)?,
            (2, WT_LEN) => m.template_id = read_str(&mut buf)?,
            (3, WT_LEN) => m.position = decode_vector3(read_len_prefixed(&mut buf)?)?,
            (4, WT_LEN) => m.rotation = decode_quaternion(read_len_prefixed(&mut buf)?)?,
            (5, WT_LEN) => decode_map_entry(read_len_prefixed(&mut buf)?, &mut m.components)?,
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

fn encode_player_snapshot(m: &PlayerSnapshot) -> BytesMut {
    let mut buf = BytesMut::new();
    put_str(&mut buf, 1, &m.client_id);
    put_str(&mut buf, 2, &m.display_name);
    put_str(&mut buf, 3, &m.avatar_url);
    put_message(&mut buf, 4, &encode_vector3(&m.position));
    put_message(&mut buf, 5, &encode_quaternion(&m.rotation));
    buf
}

fn decode_player_snapshot(mut buf: &[u8]) -> Result<PlayerSnapshot, DecodeError> {
    let mut m = PlayerSnapshot::default();
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m.client_id = read_str(&mut buf)?,
            (2, WT_LEN) => m.display_name = read_str(&mut buf)?,
            (3, WT_LEN) => m.avatar_url = read_str(&mut buf)?,
            (4, WT_LEN) => m.position = decode_vector3(read_len_prefixed(&mut buf)?)?,
            (5, WT_LEN) => m.rotation = decode_quaternion(read_len_prefixed(&mut buf)?)?,
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

fn encode_world_state(m: &WorldState) -> BytesMut {
    let mut buf = BytesMut::new();
    for entity in &m.entities {
        put_message(&mut buf, 1, &encode_entity_snapshot(entity));
    }
    for player in &m.players {
        put_message(&mut buf, 2, &encode_player_snapshot(player));
    }
    put_int(&mut buf, 3, m.last_update);
    buf
}

fn decode_world_state(mut buf: &[u8]) -> Result<WorldState, DecodeError> {
    let mut m = WorldState::default();
    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (1, WT_LEN) => m
                .entities
                .push(decode_entity_snapshot(read_len_prefixed(&mut buf)?)?),
            (2, WT_LEN) => m
                .players
                .push(decode_player_snapshot(read_len_prefixed(&mut buf)?)?),
            (3, WT_VARINT) => m.last_update = read_varint(&mut buf)? as i64,
            _ => skip_field(&mut buf, wt)?,
        }
    }
    Ok(m)
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

// Envelope field numbers. 1–3 are header fields; 10–18 form the payload
// one-of range, exactly one of which may appear per frame.
const F_MESSAGE_ID: u32 = 1;
const F_TIMESTAMP: u32 = 2;
const F_TYPE: u32 = 3;
const F_CLIENT_HELLO: u32 = 10;
const F_SERVER_HELLO: u32 = 11;
const F_POSITION_UPDATE: u32 = 12;
const F_VOICE_DATA: u32 = 13;
const F_ENTITY_SPAWN: u32 = 14;
const F_ENTITY_UPDATE: u32 = 15;
const F_ENTITY_DESPAWN: u32 = 16;
const F_CHAT_MESSAGE: u32 = 17;
const F_PRESENCE_EVENT: u32 = 18;

/// Encode an envelope into a standalone binary frame.
pub fn encode_envelope(env: &Envelope) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    put_str(&mut buf, F_MESSAGE_ID, &env.message_id);
    put_int(&mut buf, F_TIMESTAMP, env.timestamp);
    put_uint(&mut buf, F_TYPE, u64::from(env.kind().raw()));

    let (field, body) = match &env.payload {
        Payload::ClientHello(m) => (F_CLIENT_HELLO, encode_client_hello(m)),
        Payload::ServerHello(m) => (F_SERVER_HELLO, encode_server_hello(m)),
        Payload::PositionUpdate(m) => (F_POSITION_UPDATE, encode_position_update(m)),
        Payload::VoiceData(m) => (F_VOICE_DATA, encode_voice_data(m)),
        Payload::EntitySpawn(m) => (F_ENTITY_SPAWN, encode_entity_spawn(m)),
        Payload::EntityUpdate(m) => (F_ENTITY_UPDATE, encode_entity_update(m)),
        Payload::EntityDespawn(m) => (F_ENTITY_DESPAWN, encode_entity_despawn(m)),
        Payload::ChatMessage(m) => (F_CHAT_MESSAGE, encode_chat_message(m)),
        Payload::PresenceEvent(m) => (F_PRESENCE_EVENT, encode_presence_event(m)),
    };
    put_message(&mut buf, field, &body);
    buf.freeze()
}

/// Decode and validate a binary frame.
///
/// Stale-sequence handling does **not** live here: a frame that decodes
/// cleanly is handed to the sequencing filter regardless of its counters.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let mut buf = bytes;
    let mut message_id = String::new();
    let mut timestamp: i64 = 0;
    let mut declared: Option<u32> = None;
    let mut payload: Option<Payload> = None;

    while buf.has_remaining() {
        let (field, wt) = read_tag(&mut buf)?;
        match (field, wt) {
            (F_MESSAGE_ID, WT_LEN) => message_id = read_str(&mut buf)?,
            (F_TIMESTAMP, WT_VARINT) => timestamp = read_varint(&mut buf)? as i64,
            (F_TYPE, WT_VARINT) => declared = Some(read_u32(&mut buf)?),
            (F_CLIENT_HELLO..=F_PRESENCE_EVENT, WT_LEN) => {
                if payload.is_some() {
                    return Err(DecodeError::MultiplePayloads);
                }
                let body = read_len_prefixed(&mut buf)?;
                payload = Some(match field {
                    F_CLIENT_HELLO => Payload::ClientHello(decode_client_hello(body)?),
                    F_SERVER_HELLO => Payload::ServerHello(decode_server_hello(body)?),
                    F_POSITION_UPDATE => Payload::PositionUpdate(decode_position_update(body)?),
                    F_VOICE_DATA => Payload::VoiceData(decode_voice_data(body)?),
                    F_ENTITY_SPAWN => Payload::EntitySpawn(decode_entity_spawn(body)?),
                    F_ENTITY_UPDATE => Payload::EntityUpdate(decode_entity_update(body)?),
                    F_ENTITY_DESPAWN => Payload::EntityDespawn(decode_entity_despawn(body)?),
                    F_CHAT_MESSAGE => Payload::ChatMessage(decode_chat_message(body)?),
                    _ => Payload::PresenceEvent(decode_presence_event(body)?),
                });
            }
            _ => skip_field(&mut buf, wt)?,
        }
    }

    let payload = payload.ok_or(DecodeError::MissingPayload)?;
    let declared = declared.ok_or(DecodeError::MissingType)?;
    let declared =
        MessageType::from_raw(declared).ok_or(DecodeError::UnknownMessageType(declared))?;
    let found = payload.kind();
    if declared != found {
        return Err(DecodeError::TypeMismatch { declared, found });
    }

    Ok(Envelope {
        message_id,
        timestamp,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip_boundaries() {
        for v in [0u64, 1, 127, 128, 300, u64::from(u32::MAX), u64::MAX] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, v);
            let mut slice: &[u8] = &buf;
            assert_eq!(read_varint(&mut slice).unwrap(), v);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn varint_overflow_rejected() {
        let raw = [0xffu8; 11];
        let mut slice: &[u8] = &raw;
        assert_eq!(read_varint(&mut slice), Err(DecodeError::VarintOverflow));
    }

    #[test]
    fn skip_handles_all_wire_types() {
        let mut buf = BytesMut::new();
        put_tag(&mut buf, 99, WT_VARINT);
        put_varint(&mut buf, 1234);
        put_tag(&mut buf, 99, WT_FIXED64);
        buf.put_u64_le(7);
        put_tag(&mut buf, 99, WT_LEN);
        put_varint(&mut buf, 3);
        buf.put_slice(b"abc");
        put_tag(&mut buf, 99, WT_FIXED32);
        buf.put_f32_le(1.5);

        let mut slice: &[u8] = &buf;
        while slice.has_remaining() {
            let (_, wt) = read_tag(&mut slice).unwrap();
            skip_field(&mut slice, wt).unwrap();
        }
    }
}
