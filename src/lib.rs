//! Atrium Sync Service
//!
//! Room-based synchronization of a shared mutable world (entities,
//! avatars, voice, chat, presence) across many concurrent clients, over
//! an unreliable, reordering transport.
//!
//! ## Architecture
//!
//! ```text
//! SyncServer  (server.rs)           ← WebSocket front-end
//!   └── Session  (session.rs)       ← per-connection state machine
//!         └── RoomGateway  (gateway.rs)  ← operations + collaborator seams
//!               └── Room  (room.rs)      ← single-writer actor per room
//!                     ├── WorldStore   (world.rs)
//!                     └── SequenceGate (sequence.rs)
//! ```
//!
//! `wire.rs` encodes/decodes the discriminated envelope; `protocol.rs`
//! owns every message type crossing the transport boundary. Each room's
//! state is mutated by exactly one task, so deltas broadcast in apply
//! order and rooms shard freely across cores.

// Protocol, codec and store are always available (no server feature needed).
pub mod error;
pub mod protocol;
pub mod sequence;
pub mod types;
pub mod wire;
pub mod world;

// Runtime modules require the `server` feature.
#[cfg(feature = "server")]
pub mod gateway;
#[cfg(feature = "server")]
pub mod room;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "server")]
pub mod session;

// Convenience re-exports
pub use error::{SyncError, SyncResult};
pub use protocol::{Envelope, Payload, SessionState};
pub use sequence::{SequenceGate, StreamKey};
pub use types::{Quaternion, SyncConfig, Vector3};
pub use wire::{decode_envelope, encode_envelope, DecodeError};
pub use world::WorldStore;

#[cfg(feature = "server")]
pub use gateway::{AuthVerifier, RoomDirectory, RoomGateway};
#[cfg(feature = "server")]
pub use room::{Room, RoomHandle};
#[cfg(feature = "server")]
pub use server::SyncServer;
#[cfg(feature = "server")]
pub use session::Session;
