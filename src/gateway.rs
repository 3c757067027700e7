//! Gateway – the externally-facing operation surface.
//!
//! Owns the room registry and composes the pipeline for callers:
//!
//! | Operation        | Shape            | Errors                              |
//! |------------------|------------------|-------------------------------------|
//! | `connect`        | bidi stream      | `AuthRejected`, `RoomNotFound`, `RoomFull` |
//! | `join_room`      | unary            | `AuthRejected`, `RoomNotFound`, `RoomFull` |
//! | `leave_room`     | unary, idempotent| —                                   |
//! | `watch_presence` | server stream    | `RoomNotFound`                      |
//!
//! Auth and room metadata are external concerns consumed through the
//! [`AuthVerifier`] and [`RoomDirectory`] seams; the gateway never
//! inspects token contents and only consumes a joinable flag plus a
//! member capacity.

use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    ClientHello, JoinRequest, JoinResponse, LeaveRequest, LeaveResponse, PresenceEvent,
};
use crate::room::{Room, RoomHandle, SessionStreams};
use crate::types::{RoomStats, SyncConfig};
use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Canonical identity minted by the external auth service.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    /// Server-authoritative client id. Empty means "no preference" and
    /// defers to the client's suggested id.
    pub canonical_id: String,
}

/// External token verification. The token is opaque here.
pub trait AuthVerifier: Send + Sync {
    fn verify(&self, token: &str) -> SyncResult<ClientIdentity>;
}

/// Accepts any non-empty token without minting an identity. Development
/// and test deployments; production wires a real verifier.
pub struct OpenAuth;

impl AuthVerifier for OpenAuth {
    fn verify(&self, token: &str) -> SyncResult<ClientIdentity> {
        if token.is_empty() {
            return Err(SyncError::AuthRejected);
        }
        Ok(ClientIdentity::default())
    }
}

/// What the external room admin store knows about a room.
#[derive(Debug, Clone, Copy)]
pub struct RoomPolicy {
    pub joinable: bool,
    pub capacity: usize,
}

/// External room metadata lookup.
pub trait RoomDirectory: Send + Sync {
    fn lookup(&self, room_id: &str) -> Option<RoomPolicy>;
}

/// Fixed room table, configured up front.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    rooms: HashMap<String, RoomPolicy>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_room(mut self, room_id: impl Into<String>, capacity: usize) -> Self {
        self.rooms.insert(
            room_id.into(),
            RoomPolicy {
                joinable: true,
                capacity,
            },
        );
        self
    }
}

impl RoomDirectory for StaticDirectory {
    fn lookup(&self, room_id: &str) -> Option<RoomPolicy> {
        self.rooms.get(room_id).copied()
    }
}

/// Auto-provisioning directory: every room id is joinable at a fixed
/// capacity. The binary's default mode.
pub struct OpenDirectory {
    pub capacity: usize,
}

impl RoomDirectory for OpenDirectory {
    fn lookup(&self, _room_id: &str) -> Option<RoomPolicy> {
        Some(RoomPolicy {
            joinable: true,
            capacity: self.capacity,
        })
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct RoomGateway {
    config: SyncConfig,
    auth: Arc<dyn AuthVerifier>,
    directory: Arc<dyn RoomDirectory>,
    rooms: RwLock<HashMap<String, RoomHandle>>,
}

impl RoomGateway {
    pub fn new(
        config: SyncConfig,
        auth: Arc<dyn AuthVerifier>,
        directory: Arc<dyn RoomDirectory>,
    ) -> Self {
        Self {
            config,
            auth,
            directory,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Resolve a running room, starting its actor on first use.
    ///
    /// Rooms whose directory entry is missing or unjoinable resolve to
    /// `RoomNotFound` without mutating anything.
    fn room(&self, room_id: &str) -> SyncResult<RoomHandle> {
        if let Some(handle) = self.rooms.read().get(room_id) {
            return Ok(handle.clone());
        }

        let policy = self
            .directory
            .lookup(room_id)
            .filter(|p| p.joinable)
            .ok_or_else(|| SyncError::RoomNotFound(room_id.to_string()))?;

        let mut rooms = self.rooms.write();
        // Raced creation: keep whichever actor won.
        if let Some(handle) = rooms.get(room_id) {
            return Ok(handle.clone());
        }
        let handle = Room::spawn(room_id, policy.capacity, self.config.clone());
        rooms.insert(room_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Look up a room that must already be running (no provisioning).
    fn running_room(&self, room_id: &str) -> Option<RoomHandle> {
        self.rooms.read().get(room_id).cloned()
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Open a long-lived session: auth, join, and hand back the outbound
    /// streams. The caller pumps inbound messages through the returned
    /// streams' room handle (see [`crate::session`]).
    pub async fn connect(&self, hello: &ClientHello) -> SyncResult<(RoomHandle, SessionStreams)> {
        let identity = self.auth.verify(&hello.auth_token)?;
        let room = self.room(&hello.requested_room)?;

        let hint = if identity.canonical_id.is_empty() {
            hello.client_id.clone()
        } else {
            // The auth service outranks the client's suggestion.
            identity.canonical_id
        };

        let streams = room.join(hint, hello.display_name.clone()).await?;
        Ok((room, streams))
    }

    /// Unary join. The returned streams belong to the joined session; the
    /// response mirrors what a remote caller would see.
    pub async fn join_room(
        &self,
        request: &JoinRequest,
    ) -> SyncResult<(JoinResponse, RoomHandle, SessionStreams)> {
        self.auth.verify(&request.auth_token)?;
        let room = self.room(&request.room_id)?;
        let streams = room.join("", request.display_name.clone()).await?;

        let response = JoinResponse {
            success: true,
            room_id: streams.room_id.clone(),
            assigned_client_id: streams.assigned_client_id.clone(),
            initial_state: streams.initial_state.clone(),
        };
        Ok((response, room, streams))
    }

    /// Unary leave. Idempotent: unknown rooms and already-gone clients
    /// still succeed.
    pub async fn leave_room(&self, request: &LeaveRequest) -> LeaveResponse {
        if let Some(room) = self.running_room(&request.room_id) {
            match room.leave(&request.client_id).await {
                Ok(was_member) => {
                    if !was_member {
                        debug!(
                            "Leave for '{}' in room '{}' was a no-op",
                            request.client_id, request.room_id
                        );
                    }
                }
                Err(_) => {
                    // Room already shut down – same observable outcome.
                }
            }
        }
        LeaveResponse { success: true }
    }

    /// Server-streamed presence feed, independent of any sync session.
    pub async fn watch_presence(
        &self,
        room_id: &str,
    ) -> SyncResult<mpsc::Receiver<PresenceEvent>> {
        let room = self.room(room_id)?;
        room.watch_presence().await
    }

    pub async fn room_stats(&self, room_id: &str) -> SyncResult<RoomStats> {
        let room = self
            .running_room(room_id)
            .ok_or_else(|| SyncError::RoomNotFound(room_id.to_string()))?;
        room.stats().await
    }

    /// Drop the registry entry for a room with no members and no
    /// watchers. The actor exits once the last handle goes away.
    pub async fn remove_if_empty(&self, room_id: &str) -> bool {
        let Some(room) = self.running_room(room_id) else {
            return false;
        };
        match room.stats().await {
            Ok(stats) if stats.members == 0 && stats.presence_watchers == 0 => {
                self.rooms.write().remove(room_id);
                debug!("Removed idle room '{}'", room_id);
                true
            }
            _ => false,
        }
    }

    pub fn active_rooms(&self) -> Vec<String> {
        self.rooms.read().keys().cloned().collect()
    }
}
