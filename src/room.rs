//! Room runtime – one single-writer actor per room.
//!
//! ## Discipline
//!
//! All mutations of a room's [`WorldStore`] and [`SequenceGate`] happen on
//! one task, fed by a bounded apply-queue. Connection handlers never touch
//! room state directly; they enqueue parsed messages and await
//! application. Deltas are broadcast in exactly the order they were
//! applied, which gives per-room total order without any global lock.
//! Rooms share nothing and run fully in parallel.
//!
//! ## Fan-out
//!
//! | Stream          | Channel                     | Overflow policy          |
//! |-----------------|-----------------------------|--------------------------|
//! | state deltas    | per-member bounded `mpsc`   | member force-disconnected|
//! | voice frames    | per-room `broadcast`        | oldest frames dropped    |
//! | presence events | per-watcher bounded `mpsc`  | event dropped            |
//!
//! The actor itself never blocks on network I/O or on a slow subscriber.

use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    ChatMessage, EntityDespawn, EntitySpawn, EntityUpdate, Envelope, Payload, PositionUpdate,
    PresenceData, PresenceEvent, PresenceKind, VoiceData, WorldState,
};
use crate::sequence::{SequenceGate, StreamKey};
use crate::types::{Quaternion, RoomStats, SyncConfig, Vector3};
use crate::wire;
use crate::world::{PlayerRecord, WorldStore};
use bytes::Bytes;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Inbound updates
// ---------------------------------------------------------------------------

/// A decoded, per-session message headed for the apply-queue.
///
/// Join/leave are not updates — they travel as dedicated commands so the
/// actor can reply with streams/snapshots.
#[derive(Debug, Clone)]
pub enum ClientUpdate {
    Position(PositionUpdate),
    Voice(VoiceData),
    Spawn(EntitySpawn),
    Update(EntityUpdate),
    Despawn(EntityDespawn),
    Chat(ChatMessage),
    /// Clients may only send UPDATE presence; JOIN/LEAVE are derived from
    /// session lifecycle and dropped if client-supplied.
    Presence(PresenceEvent),
}

// ---------------------------------------------------------------------------
// Outbound streams
// ---------------------------------------------------------------------------

/// A pre-encoded voice frame on the room's broadcast ring. Encoded once,
/// fanned out to every subscriber; receivers skip their own frames.
#[derive(Debug, Clone)]
pub struct VoiceFrame {
    pub from_client_id: String,
    pub frame: Bytes,
}

/// Everything a joined session needs to pump its outbound half.
#[derive(Debug)]
pub struct SessionStreams {
    pub room_id: String,
    pub assigned_client_id: String,
    pub initial_state: WorldState,
    /// Ordered state deltas (position/entity/chat/presence envelopes).
    pub deltas: mpsc::Receiver<Envelope>,
    /// Lossy voice ring; lagging loses oldest frames first.
    pub voice: broadcast::Receiver<VoiceFrame>,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

enum RoomCommand {
    Join {
        client_id_hint: String,
        display_name: String,
        reply: oneshot::Sender<SyncResult<SessionStreams>>,
    },
    Leave {
        client_id: String,
        reply: Option<oneshot::Sender<bool>>,
    },
    Apply {
        from: String,
        update: ClientUpdate,
        reply: Option<oneshot::Sender<SyncResult<()>>>,
    },
    WatchPresence {
        reply: oneshot::Sender<mpsc::Receiver<PresenceEvent>>,
    },
    Snapshot {
        reply: oneshot::Sender<WorldState>,
    },
    Stats {
        reply: oneshot::Sender<RoomStats>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable handle to a room's apply-queue.
///
/// Every method enqueues a command and awaits the actor's reply; a closed
/// queue maps to [`SyncError::RoomClosed`].
#[derive(Clone, Debug)]
pub struct RoomHandle {
    room_id: String,
    tx: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    async fn send<T>(
        &self,
        cmd: RoomCommand,
        rx: oneshot::Receiver<T>,
    ) -> SyncResult<T> {
        let closed = || SyncError::RoomClosed(self.room_id.clone());
        self.tx.send(cmd).await.map_err(|_| closed())?;
        rx.await.map_err(|_| closed())
    }

    /// Join the room. On success the player is visible in the returned
    /// snapshot and a JOIN presence event has gone out to everyone else.
    pub async fn join(
        &self,
        client_id_hint: impl Into<String>,
        display_name: impl Into<String>,
    ) -> SyncResult<SessionStreams> {
        let (reply, rx) = oneshot::channel();
        self.send(
            RoomCommand::Join {
                client_id_hint: client_id_hint.into(),
                display_name: display_name.into(),
                reply,
            },
            rx,
        )
        .await?
    }

    /// Leave the room. Idempotent: leaving twice (or an id that never
    /// joined) reports `false` but is not an error.
    pub async fn leave(&self, client_id: impl Into<String>) -> SyncResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(
            RoomCommand::Leave {
                client_id: client_id.into(),
                reply: Some(reply),
            },
            rx,
        )
        .await
    }

    /// Apply one client message. Store-level errors come back to this
    /// caller only; the room keeps running.
    pub async fn apply(&self, from: impl Into<String>, update: ClientUpdate) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(
            RoomCommand::Apply {
                from: from.into(),
                update,
                reply: Some(reply),
            },
            rx,
        )
        .await?
    }

    /// Fire-and-forget apply for the hot path (position/voice), where the
    /// only possible outcomes are "applied" and "silently dropped".
    pub async fn apply_nowait(
        &self,
        from: impl Into<String>,
        update: ClientUpdate,
    ) -> SyncResult<()> {
        self.tx
            .send(RoomCommand::Apply {
                from: from.into(),
                update,
                reply: None,
            })
            .await
            .map_err(|_| SyncError::RoomClosed(self.room_id.clone()))
    }

    /// Register a presence watcher, independent of any sync session.
    pub async fn watch_presence(&self) -> SyncResult<mpsc::Receiver<PresenceEvent>> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::WatchPresence { reply }, rx).await
    }

    pub async fn snapshot(&self) -> SyncResult<WorldState> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Snapshot { reply }, rx).await
    }

    pub async fn stats(&self) -> SyncResult<RoomStats> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Stats { reply }, rx).await
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Member {
    display_name: String,
    delta_tx: mpsc::Sender<Envelope>,
    last_activity: Instant,
}

pub struct Room {
    room_id: String,
    capacity: usize,
    config: SyncConfig,
    store: WorldStore,
    gate: SequenceGate,
    members: HashMap<String, Member>,
    watchers: Vec<mpsc::Sender<PresenceEvent>>,
    voice_tx: broadcast::Sender<VoiceFrame>,
    applied_updates: u64,
    dropped_stale: u64,
    rx: mpsc::Receiver<RoomCommand>,
}

impl Room {
    /// Spawn the room actor and return its handle.
    pub fn spawn(room_id: impl Into<String>, capacity: usize, config: SyncConfig) -> RoomHandle {
        let room_id = room_id.into();
        let (tx, rx) = mpsc::channel(config.apply_queue_capacity.max(1));
        let (voice_tx, _) = broadcast::channel(config.voice_queue_capacity.max(1));

        let room = Self {
            room_id: room_id.clone(),
            capacity,
            config,
            store: WorldStore::new(),
            gate: SequenceGate::new(),
            members: HashMap::new(),
            watchers: Vec::new(),
            voice_tx,
            applied_updates: 0,
            dropped_stale: 0,
            rx,
        };
        tokio::spawn(room.run());

        RoomHandle { room_id, tx }
    }

    async fn run(mut self) {
        info!("Room '{}' started", self.room_id);
        let mut sweep = tokio::time::interval(Duration::from_secs(self.config.idle_sweep_secs.max(1)));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd),
                        None => break,
                    }
                }
                _ = sweep.tick() => self.sweep_idle(),
            }
        }
        info!("Room '{}' stopped", self.room_id);
    }

    fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                client_id_hint,
                display_name,
                reply,
            } => {
                let _ = reply.send(self.join(client_id_hint, display_name));
            }
            RoomCommand::Leave { client_id, reply } => {
                let existed = self.remove_member(&client_id, "leave request");
                if let Some(reply) = reply {
                    let _ = reply.send(existed);
                }
            }
            RoomCommand::Apply {
                from,
                update,
                reply,
            } => {
                let result = self.reconcile(&from, update);
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            RoomCommand::WatchPresence { reply } => {
                let (tx, rx) = mpsc::channel(self.config.presence_queue_capacity.max(1));
                self.watchers.push(tx);
                let _ = reply.send(rx);
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
            RoomCommand::Stats { reply } => {
                let _ = reply.send(RoomStats {
                    room_id: self.room_id.clone(),
                    members: self.members.len(),
                    entities: self.store.entity_count(),
                    presence_watchers: self.watchers.len(),
                    applied_updates: self.applied_updates,
                    dropped_stale: self.dropped_stale,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    fn join(&mut self, hint: String, display_name: String) -> SyncResult<SessionStreams> {
        if self.members.len() >= self.capacity {
            return Err(SyncError::RoomFull(self.room_id.clone()));
        }

        let client_id = if hint.is_empty() || self.members.contains_key(&hint) {
            Uuid::new_v4().to_string()
        } else {
            hint
        };

        let (delta_tx, delta_rx) = mpsc::channel(self.config.delta_queue_capacity.max(1));
        self.members.insert(
            client_id.clone(),
            Member {
                display_name: display_name.clone(),
                delta_tx,
                last_activity: Instant::now(),
            },
        );
        self.store.insert_player(PlayerRecord {
            client_id: client_id.clone(),
            display_name: display_name.clone(),
            avatar_url: String::new(),
            position: Vector3::zero(),
            rotation: Quaternion::identity(),
        });

        // Snapshot after insertion so the joiner sees itself.
        let initial_state = self.store.snapshot();

        let event = PresenceEvent {
            client_id: client_id.clone(),
            kind: PresenceKind::Join,
            data: Some(PresenceData {
                display_name,
                avatar_url: String::new(),
                position: None,
                rotation: None,
            }),
        };
        self.announce_presence(Some(&client_id), event);

        info!(
            "Room '{}': '{}' joined ({} members)",
            self.room_id,
            client_id,
            self.members.len()
        );

        Ok(SessionStreams {
            room_id: self.room_id.clone(),
            assigned_client_id: client_id,
            initial_state,
            deltas: delta_rx,
            voice: self.voice_tx.subscribe(),
        })
    }

    /// Remove a member and broadcast its LEAVE. Returns whether the member
    /// was present.
    fn remove_member(&mut self, client_id: &str, reason: &str) -> bool {
        let Some(member) = self.members.remove(client_id) else {
            return false;
        };
        self.store.remove_player(client_id);
        self.gate.forget(&StreamKey::Voice(client_id.to_string()));
        self.gate.forget(&StreamKey::Position(client_id.to_string()));

        let event = PresenceEvent {
            client_id: client_id.to_string(),
            kind: PresenceKind::Leave,
            data: None,
        };
        self.announce_presence(None, event);

        info!(
            "Room '{}': '{}' ({}) left ({}; {} members remain)",
            self.room_id,
            client_id,
            member.display_name,
            reason,
            self.members.len()
        );
        true
    }

    fn sweep_idle(&mut self) {
        let grace = Duration::from_secs(self.config.idle_grace_secs);
        let idle: Vec<String> = self
            .members
            .iter()
            .filter(|(_, m)| m.last_activity.elapsed() > grace)
            .map(|(id, _)| id.clone())
            .collect();
        for client_id in idle {
            self.remove_member(&client_id, "idle grace expired");
        }
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Apply one admitted client message and broadcast the matching delta.
    ///
    /// Broadcast order equals apply order by construction: this runs on
    /// the single actor task, one message at a time.
    fn reconcile(&mut self, from: &str, update: ClientUpdate) -> SyncResult<()> {
        if let Some(member) = self.members.get_mut(from) {
            member.last_activity = Instant::now();
        }

        match update {
            ClientUpdate::Position(update) => {
                let key = StreamKey::Position(update.entity_id.clone());
                if !self.gate.admit(key, update.sequence_number) {
                    self.dropped_stale += 1;
                    return Ok(());
                }
                if self.store.apply_position(&update) {
                    self.applied_updates += 1;
                    self.broadcast_delta(Some(from), Payload::PositionUpdate(update));
                }
                Ok(())
            }
            ClientUpdate::Voice(mut voice) => {
                // The relay, not the client, is authoritative for origin.
                voice.from_client_id = from.to_string();
                let key = StreamKey::Voice(from.to_string());
                if !self.gate.admit(key, voice.sequence_number) {
                    self.dropped_stale += 1;
                    return Ok(());
                }
                self.applied_updates += 1;
                let frame = wire::encode_envelope(&Envelope::new(Payload::VoiceData(voice)));
                // No subscribers is fine; send only fails when empty.
                let _ = self.voice_tx.send(VoiceFrame {
                    from_client_id: from.to_string(),
                    frame,
                });
                Ok(())
            }
            ClientUpdate::Spawn(spawn) => {
                self.store.apply_spawn(&spawn)?;
                self.applied_updates += 1;
                self.broadcast_delta(Some(from), Payload::EntitySpawn(spawn));
                Ok(())
            }
            ClientUpdate::Update(update) => {
                self.store.apply_component_update(&update)?;
                self.applied_updates += 1;
                self.broadcast_delta(Some(from), Payload::EntityUpdate(update));
                Ok(())
            }
            ClientUpdate::Despawn(despawn) => {
                if self.store.apply_despawn(&despawn.entity_id) {
                    self.gate
                        .forget(&StreamKey::Position(despawn.entity_id.clone()));
                    self.applied_updates += 1;
                    self.broadcast_delta(Some(from), Payload::EntityDespawn(despawn));
                }
                Ok(())
            }
            ClientUpdate::Chat(mut chat) => {
                chat.from_client_id = from.to_string();
                self.applied_updates += 1;
                let exclude = if self.config.echo_chat { None } else { Some(from) };
                self.broadcast_delta(exclude, Payload::ChatMessage(chat));
                Ok(())
            }
            ClientUpdate::Presence(event) => {
                if event.kind != PresenceKind::Update {
                    warn!(
                        "Room '{}': dropping client-supplied {:?} presence from '{}'",
                        self.room_id, event.kind, from
                    );
                    return Ok(());
                }
                let data = event.data.unwrap_or_default();
                if self.store.apply_presence_refresh(from, &data) {
                    self.applied_updates += 1;
                    let event = PresenceEvent {
                        client_id: from.to_string(),
                        kind: PresenceKind::Update,
                        data: Some(data),
                    };
                    self.announce_presence(Some(from), event);
                }
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Queue a delta for every member except `exclude`.
    ///
    /// A member with a full queue cannot keep its ordered view of the room
    /// and is force-disconnected instead of stalling the actor.
    fn broadcast_delta(&mut self, exclude: Option<&str>, payload: Payload) {
        let envelope = Envelope::new(payload);
        let mut dead: Vec<String> = Vec::new();

        for (client_id, member) in &self.members {
            if exclude == Some(client_id.as_str()) {
                continue;
            }
            match member.delta_tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "Room '{}': member '{}' delta queue full – disconnecting",
                        self.room_id, client_id
                    );
                    dead.push(client_id.clone());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(
                        "Room '{}': member '{}' delta queue closed",
                        self.room_id, client_id
                    );
                    dead.push(client_id.clone());
                }
            }
        }

        for client_id in dead {
            self.remove_member(&client_id, "outbound queue unavailable");
        }
    }

    /// Deliver a presence event to members (minus `exclude`) and watchers.
    fn announce_presence(&mut self, exclude: Option<&str>, event: PresenceEvent) {
        // Watchers are best-effort observers: a full queue drops the
        // event, a closed one drops the watcher.
        self.watchers.retain(|tx| {
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        self.broadcast_delta(exclude, Payload::PresenceEvent(event));
    }
}
