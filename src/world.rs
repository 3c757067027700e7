//! World state store – the authoritative per-room entity/player registry.
//!
//! One instance per room, owned and mutated exclusively by that room's
//! apply loop (single-writer discipline). Everything handed outward is a
//! deep copy; nothing here aliases live state.

use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    EntitySnapshot, EntitySpawn, EntityUpdate, PlayerSnapshot, PositionUpdate, PresenceData,
    WorldState,
};
use crate::types::{now_millis, Quaternion, Vector3};
use log::debug;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A live synchronized entity.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub id: String,
    pub template_id: String,
    /// Client that spawned the entity; informational, not an ACL.
    pub owner_id: String,
    pub position: Vector3,
    pub rotation: Quaternion,
    pub components: HashMap<String, Vec<u8>>,
}

/// The in-world representation of a joined session.
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub client_id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub position: Vector3,
    pub rotation: Quaternion,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct WorldStore {
    entities: HashMap<String, EntityRecord>,
    players: HashMap<String, PlayerRecord>,
    /// Monotonically non-decreasing; advanced by every successful mutation.
    last_update: i64,
}

impl WorldStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self) {
        // Clamp so the stamp never runs backwards under clock adjustment.
        self.last_update = self.last_update.max(now_millis());
    }

    // -----------------------------------------------------------------------
    // Entity lifecycle
    // -----------------------------------------------------------------------

    /// Insert a new entity. The id must not name a live entity.
    pub fn apply_spawn(&mut self, spawn: &EntitySpawn) -> SyncResult<()> {
        if self.entities.contains_key(&spawn.entity_id) {
            return Err(SyncError::DuplicateEntity(spawn.entity_id.clone()));
        }
        self.entities.insert(
            spawn.entity_id.clone(),
            EntityRecord {
                id: spawn.entity_id.clone(),
                template_id: spawn.template_id.clone(),
                owner_id: spawn.owner_id.clone(),
                position: Vector3::zero(),
                rotation: Quaternion::identity(),
                components: spawn.components.clone(),
            },
        );
        self.touch();
        Ok(())
    }

    /// Merge component values into a live entity, last write wins per key.
    pub fn apply_component_update(&mut self, update: &EntityUpdate) -> SyncResult<()> {
        let entity = self
            .entities
            .get_mut(&update.entity_id)
            .ok_or_else(|| SyncError::UnknownEntity(update.entity_id.clone()))?;
        for (key, value) in &update.components {
            entity.components.insert(key.clone(), value.clone());
        }
        self.touch();
        Ok(())
    }

    /// Remove an entity. Removing an absent id is a no-op, not an error —
    /// despawns race against leaves and against each other.
    pub fn apply_despawn(&mut self, entity_id: &str) -> bool {
        let removed = self.entities.remove(entity_id).is_some();
        if removed {
            self.touch();
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Transforms
    // -----------------------------------------------------------------------

    /// Overwrite the transform of a live entity, or of a joined player
    /// carrying the id. Returns whether anything was written; updates for
    /// ids nobody holds are dropped.
    ///
    /// Sequencing admission happens before this call — a stale update
    /// never reaches the store.
    pub fn apply_position(&mut self, update: &PositionUpdate) -> bool {
        if let Some(entity) = self.entities.get_mut(&update.entity_id) {
            entity.position = update.position;
            entity.rotation = update.rotation;
            self.touch();
            return true;
        }
        if let Some(player) = self.players.get_mut(&update.entity_id) {
            player.position = update.position;
            player.rotation = update.rotation;
            self.touch();
            return true;
        }
        debug!(
            "Dropping position update for unknown id '{}'",
            update.entity_id
        );
        false
    }

    // -----------------------------------------------------------------------
    // Players
    // -----------------------------------------------------------------------

    pub fn insert_player(&mut self, player: PlayerRecord) {
        self.players.insert(player.client_id.clone(), player);
        self.touch();
    }

    pub fn remove_player(&mut self, client_id: &str) -> Option<PlayerRecord> {
        let removed = self.players.remove(client_id);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Fold a presence UPDATE into the player record. Empty strings and
    /// absent transforms leave the existing values alone.
    pub fn apply_presence_refresh(&mut self, client_id: &str, data: &PresenceData) -> bool {
        let Some(player) = self.players.get_mut(client_id) else {
            return false;
        };
        if !data.display_name.is_empty() {
            player.display_name = data.display_name.clone();
        }
        if !data.avatar_url.is_empty() {
            player.avatar_url = data.avatar_url.clone();
        }
        if let Some(position) = data.position {
            player.position = position;
        }
        if let Some(rotation) = data.rotation {
            player.rotation = rotation;
        }
        self.touch();
        true
    }

    pub fn player(&self, client_id: &str) -> Option<&PlayerRecord> {
        self.players.get(client_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn contains_entity(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    /// Build a full-state snapshot for a joining client.
    ///
    /// Deep copy — the receiver can hold it across awaits without aliasing
    /// live state.
    pub fn snapshot(&self) -> WorldState {
        let entities = self
            .entities
            .values()
            .map(|e| EntitySnapshot {
                id: e.id.clone(),
                template_id: e.template_id.clone(),
                position: e.position,
                rotation: e.rotation,
                components: e.components.clone(),
            })
            .collect();

        let players = self
            .players
            .values()
            .map(|p| PlayerSnapshot {
                client_id: p.client_id.clone(),
                display_name: p.display_name.clone(),
                avatar_url: p.avatar_url.clone(),
                position: p.position,
                rotation: p.rotation,
            })
            .collect();

        WorldState {
            entities,
            players,
            last_update: self.last_update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(id: &str) -> EntitySpawn {
        EntitySpawn {
            entity_id: id.into(),
            template_id: "prop/crate".into(),
            owner_id: "alice".into(),
            components: HashMap::new(),
        }
    }

    fn position(id: &str, x: f32, seq: u32) -> PositionUpdate {
        PositionUpdate {
            entity_id: id.into(),
            position: Vector3::new(x, 0.0, 0.0),
            rotation: Quaternion::identity(),
            sequence_number: seq,
        }
    }

    #[test]
    fn spawn_then_despawn_lifecycle() {
        let mut store = WorldStore::new();
        store.apply_spawn(&spawn("e1")).unwrap();
        assert!(store.contains_entity("e1"));
        assert_eq!(store.snapshot().entities.len(), 1);

        assert!(store.apply_despawn("e1"));
        assert!(!store.contains_entity("e1"));
        assert!(store.snapshot().entities.is_empty());
    }

    #[test]
    fn duplicate_spawn_rejected_while_alive() {
        let mut store = WorldStore::new();
        store.apply_spawn(&spawn("e1")).unwrap();
        assert_eq!(
            store.apply_spawn(&spawn("e1")),
            Err(SyncError::DuplicateEntity("e1".into()))
        );
        // After despawn the id is free again.
        store.apply_despawn("e1");
        store.apply_spawn(&spawn("e1")).unwrap();
    }

    #[test]
    fn despawn_absent_is_noop() {
        let mut store = WorldStore::new();
        assert!(!store.apply_despawn("ghost"));
        assert!(!store.apply_despawn("ghost"));
    }

    #[test]
    fn component_update_merges_last_write_wins() {
        let mut store = WorldStore::new();
        let mut sp = spawn("e1");
        sp.components.insert("color".into(), b"red".to_vec());
        store.apply_spawn(&sp).unwrap();

        let mut up = EntityUpdate {
            entity_id: "e1".into(),
            components: HashMap::new(),
        };
        up.components.insert("color".into(), b"blue".to_vec());
        up.components.insert("size".into(), b"2".to_vec());
        store.apply_component_update(&up).unwrap();

        let snap = store.snapshot();
        let e = &snap.entities[0];
        assert_eq!(e.components["color"], b"blue");
        assert_eq!(e.components["size"], b"2");
    }

    #[test]
    fn component_update_unknown_entity_errors() {
        let mut store = WorldStore::new();
        let up = EntityUpdate {
            entity_id: "nope".into(),
            components: HashMap::new(),
        };
        assert_eq!(
            store.apply_component_update(&up),
            Err(SyncError::UnknownEntity("nope".into()))
        );
    }

    #[test]
    fn position_targets_entity_then_player() {
        let mut store = WorldStore::new();
        store.apply_spawn(&spawn("e1")).unwrap();
        store.insert_player(PlayerRecord {
            client_id: "alice".into(),
            display_name: "Alice".into(),
            avatar_url: String::new(),
            position: Vector3::zero(),
            rotation: Quaternion::identity(),
        });

        assert!(store.apply_position(&position("e1", 4.0, 1)));
        assert!(store.apply_position(&position("alice", 7.0, 1)));
        assert!(!store.apply_position(&position("ghost", 9.0, 1)));

        let snap = store.snapshot();
        assert_eq!(snap.entities[0].position.x, 4.0);
        assert_eq!(snap.players[0].position.x, 7.0);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let mut store = WorldStore::new();
        store.apply_spawn(&spawn("e1")).unwrap();
        let snap = store.snapshot();
        store.apply_despawn("e1");
        // The earlier snapshot is unaffected by later mutations.
        assert_eq!(snap.entities.len(), 1);
    }

    #[test]
    fn last_update_never_decreases() {
        let mut store = WorldStore::new();
        store.apply_spawn(&spawn("e1")).unwrap();
        let first = store.snapshot().last_update;
        assert!(first > 0);
        store.apply_despawn("e1");
        assert!(store.snapshot().last_update >= first);
    }

    #[test]
    fn presence_refresh_partial_fields() {
        let mut store = WorldStore::new();
        store.insert_player(PlayerRecord {
            client_id: "alice".into(),
            display_name: "Alice".into(),
            avatar_url: "a://old".into(),
            position: Vector3::zero(),
            rotation: Quaternion::identity(),
        });

        let data = PresenceData {
            display_name: String::new(),
            avatar_url: "a://new".into(),
            position: Some(Vector3::new(1.0, 2.0, 3.0)),
            rotation: None,
        };
        assert!(store.apply_presence_refresh("alice", &data));
        assert!(!store.apply_presence_refresh("ghost", &data));

        let p = store.player("alice").unwrap();
        assert_eq!(p.display_name, "Alice");
        assert_eq!(p.avatar_url, "a://new");
        assert_eq!(p.position.x, 1.0);
    }
}
