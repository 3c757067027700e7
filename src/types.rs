//! Core value types shared across all modules.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl std::fmt::Display for Vector3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Current wall-clock time as unix milliseconds.
///
/// All protocol timestamps use this representation.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Stats & config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomStats {
    pub room_id: String,
    pub members: usize,
    pub entities: usize,
    pub presence_watchers: usize,
    pub applied_updates: u64,
    pub dropped_stale: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Bound of each room's apply-queue. Enqueueing awaits when full so
    /// backpressure lands on the producing connection, never on the room.
    pub apply_queue_capacity: usize,
    /// Bound of each member's outbound state-delta queue. A member whose
    /// queue fills up is force-disconnected (treated as an implicit leave).
    pub delta_queue_capacity: usize,
    /// Bound of the per-room voice ring. A lagging subscriber loses the
    /// oldest buffered frames first.
    pub voice_queue_capacity: usize,
    /// Bound of each presence watcher's queue.
    pub presence_queue_capacity: usize,
    /// Seconds a joined session may stay silent before it is treated as an
    /// implicit leave.
    pub idle_grace_secs: u64,
    /// Seconds between idle sweeps.
    pub idle_sweep_secs: u64,
    /// Echo chat messages back to their sender through the broadcast path.
    /// Off by default: stock clients render their own chat locally.
    pub echo_chat: bool,
    /// Decode failures tolerated per connection before it is closed.
    pub max_protocol_violations: u32,
    /// Member capacity for rooms the directory auto-provisions.
    pub default_room_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            apply_queue_capacity: 256,
            delta_queue_capacity: 256,
            voice_queue_capacity: 64,
            presence_queue_capacity: 32,
            idle_grace_secs: 30,
            idle_sweep_secs: 5,
            echo_chat: false,
            max_protocol_violations: 8,
            default_room_capacity: 64,
        }
    }
}
