//! Per-stream monotonic sequence admission.
//!
//! Position streams are keyed by entity id, voice streams by sending
//! client id. A rejected sequence number is not an error — reordering and
//! client-side retransmission are expected transport behavior — so the
//! gate is a pure accept/reject decision with no side effects beyond the
//! stored watermark.

use std::collections::HashMap;

/// Half of the u32 counter range. A new value is "newer" than the
/// watermark iff its forward distance is below this, which keeps admission
/// working across counter wraparound.
const HALF_RANGE: u32 = 1 << 31;

/// Stream identity within one room. The two stream classes get distinct
/// key spaces so an entity id can never shadow a client id.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum StreamKey {
    Position(String),
    Voice(String),
}

/// Watermark table for one room. Owned and mutated exclusively by that
/// room's apply loop.
#[derive(Debug, Default)]
pub struct SequenceGate {
    last_accepted: HashMap<StreamKey, u32>,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `seq` for `key`, updating the watermark on acceptance.
    ///
    /// Accepts when no watermark exists, or when the forward distance from
    /// the watermark (mod 2^32) is non-zero and below half the range.
    pub fn admit(&mut self, key: StreamKey, seq: u32) -> bool {
        match self.last_accepted.get(&key) {
            Some(&last) => {
                let distance = seq.wrapping_sub(last);
                if distance == 0 || distance >= HALF_RANGE {
                    return false;
                }
                self.last_accepted.insert(key, seq);
                true
            }
            None => {
                self.last_accepted.insert(key, seq);
                true
            }
        }
    }

    /// Forget a stream's watermark (entity despawned / client left), so a
    /// later reuse of the id starts fresh.
    pub fn forget(&mut self, key: &StreamKey) {
        self.last_accepted.remove(key);
    }

    pub fn tracked_streams(&self) -> usize {
        self.last_accepted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(id: &str) -> StreamKey {
        StreamKey::Position(id.to_string())
    }

    #[test]
    fn first_value_always_admitted() {
        let mut gate = SequenceGate::new();
        assert!(gate.admit(pos("e1"), 0));
        assert!(gate.admit(StreamKey::Voice("c1".into()), 4_000_000_000));
    }

    #[test]
    fn stale_and_duplicate_rejected() {
        let mut gate = SequenceGate::new();
        assert!(gate.admit(pos("e1"), 5));
        assert!(!gate.admit(pos("e1"), 5));
        assert!(!gate.admit(pos("e1"), 3));
        assert!(gate.admit(pos("e1"), 6));
    }

    #[test]
    fn streams_are_independent() {
        let mut gate = SequenceGate::new();
        assert!(gate.admit(pos("e1"), 10));
        assert!(gate.admit(pos("e2"), 3));
        // Same id, different stream class: independent watermark.
        assert!(gate.admit(StreamKey::Voice("e1".into()), 1));
    }

    #[test]
    fn admission_wraps_at_counter_boundary() {
        let mut gate = SequenceGate::new();
        assert!(gate.admit(pos("e1"), u32::MAX - 1));
        assert!(gate.admit(pos("e1"), u32::MAX));
        // Wraps forward past zero.
        assert!(gate.admit(pos("e1"), 2));
        // Now u32::MAX is half a range behind, not ahead.
        assert!(!gate.admit(pos("e1"), u32::MAX));
    }

    #[test]
    fn half_range_jump_rejected() {
        let mut gate = SequenceGate::new();
        assert!(gate.admit(pos("e1"), 100));
        assert!(!gate.admit(pos("e1"), 100 + HALF_RANGE));
        assert!(gate.admit(pos("e1"), 99 + HALF_RANGE));
    }

    #[test]
    fn forget_resets_watermark() {
        let mut gate = SequenceGate::new();
        assert!(gate.admit(pos("e1"), 50));
        gate.forget(&pos("e1"));
        assert!(gate.admit(pos("e1"), 1));
    }
}
