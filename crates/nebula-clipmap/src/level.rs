//! Per-level probe storage: lifecycle states addressed through a ring offset.

use glam::{IVec3, Vec3};

/// Lifecycle of one probe storage slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeState {
    /// Never traced since the level was placed.
    Uninitialized,
    /// Needs a retrace (newly exposed, invalidated, or a failed trace).
    Dirty,
    /// A trace request is outstanding.
    InFlight,
    /// Holds a result younger than the level's staleness threshold.
    Valid,
    /// Holds an aged result; selectable at lower priority than dirty slots.
    Stale,
}

impl ProbeState {
    /// Selection priority, lower is more urgent. `None` for slots that cannot be selected.
    #[must_use]
    pub fn selection_priority(self) -> Option<u8> {
        match self {
            Self::Uninitialized | Self::Dirty => Some(0),
            Self::Stale => Some(1),
            Self::InFlight | Self::Valid => None,
        }
    }
}

/// Placement of a level in world space, set by the first origin update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelPlacement {
    /// Snapped world position the grid is centered on.
    pub anchor: Vec3,
    /// World position of local coordinate `(0, 0, 0)`.
    pub origin_min_corner: Vec3,
    /// Spacing the placement was computed with.
    pub spacing: f32,
}

/// One resolution tier of the world-probe clipmap.
///
/// Storage is a fixed arena of `resolution³` slots. Camera movement never moves
/// slot contents; only the ring offset and the dirty marking change.
#[derive(Clone, Debug)]
pub struct ClipmapLevel {
    resolution: u32,
    placement: Option<LevelPlacement>,
    ring_offset: IVec3,
    lifecycle: Vec<ProbeState>,
    last_updated_frame: Vec<u64>,
    deferred_dirty: Vec<bool>,
}

impl ClipmapLevel {
    /// Create an unplaced level with every slot uninitialized.
    #[must_use]
    pub fn new(resolution: u32) -> Self {
        let probes = (resolution as usize).pow(3);
        Self {
            resolution,
            placement: None,
            ring_offset: IVec3::ZERO,
            lifecycle: vec![ProbeState::Uninitialized; probes],
            last_updated_frame: vec![0; probes],
            deferred_dirty: vec![false; probes],
        }
    }

    /// Edge length of the probe cube.
    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Number of storage slots (`resolution³`).
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.lifecycle.len()
    }

    /// World placement, `None` until the first origin update.
    #[must_use]
    pub fn placement(&self) -> Option<&LevelPlacement> {
        self.placement.as_ref()
    }

    /// Snapped anchor, `None` until the first origin update.
    #[must_use]
    pub fn anchor(&self) -> Option<Vec3> {
        self.placement.map(|p| p.anchor)
    }

    /// Current toroidal offset from local to storage coordinates.
    #[must_use]
    pub fn ring_offset(&self) -> IVec3 {
        self.ring_offset
    }

    /// Lifecycle state of a storage slot.
    #[must_use]
    pub fn state(&self, storage_linear: usize) -> Option<ProbeState> {
        self.lifecycle.get(storage_linear).copied()
    }

    /// Frame of the last successful trace of a storage slot.
    #[must_use]
    pub fn last_updated_frame(&self, storage_linear: usize) -> Option<u64> {
        self.last_updated_frame.get(storage_linear).copied()
    }

    /// Whether the slot was invalidated while its request was outstanding.
    #[must_use]
    pub fn is_deferred_dirty(&self, storage_linear: usize) -> bool {
        self.deferred_dirty
            .get(storage_linear)
            .copied()
            .unwrap_or(false)
    }

    /// Count slots per lifecycle state.
    #[must_use]
    pub fn stats(&self) -> LevelStats {
        let mut stats = LevelStats::default();
        for (state, deferred) in self.lifecycle.iter().zip(&self.deferred_dirty) {
            match state {
                ProbeState::Uninitialized => stats.uninitialized += 1,
                ProbeState::Dirty => stats.dirty += 1,
                ProbeState::InFlight => stats.in_flight += 1,
                ProbeState::Valid => stats.valid += 1,
                ProbeState::Stale => stats.stale += 1,
            }
            if *deferred {
                stats.deferred_dirty += 1;
            }
        }
        stats
    }

    pub(crate) fn place(&mut self, placement: LevelPlacement) {
        self.placement = Some(placement);
    }

    pub(crate) fn set_ring_offset(&mut self, ring_offset: IVec3) {
        debug_assert!(
            ring_offset.cmpge(IVec3::ZERO).all()
                && ring_offset.cmplt(IVec3::splat(self.resolution as i32)).all()
        );
        self.ring_offset = ring_offset;
    }

    /// First-time placement: forget every previous result.
    pub(crate) fn reset_uninitialized(&mut self) {
        self.ring_offset = IVec3::ZERO;
        self.lifecycle.fill(ProbeState::Uninitialized);
        self.last_updated_frame.fill(0);
        self.deferred_dirty.fill(false);
    }

    /// Mark one slot dirty. In-flight slots keep their state and are flagged so
    /// that the outstanding result is discarded on completion.
    pub(crate) fn mark_dirty(&mut self, storage_linear: usize) {
        match self.lifecycle[storage_linear] {
            ProbeState::InFlight => self.deferred_dirty[storage_linear] = true,
            _ => self.lifecycle[storage_linear] = ProbeState::Dirty,
        }
    }

    pub(crate) fn mark_all_dirty(&mut self) {
        for slot in 0..self.lifecycle.len() {
            self.mark_dirty(slot);
        }
    }

    /// Promote valid slots whose age reached `stale_after` frames.
    pub(crate) fn promote_stale(&mut self, frame_index: u64, stale_after: u64) -> usize {
        let mut promoted = 0;
        for (state, &last) in self.lifecycle.iter_mut().zip(&self.last_updated_frame) {
            if *state == ProbeState::Valid && frame_index.saturating_sub(last) >= stale_after {
                *state = ProbeState::Stale;
                promoted += 1;
            }
        }
        promoted
    }

    pub(crate) fn begin_flight(&mut self, storage_linear: usize) {
        self.lifecycle[storage_linear] = ProbeState::InFlight;
    }

    /// Resolve an outstanding request. Returns the resulting state.
    pub(crate) fn resolve(
        &mut self,
        storage_linear: usize,
        frame_index: u64,
        success: bool,
    ) -> ProbeState {
        let state = if std::mem::take(&mut self.deferred_dirty[storage_linear]) {
            ProbeState::Dirty
        } else if success {
            self.last_updated_frame[storage_linear] = frame_index;
            ProbeState::Valid
        } else {
            ProbeState::Dirty
        };
        self.lifecycle[storage_linear] = state;
        state
    }
}

/// Slot counts of one level, per lifecycle state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub uninitialized: usize,
    pub dirty: usize,
    pub in_flight: usize,
    pub valid: usize,
    pub stale: usize,
    /// In-flight slots whose result will be discarded.
    pub deferred_dirty: usize,
}

impl LevelStats {
    /// Total number of slots counted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.uninitialized + self.dirty + self.in_flight + self.valid + self.stale
    }

    /// Slots that are selectable right now (ignoring staleness promotion).
    #[must_use]
    pub fn pending(&self) -> usize {
        self.uninitialized + self.dirty + self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_level_is_uninitialized() {
        let level = ClipmapLevel::new(4);
        assert_eq!(level.probe_count(), 64);
        assert!(level.anchor().is_none());
        assert_eq!(level.stats().uninitialized, 64);
        assert_eq!(level.ring_offset(), IVec3::ZERO);
    }

    #[test]
    fn test_mark_dirty_defers_in_flight_slots() {
        let mut level = ClipmapLevel::new(2);
        level.begin_flight(3);
        level.mark_dirty(3);
        level.mark_dirty(4);
        assert_eq!(level.state(3), Some(ProbeState::InFlight));
        assert!(level.is_deferred_dirty(3));
        assert_eq!(level.state(4), Some(ProbeState::Dirty));
        assert!(!level.is_deferred_dirty(4));
    }

    #[test]
    fn test_resolve_success_records_frame() {
        let mut level = ClipmapLevel::new(2);
        level.begin_flight(0);
        assert_eq!(level.resolve(0, 17, true), ProbeState::Valid);
        assert_eq!(level.last_updated_frame(0), Some(17));
    }

    #[test]
    fn test_resolve_failure_returns_to_dirty() {
        let mut level = ClipmapLevel::new(2);
        level.begin_flight(1);
        assert_eq!(level.resolve(1, 5, false), ProbeState::Dirty);
        assert_eq!(level.last_updated_frame(1), Some(0));
    }

    #[test]
    fn test_resolve_with_deferred_flag_forces_dirty_and_clears_flag() {
        let mut level = ClipmapLevel::new(2);
        level.begin_flight(2);
        level.mark_dirty(2);
        assert_eq!(level.resolve(2, 9, true), ProbeState::Dirty);
        assert!(!level.is_deferred_dirty(2));
        assert_eq!(level.last_updated_frame(2), Some(0));
    }

    #[test]
    fn test_promote_stale_uses_age_threshold() {
        let mut level = ClipmapLevel::new(2);
        for slot in 0..2 {
            level.begin_flight(slot);
        }
        level.resolve(0, 10, true);
        level.resolve(1, 15, true);
        assert_eq!(level.promote_stale(20, 10), 1);
        assert_eq!(level.state(0), Some(ProbeState::Stale));
        assert_eq!(level.state(1), Some(ProbeState::Valid));
    }

    #[test]
    fn test_stats_count_every_slot_once() {
        let mut level = ClipmapLevel::new(3);
        level.mark_dirty(0);
        level.begin_flight(1);
        level.mark_dirty(1);
        let stats = level.stats();
        assert_eq!(stats.total(), 27);
        assert_eq!(stats.dirty, 1);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.deferred_dirty, 1);
        assert_eq!(stats.pending(), 26);
    }
}
