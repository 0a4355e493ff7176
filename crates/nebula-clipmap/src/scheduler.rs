//! World-probe clipmap scheduler.
//!
//! Owns the lifecycle of every world probe and decides, each frame, which of
//! them to re-trace under a per-level and a global budget. Tracing happens
//! elsewhere; results come back through [`WorldProbeScheduler::complete`],
//! possibly several frames later.

use glam::{I64Vec3, IVec3, Vec3};
use tracing::{debug, trace};

use crate::error::ClipmapError;
use crate::events::{AnchorShiftEvent, ShiftListeners, SubscriptionId};
use crate::level::{ClipmapLevel, LevelPlacement, LevelStats, ProbeState};
use crate::selection::{UpdateRequest, select_level};
use crate::topology::{
    advance_ring, anchor_delta, exceeds_grid, level_spacing, linear_index, local_to_cell_i64,
    local_to_index_floor, local_to_storage, origin_min_corner, snap_anchor, world_to_local,
};

/// Default per-probe upload estimate: an 8×8 RGBA16F atlas tile plus
/// 64 bytes of irradiance coefficients.
pub const DEFAULT_ESTIMATED_BYTES_PER_PROBE: u64 = 8 * 8 * 8 + 64;

/// Upper bound on [`SchedulerConfig::level_count`]; level 31 is already
/// `2^31` times coarser than level 0.
pub const MAX_LEVEL_COUNT: u32 = 32;

/// Static scheduler parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// Probes per axis on every level.
    pub resolution: u32,
    /// Number of clipmap levels.
    pub level_count: u32,
    /// Age in frames after which a valid probe becomes stale, per level.
    pub stale_after_frames: Vec<u64>,
    /// Upload size assumed for one probe when converting the byte budget.
    pub estimated_bytes_per_probe: u64,
}

impl SchedulerConfig {
    /// Config with the same staleness threshold on every level.
    #[must_use]
    pub fn uniform(resolution: u32, level_count: u32, stale_after_frames: u64) -> Self {
        Self {
            resolution,
            level_count,
            stale_after_frames: vec![stale_after_frames; level_count as usize],
            estimated_bytes_per_probe: DEFAULT_ESTIMATED_BYTES_PER_PROBE,
        }
    }

    fn validate(&self) -> Result<(), ClipmapError> {
        if self.resolution == 0 {
            return Err(ClipmapError::InvalidResolution(self.resolution));
        }
        if self.level_count == 0 {
            return Err(ClipmapError::InvalidLevelCount(self.level_count));
        }
        if self.level_count > MAX_LEVEL_COUNT {
            return Err(ClipmapError::TooManyLevels {
                level_count: self.level_count,
                max: MAX_LEVEL_COUNT,
            });
        }
        if self.stale_after_frames.len() < self.level_count as usize {
            return Err(ClipmapError::UndersizedArray {
                what: "stale_after_frames",
                actual: self.stale_after_frames.len(),
                expected: self.level_count as usize,
            });
        }
        if self.estimated_bytes_per_probe == 0 {
            return Err(ClipmapError::InvalidUploadEstimate);
        }
        Ok(())
    }
}

/// Budgets for one call to [`WorldProbeScheduler::build_update_list`].
#[derive(Clone, Copy, Debug)]
pub struct UpdateBudget<'a> {
    /// Maximum probes per level; must cover every level.
    pub per_level: &'a [u32],
    /// Maximum probes across all levels.
    pub global_cpu: u32,
    /// Maximum estimated upload bytes across all levels.
    pub global_upload_bytes: u64,
}

/// Per-level slot counts, see [`WorldProbeScheduler::stats`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClipmapStats {
    pub levels: Vec<LevelStats>,
}

impl ClipmapStats {
    /// Sum over all levels.
    #[must_use]
    pub fn combined(&self) -> LevelStats {
        self.levels
            .iter()
            .fold(LevelStats::default(), |acc, s| LevelStats {
                uninitialized: acc.uninitialized + s.uninitialized,
                dirty: acc.dirty + s.dirty,
                in_flight: acc.in_flight + s.in_flight,
                valid: acc.valid + s.valid,
                stale: acc.stale + s.stale,
                deferred_dirty: acc.deferred_dirty + s.deferred_dirty,
            })
    }
}

/// Incremental, budgeted scheduler for a multi-level world-probe clipmap.
///
/// Must be driven from a single owner thread; completions produced elsewhere
/// have to be funneled back before calling [`complete`](Self::complete).
#[derive(Debug)]
pub struct WorldProbeScheduler {
    config: SchedulerConfig,
    levels: Vec<ClipmapLevel>,
    listeners: ShiftListeners,
}

impl WorldProbeScheduler {
    /// Create a scheduler with every level unplaced.
    pub fn new(config: SchedulerConfig) -> Result<Self, ClipmapError> {
        config.validate()?;
        let levels = (0..config.level_count)
            .map(|_| ClipmapLevel::new(config.resolution))
            .collect();
        Ok(Self {
            config,
            levels,
            listeners: ShiftListeners::new(),
        })
    }

    /// Scheduler parameters.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Probes per axis on every level.
    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.config.resolution
    }

    /// Number of levels.
    #[must_use]
    pub fn level_count(&self) -> u32 {
        self.config.level_count
    }

    /// Read access to one level.
    pub fn level(&self, level: u32) -> Result<&ClipmapLevel, ClipmapError> {
        self.check_level(level)?;
        Ok(&self.levels[level as usize])
    }

    /// Lifecycle state of a storage slot.
    pub fn slot_state(
        &self,
        level: u32,
        storage_linear: usize,
    ) -> Result<ProbeState, ClipmapError> {
        let lvl = self.level(level)?;
        lvl.state(storage_linear)
            .ok_or(ClipmapError::SlotOutOfRange {
                level,
                index: storage_linear,
                probes: lvl.probe_count(),
            })
    }

    /// Slot counts for every level.
    #[must_use]
    pub fn stats(&self) -> ClipmapStats {
        ClipmapStats {
            levels: self.levels.iter().map(ClipmapLevel::stats).collect(),
        }
    }

    /// Register an anchor-shift listener.
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&AnchorShiftEvent) + 'static,
    ) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    /// Remove an anchor-shift listener. Returns `true` if it was registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Slide every level's grid to follow the camera.
    ///
    /// Returns `true` if at least one already-placed level shifted. First-time
    /// placement of a level is not a shift and raises no event.
    pub fn update_origins(
        &mut self,
        camera_pos: Vec3,
        base_spacing: f32,
    ) -> Result<bool, ClipmapError> {
        check_spacing(base_spacing)?;
        check_position(camera_pos)?;

        let resolution = self.config.resolution;
        let mut shifted = false;
        for index in 0..self.levels.len() {
            let level_idx = index as u32;
            let spacing = level_spacing(base_spacing, level_idx);
            let anchor = snap_anchor(camera_pos, spacing);
            let origin = origin_min_corner(anchor, spacing, resolution);
            let level = &mut self.levels[index];

            let Some(prev) = level.placement().copied() else {
                level.reset_uninitialized();
                level.place(LevelPlacement {
                    anchor,
                    origin_min_corner: origin,
                    spacing,
                });
                debug!(level = level_idx, ?anchor, spacing, "placed clipmap level");
                continue;
            };

            let delta = anchor_delta(prev.anchor, anchor, spacing);
            if delta == I64Vec3::ZERO {
                continue;
            }

            let prev_ring = level.ring_offset();
            let new_ring = advance_ring(prev_ring, delta, resolution);
            level.place(LevelPlacement {
                anchor,
                origin_min_corner: origin,
                spacing,
            });
            level.set_ring_offset(new_ring);

            let teleport = exceeds_grid(delta, resolution);
            if teleport {
                level.mark_all_dirty();
            } else {
                // Every axis is below the resolution here, so it fits in i32.
                mark_exposed_slabs(level, delta.as_ivec3());
            }
            debug!(
                level = level_idx,
                ?delta,
                ?new_ring,
                teleport,
                "clipmap anchor shifted"
            );

            let event = AnchorShiftEvent {
                level: level_idx,
                prev_anchor: prev.anchor,
                new_anchor: anchor,
                delta_probes: delta,
                spacing,
                prev_origin_min_corner: prev.origin_min_corner,
                new_origin_min_corner: origin,
                prev_ring_offset: prev_ring,
                new_ring_offset: new_ring,
            };
            self.listeners.notify(&event);
            shifted = true;
        }
        Ok(shifted)
    }

    /// Choose this frame's probes to re-trace and move them in flight.
    ///
    /// Levels are visited in ascending order; each takes at most its own
    /// budget and whatever remains of the global budget. Levels that have
    /// never been placed are skipped.
    pub fn build_update_list(
        &mut self,
        frame_index: u64,
        camera_pos: Vec3,
        base_spacing: f32,
        budget: &UpdateBudget<'_>,
    ) -> Result<Vec<UpdateRequest>, ClipmapError> {
        check_spacing(base_spacing)?;
        check_position(camera_pos)?;
        if budget.per_level.len() < self.levels.len() {
            return Err(ClipmapError::UndersizedArray {
                what: "per_level budgets",
                actual: budget.per_level.len(),
                expected: self.levels.len(),
            });
        }

        let upload_probes = budget.global_upload_bytes / self.config.estimated_bytes_per_probe;
        let mut remaining = u64::from(budget.global_cpu).min(upload_probes) as usize;
        let mut requests = Vec::with_capacity(remaining);

        for (index, level) in self.levels.iter_mut().enumerate() {
            if remaining == 0 {
                break;
            }
            let take = (budget.per_level[index] as usize).min(remaining);
            if take == 0 {
                continue;
            }
            let Some(placement) = level.placement().copied() else {
                continue;
            };

            let stale_after = self.config.stale_after_frames[index];
            let promoted = level.promote_stale(frame_index, stale_after);
            let spacing = level_spacing(base_spacing, index as u32);
            let camera_cell = local_to_cell_i64(world_to_local(
                camera_pos,
                placement.origin_min_corner,
                spacing,
            ));
            let taken = select_level(index as u32, level, camera_cell, take, &mut requests);
            trace!(level = index, promoted, take, taken, "level selection");
            remaining -= taken;
        }

        debug!(frame_index, selected = requests.len(), "built probe update list");
        Ok(requests)
    }

    /// Resolve a request previously returned by
    /// [`build_update_list`](Self::build_update_list).
    pub fn complete(
        &mut self,
        request: &UpdateRequest,
        frame_index: u64,
        success: bool,
    ) -> Result<ProbeState, ClipmapError> {
        self.check_level(request.level)?;
        let level = &mut self.levels[request.level as usize];
        let index = request.storage_linear_index;
        match level.state(index) {
            None => Err(ClipmapError::SlotOutOfRange {
                level: request.level,
                index,
                probes: level.probe_count(),
            }),
            Some(ProbeState::InFlight) => Ok(level.resolve(index, frame_index, success)),
            Some(_) => Err(ClipmapError::NotInFlight {
                level: request.level,
                index,
            }),
        }
    }

    /// Invalidate every probe of `level` inside a world-space box.
    ///
    /// Returns the number of slots covered.
    pub fn mark_dirty_world_aabb(
        &mut self,
        level: u32,
        min_world: Vec3,
        max_world: Vec3,
        base_spacing: f32,
    ) -> Result<usize, ClipmapError> {
        self.check_level(level)?;
        check_spacing(base_spacing)?;
        check_position(min_world)?;
        check_position(max_world)?;

        let resolution = self.config.resolution;
        let lvl = &mut self.levels[level as usize];
        let Some(placement) = lvl.placement().copied() else {
            return Ok(0);
        };

        let spacing = level_spacing(base_spacing, level);
        let lo_world = min_world.min(max_world);
        let hi_world = min_world.max(max_world);
        let edge = IVec3::splat(resolution as i32 - 1);
        let origin = placement.origin_min_corner;
        let lo = local_to_index_floor(world_to_local(lo_world, origin, spacing));
        let hi = local_to_index_floor(world_to_local(hi_world, origin, spacing));
        if hi.cmplt(IVec3::ZERO).any() || lo.cmpgt(edge).any() {
            return Ok(0);
        }
        let lo = lo.clamp(IVec3::ZERO, edge);
        let hi = hi.clamp(IVec3::ZERO, edge);

        let ring = lvl.ring_offset();
        let mut covered = 0;
        for z in lo.z..=hi.z {
            for y in lo.y..=hi.y {
                for x in lo.x..=hi.x {
                    let storage = local_to_storage(IVec3::new(x, y, z), ring, resolution);
                    lvl.mark_dirty(linear_index(storage, resolution));
                    covered += 1;
                }
            }
        }
        debug!(level, covered, "marked world AABB dirty");
        Ok(covered)
    }

    /// Mark every probe of every placed level dirty.
    pub fn invalidate_all(&mut self) {
        for level in self.levels.iter_mut().filter(|l| l.placement().is_some()) {
            level.mark_all_dirty();
        }
        debug!("invalidated all world probes");
    }

    fn check_level(&self, level: u32) -> Result<(), ClipmapError> {
        if level >= self.config.level_count {
            return Err(ClipmapError::LevelOutOfRange {
                level,
                level_count: self.config.level_count,
            });
        }
        Ok(())
    }
}

/// Mark the slabs uncovered by a shift of less than one grid width.
///
/// Positive delta exposes the high end of the axis, negative the low end.
/// Slots are addressed through the level's new ring offset.
fn mark_exposed_slabs(level: &mut ClipmapLevel, delta: IVec3) {
    let resolution = level.resolution();
    let edge = resolution as i32;
    let ring = level.ring_offset();
    for axis in 0..3 {
        let d = delta[axis];
        if d == 0 {
            continue;
        }
        let range = if d > 0 { edge - d..edge } else { 0..-d };
        for slab in range {
            for u in 0..edge {
                for v in 0..edge {
                    let mut local = IVec3::ZERO;
                    local[axis] = slab;
                    local[(axis + 1) % 3] = u;
                    local[(axis + 2) % 3] = v;
                    let storage = local_to_storage(local, ring, resolution);
                    level.mark_dirty(linear_index(storage, resolution));
                }
            }
        }
    }
}

fn check_spacing(spacing: f32) -> Result<(), ClipmapError> {
    if !spacing.is_finite() || spacing <= 0.0 {
        return Err(ClipmapError::InvalidSpacing(spacing));
    }
    Ok(())
}

fn check_position(pos: Vec3) -> Result<(), ClipmapError> {
    if !pos.is_finite() {
        return Err(ClipmapError::NonFinitePosition(pos.to_array()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;
    use std::rc::Rc;

    const BYTES: u64 = DEFAULT_ESTIMATED_BYTES_PER_PROBE;

    fn scheduler(resolution: u32, level_count: u32) -> WorldProbeScheduler {
        WorldProbeScheduler::new(SchedulerConfig::uniform(resolution, level_count, 30)).unwrap()
    }

    fn budget(per_level: &[u32], cpu: u32) -> UpdateBudget<'_> {
        UpdateBudget {
            per_level,
            global_cpu: cpu,
            global_upload_bytes: u64::from(cpu) * BYTES,
        }
    }

    fn record_events(s: &mut WorldProbeScheduler) -> Rc<RefCell<Vec<AnchorShiftEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        s.subscribe(move |e| sink.borrow_mut().push(e.clone()));
        events
    }

    #[test]
    fn test_first_placement_initializes_without_event() {
        let mut s = scheduler(4, 1);
        let events = record_events(&mut s);
        assert!(!s.update_origins(Vec3::ZERO, 2.0).unwrap());

        let level = s.level(0).unwrap();
        assert_eq!(level.anchor(), Some(Vec3::ZERO));
        assert_eq!(level.stats().uninitialized, 64);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_single_probe_shift_dirties_leading_slab() {
        let mut s = scheduler(4, 1);
        let events = record_events(&mut s);
        s.update_origins(Vec3::ZERO, 2.0).unwrap();
        assert!(s.update_origins(Vec3::new(2.0, 0.0, 0.0), 2.0).unwrap());

        let level = s.level(0).unwrap();
        assert_eq!(level.ring_offset(), IVec3::new(1, 0, 0));
        let stats = level.stats();
        assert_eq!(stats.dirty, 16);
        assert_eq!(stats.uninitialized, 48);

        // Local x = 3 maps to storage x = (3 + 1) mod 4 = 0.
        for linear in 0..64 {
            let storage = crate::topology::index_from_linear(linear, 4);
            let expected = if storage.x == 0 {
                ProbeState::Dirty
            } else {
                ProbeState::Uninitialized
            };
            assert_eq!(level.state(linear), Some(expected));
        }

        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].delta_probes, I64Vec3::new(1, 0, 0));
        assert_eq!(events[0].prev_ring_offset, IVec3::ZERO);
        assert_eq!(events[0].new_ring_offset, IVec3::new(1, 0, 0));
        assert_eq!(events[0].new_origin_min_corner, Vec3::new(-2.0, -4.0, -4.0));
    }

    #[test]
    fn test_negative_shift_dirties_low_slab() {
        let mut s = scheduler(4, 1);
        s.update_origins(Vec3::ZERO, 2.0).unwrap();
        s.update_origins(Vec3::new(0.0, -4.0, 0.0), 2.0).unwrap();

        let level = s.level(0).unwrap();
        assert_eq!(level.ring_offset(), IVec3::new(0, 2, 0));
        assert_eq!(level.stats().dirty, 32);
        // Local y in {0, 1} maps to storage y in {2, 3}.
        for linear in 0..64 {
            let storage = crate::topology::index_from_linear(linear, 4);
            let dirty = level.state(linear) == Some(ProbeState::Dirty);
            assert_eq!(dirty, storage.y >= 2);
        }
    }

    #[test]
    fn test_sub_spacing_motion_changes_nothing() {
        let mut s = scheduler(4, 2);
        let events = record_events(&mut s);
        s.update_origins(Vec3::ZERO, 2.0).unwrap();
        for pos in [
            Vec3::new(0.9, 0.0, 0.0),
            Vec3::new(-0.9, 0.9, -0.5),
            Vec3::new(0.2, -0.99, 0.99),
        ] {
            assert!(!s.update_origins(pos, 2.0).unwrap());
        }
        for level in 0..2 {
            assert_eq!(s.level(level).unwrap().ring_offset(), IVec3::ZERO);
        }
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_full_grid_shift_dirties_entire_level() {
        let mut s = scheduler(4, 1);
        let events = record_events(&mut s);
        s.update_origins(Vec3::ZERO, 2.0).unwrap();
        s.update_origins(Vec3::new(8.0, 0.0, 0.0), 2.0).unwrap();

        let level = s.level(0).unwrap();
        assert_eq!(level.stats().dirty, 64);
        assert_eq!(level.ring_offset(), IVec3::ZERO);
        let events = events.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].delta_probes, I64Vec3::new(4, 0, 0));
        assert!(events[0].is_teleport(4));
    }

    #[test]
    fn test_shift_and_reverse_restores_ring_offset() {
        let mut s = scheduler(4, 1);
        s.update_origins(Vec3::ZERO, 2.0).unwrap();
        s.update_origins(Vec3::new(6.0, 2.0, -4.0), 2.0).unwrap();
        assert_eq!(s.level(0).unwrap().ring_offset(), IVec3::new(3, 1, 2));
        s.update_origins(Vec3::ZERO, 2.0).unwrap();
        assert_eq!(s.level(0).unwrap().ring_offset(), IVec3::ZERO);
    }

    #[test]
    fn test_coarser_levels_shift_less_often() {
        let mut s = scheduler(4, 3);
        let events = record_events(&mut s);
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        s.update_origins(Vec3::new(1.0, 0.0, 0.0), 1.0).unwrap();
        let levels: Vec<u32> = events.borrow().iter().map(|e| e.level).collect();
        // Level 1 (spacing 2) snaps 1.0 to 2.0, level 2 (spacing 4) stays at 0.
        assert_eq!(levels, vec![0, 1]);
    }

    #[test]
    fn test_shift_defers_dirtying_of_in_flight_slots() {
        let mut s = scheduler(2, 1);
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        let requests = s
            .build_update_list(0, Vec3::ZERO, 1.0, &budget(&[8], 8))
            .unwrap();
        assert_eq!(requests.len(), 8);

        s.update_origins(Vec3::new(1.0, 0.0, 0.0), 1.0).unwrap();
        let stats = s.level(0).unwrap().stats();
        assert_eq!(stats.in_flight, 8);
        assert_eq!(stats.deferred_dirty, 4);

        for request in &requests {
            let deferred = s.level(0).unwrap().is_deferred_dirty(request.storage_linear_index);
            let state = s.complete(request, 1, true).unwrap();
            let expected = if deferred {
                ProbeState::Dirty
            } else {
                ProbeState::Valid
            };
            assert_eq!(state, expected);
        }
        assert_eq!(s.level(0).unwrap().stats().dirty, 4);
    }

    #[test]
    fn test_selection_starts_at_camera_cell() {
        let mut s = scheduler(4, 1);
        s.update_origins(Vec3::ZERO, 2.0).unwrap();
        let requests = s
            .build_update_list(0, Vec3::ZERO, 2.0, &budget(&[7], 7))
            .unwrap();
        assert_eq!(requests[0].local_index, IVec3::splat(2));
        // Six face neighbours at distance 1, ordered by linear local index.
        let next: Vec<IVec3> = requests[1..].iter().map(|r| r.local_index).collect();
        assert_eq!(
            next,
            vec![
                IVec3::new(2, 2, 1),
                IVec3::new(2, 1, 2),
                IVec3::new(1, 2, 2),
                IVec3::new(3, 2, 2),
                IVec3::new(2, 3, 2),
                IVec3::new(2, 2, 3),
            ]
        );
    }

    #[test]
    fn test_identical_state_produces_identical_lists() {
        let run = || {
            let mut s = scheduler(6, 2);
            s.update_origins(Vec3::new(3.3, -1.2, 7.7), 1.5).unwrap();
            s.update_origins(Vec3::new(5.0, -1.0, 6.0), 1.5).unwrap();
            let first = s
                .build_update_list(3, Vec3::new(5.0, -1.0, 6.0), 1.5, &budget(&[20, 20], 30))
                .unwrap();
            for r in first.iter().step_by(3) {
                s.complete(r, 3, true).unwrap();
            }
            s.build_update_list(4, Vec3::new(5.0, -1.0, 6.0), 1.5, &budget(&[20, 20], 30))
                .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_no_slot_selected_twice_and_all_in_flight() {
        let mut s = scheduler(4, 2);
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        let mut seen = HashSet::new();
        for frame in 0..3 {
            let requests = s
                .build_update_list(frame, Vec3::ZERO, 1.0, &budget(&[40, 40], 50))
                .unwrap();
            for r in &requests {
                assert!(seen.insert((r.level, r.storage_linear_index)));
                assert_eq!(
                    s.slot_state(r.level, r.storage_linear_index).unwrap(),
                    ProbeState::InFlight
                );
            }
        }
        assert_eq!(seen.len(), 128);
    }

    #[test]
    fn test_global_budget_caps_total_and_fills_levels_in_order() {
        let mut s = scheduler(4, 2);
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        let requests = s
            .build_update_list(
                0,
                Vec3::ZERO,
                1.0,
                &UpdateBudget {
                    per_level: &[10, 10],
                    global_cpu: 15,
                    global_upload_bytes: 12 * BYTES + BYTES - 1,
                },
            )
            .unwrap();
        assert_eq!(requests.len(), 12);
        assert!(requests[..10].iter().all(|r| r.level == 0));
        assert!(requests[10..].iter().all(|r| r.level == 1));
    }

    #[test]
    fn test_per_level_budgets_bound_total() {
        let mut s = scheduler(4, 3);
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        let requests = s
            .build_update_list(
                0,
                Vec3::ZERO,
                1.0,
                &UpdateBudget {
                    per_level: &[3, 0, 2],
                    global_cpu: 100,
                    global_upload_bytes: u64::MAX,
                },
            )
            .unwrap();
        let levels: Vec<u32> = requests.iter().map(|r| r.level).collect();
        assert_eq!(levels, vec![0, 0, 0, 2, 2]);
    }

    #[test]
    fn test_zero_upload_budget_selects_nothing() {
        let mut s = scheduler(4, 1);
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        let requests = s
            .build_update_list(
                0,
                Vec3::ZERO,
                1.0,
                &UpdateBudget {
                    per_level: &[10],
                    global_cpu: 10,
                    global_upload_bytes: BYTES - 1,
                },
            )
            .unwrap();
        assert!(requests.is_empty());
        assert_eq!(s.level(0).unwrap().stats().in_flight, 0);
    }

    #[test]
    fn test_unplaced_levels_are_skipped() {
        let mut s = scheduler(4, 1);
        let requests = s
            .build_update_list(0, Vec3::ZERO, 1.0, &budget(&[10], 10))
            .unwrap();
        assert!(requests.is_empty());
    }

    #[test]
    fn test_complete_success_and_failure() {
        let mut s = scheduler(4, 1);
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        let requests = s
            .build_update_list(0, Vec3::ZERO, 1.0, &budget(&[2], 2))
            .unwrap();

        assert_eq!(s.complete(&requests[0], 42, true).unwrap(), ProbeState::Valid);
        let level = s.level(0).unwrap();
        assert_eq!(level.last_updated_frame(requests[0].storage_linear_index), Some(42));

        assert_eq!(s.complete(&requests[1], 42, false).unwrap(), ProbeState::Dirty);
        let retry = s
            .build_update_list(1, Vec3::ZERO, 1.0, &budget(&[1], 1))
            .unwrap();
        assert_eq!(retry[0].storage_linear_index, requests[1].storage_linear_index);
    }

    #[test]
    fn test_complete_rejects_slot_not_in_flight() {
        let mut s = scheduler(4, 1);
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        let requests = s
            .build_update_list(0, Vec3::ZERO, 1.0, &budget(&[1], 1))
            .unwrap();
        s.complete(&requests[0], 1, true).unwrap();
        let err = s.complete(&requests[0], 2, false).unwrap_err();
        assert!(matches!(err, ClipmapError::NotInFlight { level: 0, .. }));
        assert_eq!(
            s.slot_state(0, requests[0].storage_linear_index).unwrap(),
            ProbeState::Valid
        );
    }

    #[test]
    fn test_complete_rejects_out_of_range_request() {
        let mut s = scheduler(2, 1);
        let bad_level = UpdateRequest {
            level: 3,
            local_index: IVec3::ZERO,
            storage_index: IVec3::ZERO,
            storage_linear_index: 0,
        };
        assert!(matches!(
            s.complete(&bad_level, 0, true),
            Err(ClipmapError::LevelOutOfRange { level: 3, .. })
        ));
        let bad_slot = UpdateRequest {
            level: 0,
            storage_linear_index: 8,
            ..bad_level
        };
        assert!(matches!(
            s.complete(&bad_slot, 0, true),
            Err(ClipmapError::SlotOutOfRange { index: 8, .. })
        ));
    }

    #[test]
    fn test_stale_probes_are_reselected_after_threshold() {
        let mut s = WorldProbeScheduler::new(SchedulerConfig::uniform(2, 1, 5)).unwrap();
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        let requests = s
            .build_update_list(0, Vec3::ZERO, 1.0, &budget(&[8], 8))
            .unwrap();
        for r in &requests {
            s.complete(r, 0, true).unwrap();
        }

        let early = s
            .build_update_list(4, Vec3::ZERO, 1.0, &budget(&[8], 8))
            .unwrap();
        assert!(early.is_empty());
        assert_eq!(s.level(0).unwrap().stats().valid, 8);

        let late = s
            .build_update_list(5, Vec3::ZERO, 1.0, &budget(&[8], 8))
            .unwrap();
        assert_eq!(late.len(), 8);
    }

    #[test]
    fn test_aabb_marks_covered_slots_and_defers_in_flight() {
        let mut s = scheduler(4, 1);
        s.update_origins(Vec3::ZERO, 2.0).unwrap();
        let requests = s
            .build_update_list(0, Vec3::ZERO, 2.0, &budget(&[1], 1))
            .unwrap();
        let target = requests[0];
        assert_eq!(target.local_index, IVec3::splat(2));

        // Local 2..=3 on every axis: world [0, 2] with origin -4 and spacing 2.
        let covered = s
            .mark_dirty_world_aabb(0, Vec3::ZERO, Vec3::splat(2.0), 2.0)
            .unwrap();
        assert_eq!(covered, 8);
        let stats = s.level(0).unwrap().stats();
        assert_eq!(stats.dirty, 7);
        assert_eq!(stats.deferred_dirty, 1);

        assert_eq!(s.complete(&target, 1, true).unwrap(), ProbeState::Dirty);
    }

    #[test]
    fn test_aabb_outside_grid_marks_nothing() {
        let mut s = scheduler(4, 1);
        s.update_origins(Vec3::ZERO, 2.0).unwrap();
        let covered = s
            .mark_dirty_world_aabb(0, Vec3::splat(100.0), Vec3::splat(120.0), 2.0)
            .unwrap();
        assert_eq!(covered, 0);
        assert_eq!(s.level(0).unwrap().stats().dirty, 0);
    }

    #[test]
    fn test_aabb_is_clamped_to_grid() {
        let mut s = scheduler(4, 1);
        s.update_origins(Vec3::ZERO, 2.0).unwrap();
        let covered = s
            .mark_dirty_world_aabb(0, Vec3::splat(-100.0), Vec3::splat(100.0), 2.0)
            .unwrap();
        assert_eq!(covered, 64);
    }

    #[test]
    fn test_invalidate_all_only_touches_placed_levels() {
        let mut s = scheduler(2, 2);
        s.invalidate_all();
        assert_eq!(s.stats().combined().dirty, 0);
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        s.invalidate_all();
        assert_eq!(s.stats().combined().dirty, 16);
    }

    #[test]
    fn test_invalid_arguments_fail_without_mutation() {
        assert!(matches!(
            WorldProbeScheduler::new(SchedulerConfig::uniform(0, 1, 1)),
            Err(ClipmapError::InvalidResolution(0))
        ));
        assert!(matches!(
            WorldProbeScheduler::new(SchedulerConfig::uniform(4, 0, 1)),
            Err(ClipmapError::InvalidLevelCount(0))
        ));
        assert!(matches!(
            WorldProbeScheduler::new(SchedulerConfig::uniform(1, 33, 1)),
            Err(ClipmapError::TooManyLevels {
                level_count: 33,
                max: MAX_LEVEL_COUNT
            })
        ));
        assert!(WorldProbeScheduler::new(SchedulerConfig::uniform(1, MAX_LEVEL_COUNT, 1)).is_ok());

        let mut s = scheduler(4, 2);
        assert!(matches!(
            s.update_origins(Vec3::ZERO, 0.0),
            Err(ClipmapError::InvalidSpacing(_))
        ));
        assert!(matches!(
            s.update_origins(Vec3::new(f32::NAN, 0.0, 0.0), 1.0),
            Err(ClipmapError::NonFinitePosition(_))
        ));
        assert!(s.level(0).unwrap().anchor().is_none());

        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        assert!(matches!(
            s.build_update_list(0, Vec3::ZERO, 1.0, &budget(&[4], 4)),
            Err(ClipmapError::UndersizedArray { expected: 2, .. })
        ));
        assert!(matches!(
            s.mark_dirty_world_aabb(2, Vec3::ZERO, Vec3::ONE, 1.0),
            Err(ClipmapError::LevelOutOfRange { level: 2, .. })
        ));
        assert_eq!(s.stats().combined().in_flight, 0);
        assert_eq!(s.stats().combined().dirty, 0);
    }

    #[test]
    fn test_far_teleport_and_back_keeps_ring_consistent() {
        let mut s = scheduler(4, 1);
        let events = record_events(&mut s);
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        s.update_origins(Vec3::new(1.0, 0.0, 0.0), 1.0).unwrap();
        assert_eq!(s.level(0).unwrap().ring_offset(), IVec3::new(1, 0, 0));

        let far = Vec3::new(1.0e10, 0.0, 0.0);
        assert!(s.update_origins(far, 1.0).unwrap());
        let level = s.level(0).unwrap();
        assert_eq!(level.stats().dirty, 64);
        let ring = level.ring_offset();
        assert!(ring.cmpge(IVec3::ZERO).all() && ring.cmplt(IVec3::splat(4)).all());

        assert!(s.update_origins(Vec3::new(1.0, 0.0, 0.0), 1.0).unwrap());
        assert_eq!(s.level(0).unwrap().ring_offset(), IVec3::new(1, 0, 0));

        let events = events.borrow();
        assert_eq!(events.len(), 3);
        assert!(events[1].is_teleport(4));
        assert!(events[2].is_teleport(4));
        assert_eq!(events[1].delta_probes.x, -events[2].delta_probes.x);
    }

    #[test]
    fn test_extreme_camera_jump_saturates() {
        let mut s = scheduler(4, 2);
        let events = record_events(&mut s);
        s.update_origins(Vec3::new(3.0e38, 0.0, 0.0), 1.0).unwrap();
        s.update_origins(Vec3::new(-3.0e38, 0.0, 0.0), 1.0).unwrap();
        s.update_origins(Vec3::new(3.0e38, 0.0, 0.0), 1.0).unwrap();

        let events = events.borrow();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].delta_probes.x, i64::MIN);
        assert_eq!(events[2].delta_probes.x, i64::MAX);
        assert!(events.iter().all(|e| e.is_teleport(4)));
        for level in 0..2 {
            let ring = s.level(level).unwrap().ring_offset();
            assert!(ring.cmpge(IVec3::ZERO).all() && ring.cmplt(IVec3::splat(4)).all());
        }
    }

    #[test]
    fn test_far_camera_selects_nearest_face_of_grid() {
        let mut s = scheduler(4, 1);
        s.update_origins(Vec3::ZERO, 1.0).unwrap();
        let requests = s
            .build_update_list(0, Vec3::new(-1.0e10, 0.0, 0.0), 1.0, &budget(&[4], 4))
            .unwrap();
        assert_eq!(requests.len(), 4);
        assert!(requests.iter().all(|r| r.local_index.x == 0));

        let requests = s
            .build_update_list(1, Vec3::new(3.0e38, -3.0e38, 0.0), 1.0, &budget(&[4], 4))
            .unwrap();
        assert_eq!(requests.len(), 4);
        assert_eq!(s.stats().combined().in_flight, 8);
    }
}
