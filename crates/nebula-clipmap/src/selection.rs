//! Budgeted per-level probe selection.
//!
//! A level scan visits every local coordinate once and keeps only the best
//! `take` candidates in a small sorted list, ordered by
//! `(state priority, squared distance to camera, linear local index)`.
//! The last key is unique per slot, so the order is total and the output is
//! fully deterministic.

use glam::{I64Vec3, IVec3};

use crate::level::ClipmapLevel;
use crate::topology::{linear_index, local_to_storage};

/// A probe selected for re-trace this cycle.
///
/// Produced by the scheduler, consumed by the trace backend, and handed back
/// unchanged in the matching completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UpdateRequest {
    pub level: u32,
    /// Grid coordinate relative to the level's current minimum corner.
    pub local_index: IVec3,
    /// Physical coordinate in the level's storage arena.
    pub storage_index: IVec3,
    /// Linear form of `storage_index`.
    pub storage_linear_index: usize,
}

/// Ordering key of a selection candidate. Field order is comparison order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SelectionKey {
    pub priority: u8,
    pub distance_sq: u128,
    pub linear_local: usize,
}

/// Fixed-capacity list of the smallest keys seen so far, kept sorted.
#[derive(Clone, Debug)]
pub struct BoundedBestList<K, V> {
    capacity: usize,
    entries: Vec<(K, V)>,
}

impl<K: Ord, V> BoundedBestList<K, V> {
    /// Create an empty list holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Offer a candidate. Returns `true` if it was kept.
    pub fn offer(&mut self, key: K, value: V) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if self.entries.len() == self.capacity
            && let Some((worst, _)) = self.entries.last()
            && key >= *worst
        {
            return false;
        }
        let pos = self.entries.partition_point(|(k, _)| *k <= key);
        self.entries.insert(pos, (key, value));
        if self.entries.len() > self.capacity {
            self.entries.pop();
        }
        true
    }

    /// Number of entries kept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Worst key currently kept.
    #[must_use]
    pub fn worst(&self) -> Option<&K> {
        self.entries.last().map(|(k, _)| k)
    }

    /// Consume the list, yielding entries best first.
    pub fn into_sorted(self) -> impl Iterator<Item = (K, V)> {
        self.entries.into_iter()
    }
}

/// Select up to `take` probes from one level and move them in flight.
///
/// Staleness promotion must already have run. Selected requests are appended
/// to `out` in priority order; the count is returned.
pub(crate) fn select_level(
    level_index: u32,
    level: &mut ClipmapLevel,
    camera_cell: I64Vec3,
    take: usize,
    out: &mut Vec<UpdateRequest>,
) -> usize {
    if take == 0 {
        return 0;
    }

    let resolution = level.resolution();
    let ring_offset = level.ring_offset();
    let edge = resolution as i32;
    let mut best = BoundedBestList::new(take);

    for z in 0..edge {
        for y in 0..edge {
            for x in 0..edge {
                let local = IVec3::new(x, y, z);
                let storage = local_to_storage(local, ring_offset, resolution);
                let storage_linear = linear_index(storage, resolution);
                let Some(priority) = level
                    .state(storage_linear)
                    .and_then(|state| state.selection_priority())
                else {
                    continue;
                };

                let key = SelectionKey {
                    priority,
                    distance_sq: cell_distance_sq(local, camera_cell),
                    linear_local: linear_index(local, resolution),
                };
                best.offer(key, (local, storage, storage_linear));
            }
        }
    }

    let selected = best.len();
    for (_, (local, storage, storage_linear)) in best.into_sorted() {
        level.begin_flight(storage_linear);
        out.push(UpdateRequest {
            level: level_index,
            local_index: local,
            storage_index: storage,
            storage_linear_index: storage_linear,
        });
    }
    selected
}

/// Squared distance between a grid cell and the camera cell.
///
/// Each axis difference fits in `u64`, so its square fits in `u128`; the sum
/// saturates for cameras near the `i64` bounds.
fn cell_distance_sq(local: IVec3, camera_cell: I64Vec3) -> u128 {
    let local = local.as_i64vec3();
    [
        local.x.abs_diff(camera_cell.x),
        local.y.abs_diff(camera_cell.y),
        local.z.abs_diff(camera_cell.z),
    ]
    .into_iter()
    .map(|d| u128::from(d) * u128::from(d))
    .fold(0, u128::saturating_add)
}
