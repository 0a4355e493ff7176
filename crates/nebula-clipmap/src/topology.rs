//! Clipmap topology: pure functions placing a level's probe grid in world space.
//!
//! Every level is a cube of `resolution³` probes. Level `n` uses a spacing of
//! `base_spacing * 2^n`, so each level covers eight times the volume of the one
//! below it. The grid is anchored on a snapped camera position and its storage
//! is addressed toroidally through a ring offset (see [`wrap_index3`]).

use glam::{I64Vec3, IVec3, Vec3};

/// Probe spacing for a clipmap level (geometric falloff by level index).
#[must_use]
pub fn level_spacing(base_spacing: f32, level: u32) -> f32 {
    base_spacing * 2.0_f32.powi(i32::try_from(level).unwrap_or(i32::MAX))
}

/// Snap a world position to the nearest multiple of `spacing` on every axis.
#[must_use]
pub fn snap_anchor(pos: Vec3, spacing: f32) -> Vec3 {
    (pos / spacing).round() * spacing
}

/// World-space position of the minimum corner of a level's grid.
///
/// The anchor sits on probe `resolution / 2`, so the corner stays on a
/// multiple of `spacing` whenever the anchor does.
#[must_use]
pub fn origin_min_corner(anchor: Vec3, spacing: f32, resolution: u32) -> Vec3 {
    anchor - Vec3::splat((resolution / 2) as f32 * spacing)
}

/// Convert a world position into continuous grid coordinates of a level.
#[must_use]
pub fn world_to_local(pos: Vec3, origin: Vec3, spacing: f32) -> Vec3 {
    (pos - origin) / spacing
}

/// Convert grid coordinates back into world space.
#[must_use]
pub fn local_to_world(local: IVec3, origin: Vec3, spacing: f32) -> Vec3 {
    origin + local.as_vec3() * spacing
}

/// Integer cell containing a continuous local coordinate.
#[must_use]
pub fn local_to_index_floor(local: Vec3) -> IVec3 {
    local.floor().as_ivec3()
}

/// Cell containing a continuous local coordinate, without an `i32` range limit.
///
/// Camera positions far outside a level saturate at the `i64` bounds instead
/// of wrapping.
#[must_use]
pub fn local_to_cell_i64(local: Vec3) -> I64Vec3 {
    local.floor().as_i64vec3()
}

/// Whole-probe shift between two snapped anchors of a level.
#[must_use]
pub fn anchor_delta(prev_anchor: Vec3, new_anchor: Vec3, spacing: f32) -> I64Vec3 {
    ((new_anchor - prev_anchor) / spacing).round().as_i64vec3()
}

/// Whether a shift of `delta` probes moves past the whole grid on some axis.
#[must_use]
pub fn exceeds_grid(delta: I64Vec3, resolution: u32) -> bool {
    delta
        .to_array()
        .iter()
        .any(|d| d.unsigned_abs() >= u64::from(resolution))
}

/// Ring offset after sliding the grid by `delta` probes. `delta` may be
/// arbitrarily large; only its residue modulo `resolution` matters.
#[must_use]
pub fn advance_ring(ring_offset: IVec3, delta: I64Vec3, resolution: u32) -> IVec3 {
    let res = i64::from(resolution);
    let step = IVec3::new(
        delta.x.rem_euclid(res) as i32,
        delta.y.rem_euclid(res) as i32,
        delta.z.rem_euclid(res) as i32,
    );
    wrap_index3(wrap_index3(ring_offset, resolution) + step, resolution)
}

/// Wrap an index into `[0, resolution)`, handling negative values.
#[must_use]
pub fn wrap_index(index: i32, resolution: u32) -> i32 {
    index.rem_euclid(resolution as i32)
}

/// Component-wise [`wrap_index`].
#[must_use]
pub fn wrap_index3(index: IVec3, resolution: u32) -> IVec3 {
    IVec3::new(
        wrap_index(index.x, resolution),
        wrap_index(index.y, resolution),
        wrap_index(index.z, resolution),
    )
}

/// Linear storage index of an in-range grid coordinate (x fastest, then y, then z).
#[must_use]
pub fn linear_index(index: IVec3, resolution: u32) -> usize {
    let res = resolution as usize;
    index.x as usize + index.y as usize * res + index.z as usize * res * res
}

/// Inverse of [`linear_index`].
#[must_use]
pub fn index_from_linear(linear: usize, resolution: u32) -> IVec3 {
    let res = resolution as usize;
    IVec3::new(
        (linear % res) as i32,
        ((linear / res) % res) as i32,
        (linear / (res * res)) as i32,
    )
}

/// Map a local grid coordinate to its storage coordinate through the ring offset.
#[must_use]
pub fn local_to_storage(local: IVec3, ring_offset: IVec3, resolution: u32) -> IVec3 {
    wrap_index3(local + ring_offset, resolution)
}
