//! Uniform blocks published to the probe shaders each frame.
//!
//! Both blocks are sequences of little-endian 4-byte fields. The `#[repr(C)]`
//! structs mirror the layout for typed access; [`FrameUniforms::pack`] and
//! [`WorldProbeUniforms::pack`] write the fields explicitly so the byte order
//! does not depend on the host.

use nebula_clipmap::{SchedulerConfig, WorldProbeScheduler};

use crate::error::PackingError;

/// Number of clipmap levels the world-probe block has room for.
pub const MAX_CLIPMAP_LEVELS: usize = 4;

/// Size of the frame block in bytes.
pub const FRAME_BLOCK_SIZE: usize = 48;

/// Size of the world-probe header in bytes.
pub const WORLD_PROBE_HEADER_SIZE: usize = 16;

/// Size of one level record in the world-probe block.
pub const WORLD_PROBE_LEVEL_SIZE: usize = 32;

/// Size of the world-probe block in bytes.
pub const WORLD_PROBE_BLOCK_SIZE: usize =
    WORLD_PROBE_HEADER_SIZE + MAX_CLIPMAP_LEVELS * WORLD_PROBE_LEVEL_SIZE;

/// Per-frame screen-probe constants.
///
/// Layout (48 bytes):
///   - `[0..4]`   frame_index
///   - `[4..12]`  width, height
///   - `[12..16]` probe_spacing
///   - `[16..24]` probe_count_x, probe_count_y
///   - `[24..28]` atlas_tile_size
///   - `[28..32]` half_resolution (0 or 1)
///   - `[32..40]` jitter_x, jitter_y
///   - `[40..44]` temporal_blend
///   - `[44..48]` history_valid (0 or 1)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub frame_index: u32,
    pub width: u32,
    pub height: u32,
    pub probe_spacing: u32,
    pub probe_count_x: u32,
    pub probe_count_y: u32,
    pub atlas_tile_size: u32,
    pub half_resolution: u32,
    pub jitter_x: f32,
    pub jitter_y: f32,
    pub temporal_blend: f32,
    pub history_valid: u32,
}

static_assertions::assert_eq_size!(FrameUniforms, [u8; FRAME_BLOCK_SIZE]);

/// One clipmap level as seen by the shaders. All zero when the level is unused.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LevelUniforms {
    pub origin_min_corner: [f32; 3],
    pub spacing: f32,
    pub ring_offset: [i32; 3],
    /// 1 once the level has been placed.
    pub initialized: u32,
}

static_assertions::assert_eq_size!(LevelUniforms, [u8; WORLD_PROBE_LEVEL_SIZE]);

/// Clipmap placement and ring addressing for every level.
///
/// Layout (144 bytes): a 16-byte header (`level_count`, `resolution`,
/// `base_spacing`, `estimated_bytes_per_probe`) followed by
/// [`MAX_CLIPMAP_LEVELS`] 32-byte [`LevelUniforms`] records.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct WorldProbeUniforms {
    pub level_count: u32,
    pub resolution: u32,
    pub base_spacing: f32,
    pub estimated_bytes_per_probe: u32,
    pub levels: [LevelUniforms; MAX_CLIPMAP_LEVELS],
}

static_assertions::assert_eq_size!(WorldProbeUniforms, [u8; WORLD_PROBE_BLOCK_SIZE]);

/// Level count and per-probe estimate as they are written to the header.
fn header_fields(config: &SchedulerConfig) -> Result<(u32, u32), PackingError> {
    let level_count = config.level_count;
    if level_count as usize > MAX_CLIPMAP_LEVELS {
        return Err(PackingError::TooManyLevels {
            levels: level_count,
            max: MAX_CLIPMAP_LEVELS,
        });
    }
    let estimate = config.estimated_bytes_per_probe;
    let estimated_bytes_per_probe =
        u32::try_from(estimate).map_err(|_| PackingError::FieldOverflow {
            field: "estimated_bytes_per_probe",
            value: estimate,
        })?;
    Ok((level_count, estimated_bytes_per_probe))
}

/// Sequential little-endian field writer with a declared total size.
struct BlockWriter {
    block: &'static str,
    declared: usize,
    bytes: Vec<u8>,
}

impl BlockWriter {
    fn new(block: &'static str, declared: usize) -> Self {
        Self {
            block,
            declared,
            bytes: Vec::with_capacity(declared),
        }
    }

    fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn i32(&mut self, value: i32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn f32(&mut self, value: f32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn finish(self) -> Result<Vec<u8>, PackingError> {
        if self.bytes.len() != self.declared {
            return Err(PackingError::SizeMismatch {
                block: self.block,
                expected: self.declared,
                actual: self.bytes.len(),
            });
        }
        Ok(self.bytes)
    }
}

impl FrameUniforms {
    /// Little-endian bytes, exactly [`FRAME_BLOCK_SIZE`] long.
    pub fn pack(&self) -> Result<Vec<u8>, PackingError> {
        let mut w = BlockWriter::new("frame", FRAME_BLOCK_SIZE);
        w.u32(self.frame_index)
            .u32(self.width)
            .u32(self.height)
            .u32(self.probe_spacing)
            .u32(self.probe_count_x)
            .u32(self.probe_count_y)
            .u32(self.atlas_tile_size)
            .u32(self.half_resolution)
            .f32(self.jitter_x)
            .f32(self.jitter_y)
            .f32(self.temporal_blend)
            .u32(self.history_valid);
        w.finish()
    }
}

impl WorldProbeUniforms {
    /// Whether a scheduler built from `config` can be published in this block.
    pub fn check_layout(config: &SchedulerConfig) -> Result<(), PackingError> {
        header_fields(config).map(|_| ())
    }

    /// Snapshot the scheduler's level placements.
    ///
    /// Levels that were never placed, and slots past `level_count`, stay zero.
    pub fn from_scheduler(
        scheduler: &WorldProbeScheduler,
        base_spacing: f32,
    ) -> Result<Self, PackingError> {
        let (level_count, estimated_bytes_per_probe) = header_fields(scheduler.config())?;

        let mut uniforms = Self {
            level_count,
            resolution: scheduler.resolution(),
            base_spacing,
            estimated_bytes_per_probe,
            levels: [LevelUniforms::default(); MAX_CLIPMAP_LEVELS],
        };
        for (index, slot) in uniforms.levels.iter_mut().enumerate().take(level_count as usize) {
            let Ok(level) = scheduler.level(index as u32) else {
                continue;
            };
            if let Some(placement) = level.placement() {
                *slot = LevelUniforms {
                    origin_min_corner: placement.origin_min_corner.to_array(),
                    spacing: placement.spacing,
                    ring_offset: level.ring_offset().to_array(),
                    initialized: 1,
                };
            }
        }
        Ok(uniforms)
    }

    /// Little-endian bytes, exactly [`WORLD_PROBE_BLOCK_SIZE`] long.
    pub fn pack(&self) -> Result<Vec<u8>, PackingError> {
        let mut w = BlockWriter::new("world-probe", WORLD_PROBE_BLOCK_SIZE);
        w.u32(self.level_count)
            .u32(self.resolution)
            .f32(self.base_spacing)
            .u32(self.estimated_bytes_per_probe);
        for level in &self.levels {
            let [ox, oy, oz] = level.origin_min_corner;
            let [rx, ry, rz] = level.ring_offset;
            w.f32(ox)
                .f32(oy)
                .f32(oz)
                .f32(level.spacing)
                .i32(rx)
                .i32(ry)
                .i32(rz)
                .u32(level.initialized);
        }
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn read_i32(bytes: &[u8], offset: usize) -> i32 {
        i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn read_f32(bytes: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn test_frame_block_field_order() {
        let uniforms = FrameUniforms {
            frame_index: 7,
            width: 1920,
            height: 1080,
            probe_spacing: 8,
            probe_count_x: 240,
            probe_count_y: 135,
            atlas_tile_size: 8,
            half_resolution: 1,
            jitter_x: 0.25,
            jitter_y: -0.125,
            temporal_blend: 0.9,
            history_valid: 1,
        };
        let bytes = uniforms.pack().unwrap();
        assert_eq!(bytes.len(), FRAME_BLOCK_SIZE);
        assert_eq!(read_u32(&bytes, 0), 7);
        assert_eq!(read_u32(&bytes, 4), 1920);
        assert_eq!(read_u32(&bytes, 8), 1080);
        assert_eq!(read_u32(&bytes, 16), 240);
        assert_eq!(read_u32(&bytes, 20), 135);
        assert_eq!(read_u32(&bytes, 28), 1);
        assert_eq!(read_f32(&bytes, 32), 0.25);
        assert_eq!(read_f32(&bytes, 36), -0.125);
        assert_eq!(read_f32(&bytes, 40), 0.9);
        assert_eq!(read_u32(&bytes, 44), 1);
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn test_pack_matches_repr_c_layout() {
        let uniforms = FrameUniforms {
            frame_index: 3,
            jitter_x: 1.5,
            history_valid: 1,
            ..FrameUniforms::default()
        };
        assert_eq!(uniforms.pack().unwrap(), bytemuck::bytes_of(&uniforms));
    }

    #[test]
    fn test_world_block_snapshots_placed_levels() {
        let mut scheduler = WorldProbeScheduler::new(SchedulerConfig::uniform(4, 2, 60)).unwrap();
        scheduler.update_origins(Vec3::ZERO, 2.0).unwrap();
        scheduler.update_origins(Vec3::new(2.0, 0.0, 0.0), 2.0).unwrap();

        let uniforms = WorldProbeUniforms::from_scheduler(&scheduler, 2.0).unwrap();
        let bytes = uniforms.pack().unwrap();
        assert_eq!(bytes.len(), WORLD_PROBE_BLOCK_SIZE);
        assert_eq!(read_u32(&bytes, 0), 2);
        assert_eq!(read_u32(&bytes, 4), 4);
        assert_eq!(read_f32(&bytes, 8), 2.0);
        assert_eq!(read_u32(&bytes, 12), 576);

        // Level 0: anchor (2,0,0), origin anchor - 2 * spacing.
        let l0 = WORLD_PROBE_HEADER_SIZE;
        assert_eq!(read_f32(&bytes, l0), -2.0);
        assert_eq!(read_f32(&bytes, l0 + 4), -4.0);
        assert_eq!(read_f32(&bytes, l0 + 12), 2.0);
        assert_eq!(read_i32(&bytes, l0 + 16), 1);
        assert_eq!(read_u32(&bytes, l0 + 28), 1);

        // Level 1: spacing 4, x = 0.5 cells snaps up to anchor (4,0,0).
        let l1 = l0 + WORLD_PROBE_LEVEL_SIZE;
        assert_eq!(read_f32(&bytes, l1), -4.0);
        assert_eq!(read_f32(&bytes, l1 + 12), 4.0);
        assert_eq!(read_i32(&bytes, l1 + 16), 1);
        assert_eq!(read_u32(&bytes, l1 + 28), 1);

        // Unused levels are all zero.
        let unused = l1 + WORLD_PROBE_LEVEL_SIZE;
        assert!(bytes[unused..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unplaced_level_is_zero() {
        let scheduler = WorldProbeScheduler::new(SchedulerConfig::uniform(4, 1, 60)).unwrap();
        let uniforms = WorldProbeUniforms::from_scheduler(&scheduler, 1.0).unwrap();
        assert_eq!(uniforms.levels[0], LevelUniforms::default());
        assert_eq!(uniforms.level_count, 1);
    }

    #[test]
    fn test_too_many_levels() {
        let config = SchedulerConfig::uniform(4, 5, 60);
        assert_eq!(
            WorldProbeUniforms::check_layout(&config),
            Err(PackingError::TooManyLevels { levels: 5, max: 4 })
        );
        let scheduler = WorldProbeScheduler::new(config).unwrap();
        assert_eq!(
            WorldProbeUniforms::from_scheduler(&scheduler, 1.0),
            Err(PackingError::TooManyLevels { levels: 5, max: 4 })
        );
        assert_eq!(
            WorldProbeUniforms::check_layout(&SchedulerConfig::uniform(4, 4, 60)),
            Ok(())
        );
    }

    #[test]
    fn test_oversized_estimate_overflows_field() {
        let mut config = SchedulerConfig::uniform(4, 1, 60);
        config.estimated_bytes_per_probe = u64::from(u32::MAX) + 1;
        let scheduler = WorldProbeScheduler::new(config).unwrap();
        assert!(matches!(
            WorldProbeUniforms::from_scheduler(&scheduler, 1.0),
            Err(PackingError::FieldOverflow { .. })
        ));
    }

    #[test]
    fn test_size_mismatch_is_reported() {
        let mut w = BlockWriter::new("frame", FRAME_BLOCK_SIZE);
        w.u32(1).u32(2);
        assert_eq!(
            w.finish(),
            Err(PackingError::SizeMismatch {
                block: "frame",
                expected: FRAME_BLOCK_SIZE,
                actual: 8,
            })
        );
    }
}
