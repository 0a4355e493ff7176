//! Clipmap scheduler error types.

/// Precondition violations reported by the world-probe scheduler.
///
/// Every public entry point validates its arguments before touching any state,
/// so an error always leaves the scheduler exactly as it was.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClipmapError {
    /// Grid resolution must be at least one probe per axis.
    #[error("clipmap resolution must be positive, got {0}")]
    InvalidResolution(u32),

    /// At least one level is required.
    #[error("clipmap level count must be positive, got {0}")]
    InvalidLevelCount(u32),

    /// More levels than fit the spacing progression.
    #[error("clipmap level count {level_count} exceeds the maximum of {max}")]
    TooManyLevels { level_count: u32, max: u32 },

    /// Spacing must be a finite, strictly positive number.
    #[error("probe spacing must be finite and positive, got {0}")]
    InvalidSpacing(f32),

    /// A camera or AABB coordinate was NaN or infinite.
    #[error("world position must be finite, got {0:?}")]
    NonFinitePosition([f32; 3]),

    /// Level index outside `[0, level_count)`.
    #[error("clipmap level {level} out of range (level count {level_count})")]
    LevelOutOfRange { level: u32, level_count: u32 },

    /// A per-level array has fewer entries than there are levels.
    #[error("{what} has {actual} entries, expected at least {expected}")]
    UndersizedArray {
        what: &'static str,
        actual: usize,
        expected: usize,
    },

    /// Per-probe upload estimate of zero would make the byte budget meaningless.
    #[error("estimated bytes per probe must be positive")]
    InvalidUploadEstimate,

    /// A completion referenced a storage slot outside the level.
    #[error("storage index {index} out of range for level {level} ({probes} probes)")]
    SlotOutOfRange {
        level: u32,
        index: usize,
        probes: usize,
    },

    /// A completion arrived for a slot that has no outstanding request.
    #[error("probe {index} on level {level} is not in flight")]
    NotInFlight { level: u32, index: usize },
}
