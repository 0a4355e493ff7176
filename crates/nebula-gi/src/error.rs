//! Error types for the indirect-lighting frame driver.

use nebula_clipmap::ClipmapError;
use nebula_config::ConfigError;
use nebula_screen_probes::ScreenProbeError;

/// A uniform block did not come out at its declared size, or a value does not
/// fit its field. Either is a layout bug, never a runtime condition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackingError {
    #[error("{block} block packed to {actual} bytes, declared {expected}")]
    SizeMismatch {
        block: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{levels} clipmap levels exceed the uniform capacity of {max}")]
    TooManyLevels { levels: u32, max: usize },

    #[error("value {value} does not fit the 32-bit field `{field}`")]
    FieldOverflow { field: &'static str, value: u64 },
}

/// Errors surfaced by [`crate::IndirectLightingCache`].
#[derive(Debug, thiserror::Error)]
pub enum GiError {
    #[error(transparent)]
    Clipmap(#[from] ClipmapError),

    #[error(transparent)]
    ScreenProbe(#[from] ScreenProbeError),

    #[error(transparent)]
    Packing(#[from] PackingError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The operation needs screen-probe buffers but the cache runs world probes only.
    #[error("screen probes are disabled")]
    ScreenProbesDisabled,
}
