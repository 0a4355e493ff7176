//! Screen-probe buffer error types.

use crate::gpu::GpuResourceError;
use crate::targets::ImageId;

/// Errors raised by the screen-probe buffer manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScreenProbeError {
    /// Output width or height is zero.
    #[error("screen-probe output dimensions must be non-zero, got {width}x{height}")]
    ZeroDimensions { width: u32, height: u32 },

    /// Probe spacing of zero pixels.
    #[error("probe spacing must be at least one pixel")]
    InvalidProbeSpacing,

    /// Atlas tile size of zero texels.
    #[error("directional atlas tile size must be at least one texel")]
    InvalidTileSize,

    /// The backend failed to allocate an image; nothing from the attempt survives.
    #[error("screen-probe allocation failed: {0}")]
    Allocation(#[from] GpuResourceError),

    /// An operation that needs allocated buffers ran before `ensure_buffers`.
    #[error("screen-probe buffers are not allocated")]
    NotInitialized,

    /// An image handle was released twice or never existed.
    #[error("image {image:?} released twice")]
    DoubleRelease { image: ImageId },

    /// A borrowing target outlived the image it borrows.
    #[error("render target '{target}' borrows released image {image:?}")]
    DanglingBorrow { target: &'static str, image: ImageId },
}
