//! GPU resource primitives the buffer manager is written against.
//!
//! The manager never talks to a graphics API directly. It allocates, clears,
//! and blits through a [`ProbeImageBackend`], which keeps the lifecycle logic
//! testable without a device. [`crate::WgpuProbeBackend`] is the production
//! implementation.

/// Texel formats used by the screen-probe resources.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// Radiance, metadata, atlas, and indirect-diffuse signals.
    Rgba16Float,
    /// Probe anchor world positions.
    Rgba32Float,
    /// Linear depth for the depth pyramid.
    R32Float,
}

impl ImageFormat {
    /// Bytes per texel.
    #[must_use]
    pub fn bytes_per_texel(self) -> u64 {
        match self {
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
            Self::R32Float => 4,
        }
    }
}

/// Description of a 2D image to allocate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    /// Debug label, also used in diagnostics.
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    /// Number of mip levels (1 for single-level images).
    pub mip_levels: u32,
}

impl ImageDesc {
    /// Single-mip image description.
    #[must_use]
    pub fn new(label: &'static str, width: u32, height: u32, format: ImageFormat) -> Self {
        Self {
            label,
            width,
            height,
            format,
            mip_levels: 1,
        }
    }

    /// Use a full mip chain down to 1×1.
    #[must_use]
    pub fn with_full_mip_chain(mut self) -> Self {
        self.mip_levels = mip_level_count(self.width, self.height);
        self
    }

    /// Approximate memory footprint including mips.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        (0..self.mip_levels)
            .map(|mip| {
                let w = u64::from((self.width >> mip).max(1));
                let h = u64::from((self.height >> mip).max(1));
                w * h * self.format.bytes_per_texel()
            })
            .sum()
    }
}

/// Calculates the number of mip levels for the given dimensions.
#[must_use]
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    (width.max(height).max(1) as f32).log2().floor() as u32 + 1
}

/// Failures reported by a backend when allocating an image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpuResourceError {
    /// Width or height is zero.
    #[error("image '{label}' dimensions must be non-zero, got {width}x{height}")]
    ZeroDimensions {
        label: &'static str,
        width: u32,
        height: u32,
    },

    /// The device cannot create an image this large.
    #[error("image '{label}' size {width}x{height} exceeds device limit {max}")]
    ExceedsLimit {
        label: &'static str,
        width: u32,
        height: u32,
        max: u32,
    },

    /// The backend ran out of memory or refused the allocation.
    #[error("allocation of image '{label}' failed: {reason}")]
    AllocationFailed { label: &'static str, reason: String },
}

/// Allocation, clearing, and copying of 2D images.
pub trait ProbeImageBackend {
    /// Backend image handle, exclusively owned by whoever holds it.
    type Image;
    /// External image a scene capture copies from.
    type Source: ?Sized;

    /// Allocate a zero-initialized image.
    fn create_image(&mut self, desc: &ImageDesc) -> Result<Self::Image, GpuResourceError>;

    /// Release an image. Called exactly once per created image.
    fn destroy_image(&mut self, image: Self::Image);

    /// Reset every mip of an image to zero.
    fn clear_image(&mut self, image: &Self::Image);

    /// Copy the top-left `width`×`height` region of `source` into `target`.
    fn blit_from_external(
        &mut self,
        source: &Self::Source,
        target: &Self::Image,
        width: u32,
        height: u32,
    );
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mipmap_level_count_calculation() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(2, 2), 2);
        assert_eq!(mip_level_count(4, 4), 3);
        assert_eq!(mip_level_count(1920, 1080), 11);
        assert_eq!(mip_level_count(0, 0), 1);
    }

    #[test]
    fn test_byte_size_includes_mips() {
        let single = ImageDesc::new("a", 4, 4, ImageFormat::R32Float);
        assert_eq!(single.byte_size(), 64);
        let chain = single.clone().with_full_mip_chain();
        assert_eq!(chain.mip_levels, 3);
        assert_eq!(chain.byte_size(), 64 + 16 + 4);
    }
}
