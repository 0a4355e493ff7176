//! Screen-space probe resources for the indirect-lighting cache.
//!
//! [`ScreenProbeBuffers`] owns every image the screen-probe passes read and
//! write: anchors, trace/current/history radiance, metadata, the directional
//! atlas, indirect-diffuse targets, the scene capture, and the depth pyramid.
//! Images are allocated through a [`ProbeImageBackend`]; [`WgpuProbeBackend`]
//! is the GPU implementation.

pub mod buffers;
pub mod error;
pub mod gpu;
pub mod targets;
pub mod wgpu_backend;

pub use buffers::{BufferSet, ScreenProbeBuffers, ScreenProbeImage, ScreenProbeSettings};
pub use error::ScreenProbeError;
pub use gpu::{GpuResourceError, ImageDesc, ImageFormat, ProbeImageBackend, mip_level_count};
pub use targets::{Attachment, ImageId, ImageTable, Ownership, RenderTarget};
pub use wgpu_backend::{WgpuImage, WgpuProbeBackend, create_headless_device, texture_format};
