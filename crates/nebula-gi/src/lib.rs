//! Probe-based indirect lighting cache.
//!
//! [`IndirectLightingCache`] drives the world-probe clipmap scheduler and the
//! screen-probe buffers frame by frame, funnels trace results back from worker
//! threads, and publishes the uniform blocks the probe shaders read.

pub mod cache;
pub mod error;
pub mod uniforms;

pub use cache::{
    CacheSettings, CompletionSender, DrainReport, IndirectLightingCache, ProbeTraceBackend,
    TraceCompletion, WorldProbeFrame,
};
pub use error::{GiError, PackingError};
pub use uniforms::{
    FRAME_BLOCK_SIZE, FrameUniforms, LevelUniforms, MAX_CLIPMAP_LEVELS, WORLD_PROBE_BLOCK_SIZE,
    WorldProbeUniforms,
};
