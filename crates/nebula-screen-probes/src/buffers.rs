//! Screen-probe buffer lifecycle: sizing, reallocation, current/history
//! swapping, and history invalidation.
//!
//! All images are created together when the output size changes and released
//! together on teardown. Current and history sets are exchanged every frame by
//! swapping handles, never by copying texels. The temporal-output target only
//! borrows the current radiance and metadata images, so it can be rebuilt or
//! dropped at any time without touching their lifetime.

use tracing::{debug, info, trace, warn};

use crate::error::ScreenProbeError;
use crate::gpu::{ImageDesc, ImageFormat, ProbeImageBackend};
use crate::targets::{ImageId, ImageTable, RenderTarget};

/// Sizing parameters for the screen-probe grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreenProbeSettings {
    /// Distance between screen probes in output pixels.
    pub probe_spacing: u32,
    /// Resolve indirect diffuse at half resolution before upsampling.
    pub half_resolution: bool,
    /// Edge length of each probe's tile in the directional atlas.
    pub atlas_tile_size: u32,
}

impl Default for ScreenProbeSettings {
    fn default() -> Self {
        Self {
            probe_spacing: 8,
            half_resolution: true,
            atlas_tile_size: 8,
        }
    }
}

impl ScreenProbeSettings {
    /// Reject zero probe spacing or tile size.
    pub fn validate(&self) -> Result<(), ScreenProbeError> {
        if self.probe_spacing == 0 {
            return Err(ScreenProbeError::InvalidProbeSpacing);
        }
        if self.atlas_tile_size == 0 {
            return Err(ScreenProbeError::InvalidTileSize);
        }
        Ok(())
    }
}

/// Role of a temporally double-buffered set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferSet {
    /// Written by this frame's trace pass.
    Trace,
    /// Written by this frame's temporal pass.
    Current,
    /// Previous frame's accumulated result.
    History,
}

/// Addressable screen-probe images.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScreenProbeImage {
    AnchorPosition,
    AnchorNormal,
    /// Radiance coefficients; `channel` is 0 or 1.
    Radiance { set: BufferSet, channel: usize },
    /// Per-probe metadata. There is no trace metadata set.
    Metadata { set: BufferSet },
    /// Directional radiance atlas.
    Atlas { set: BufferSet },
    IndirectHalf,
    IndirectFull,
    SceneCapture,
    DepthPyramid,
}

struct BufferTargets {
    anchor: RenderTarget,
    radiance_trace: RenderTarget,
    radiance_current: RenderTarget,
    radiance_history: RenderTarget,
    metadata_current: RenderTarget,
    metadata_history: RenderTarget,
    atlas_trace: RenderTarget,
    atlas_current: RenderTarget,
    atlas_history: RenderTarget,
    indirect_half: RenderTarget,
    indirect_full: RenderTarget,
    scene_capture: RenderTarget,
    depth_pyramid: RenderTarget,
}

impl BufferTargets {
    fn into_array(self) -> [RenderTarget; 13] {
        [
            self.anchor,
            self.radiance_trace,
            self.radiance_current,
            self.radiance_history,
            self.metadata_current,
            self.metadata_history,
            self.atlas_trace,
            self.atlas_current,
            self.atlas_history,
            self.indirect_half,
            self.indirect_full,
            self.scene_capture,
            self.depth_pyramid,
        ]
    }

    /// Targets whose contents carry temporal state.
    fn temporal(&self) -> [&RenderTarget; 6] {
        [
            &self.radiance_current,
            &self.radiance_history,
            &self.metadata_current,
            &self.metadata_history,
            &self.atlas_current,
            &self.atlas_history,
        ]
    }

    fn image_id(&self, image: ScreenProbeImage) -> Option<ImageId> {
        let (target, slot) = match image {
            ScreenProbeImage::AnchorPosition => (&self.anchor, 0),
            ScreenProbeImage::AnchorNormal => (&self.anchor, 1),
            ScreenProbeImage::Radiance { set, channel } => {
                let target = match set {
                    BufferSet::Trace => &self.radiance_trace,
                    BufferSet::Current => &self.radiance_current,
                    BufferSet::History => &self.radiance_history,
                };
                (target, channel)
            }
            ScreenProbeImage::Metadata { set } => match set {
                BufferSet::Trace => return None,
                BufferSet::Current => (&self.metadata_current, 0),
                BufferSet::History => (&self.metadata_history, 0),
            },
            ScreenProbeImage::Atlas { set } => match set {
                BufferSet::Trace => (&self.atlas_trace, 0),
                BufferSet::Current => (&self.atlas_current, 0),
                BufferSet::History => (&self.atlas_history, 0),
            },
            ScreenProbeImage::IndirectHalf => (&self.indirect_half, 0),
            ScreenProbeImage::IndirectFull => (&self.indirect_full, 0),
            ScreenProbeImage::SceneCapture => (&self.scene_capture, 0),
            ScreenProbeImage::DepthPyramid => (&self.depth_pyramid, 0),
        };
        target.image(slot)
    }
}

struct Allocation {
    width: u32,
    height: u32,
    probe_count: (u32, u32),
    resident_bytes: u64,
    targets: BufferTargets,
    temporal_output: RenderTarget,
}

/// Owner of every screen-space probe resource.
pub struct ScreenProbeBuffers<B: ProbeImageBackend> {
    backend: B,
    settings: ScreenProbeSettings,
    images: ImageTable<B::Image>,
    allocation: Option<Allocation>,
    generation: u64,
    history_valid: bool,
    invalidations: u64,
    last_invalidation: Option<String>,
}

impl<B: ProbeImageBackend> ScreenProbeBuffers<B> {
    /// Create an empty manager. Nothing is allocated until
    /// [`ensure_buffers`](Self::ensure_buffers).
    pub fn new(backend: B, settings: ScreenProbeSettings) -> Result<Self, ScreenProbeError> {
        settings.validate()?;
        Ok(Self {
            backend,
            settings,
            images: ImageTable::new(),
            allocation: None,
            generation: 0,
            history_valid: false,
            invalidations: 0,
            last_invalidation: None,
        })
    }

    /// (Re)allocate every resource if the output size changed.
    ///
    /// Returns `true` when a new set was allocated. On failure, everything
    /// created during the attempt is released and the manager is left
    /// uninitialized.
    pub fn ensure_buffers(&mut self, width: u32, height: u32) -> Result<bool, ScreenProbeError> {
        if width == 0 || height == 0 {
            return Err(ScreenProbeError::ZeroDimensions { width, height });
        }
        if let Some(current) = &self.allocation
            && current.width == width
            && current.height == height
        {
            return Ok(false);
        }

        self.release()?;
        match allocate(
            &mut self.backend,
            &mut self.images,
            &self.settings,
            width,
            height,
        ) {
            Ok(allocation) => {
                info!(
                    width,
                    height,
                    probes_x = allocation.probe_count.0,
                    probes_y = allocation.probe_count.1,
                    images = self.images.len(),
                    bytes = allocation.resident_bytes,
                    "allocated screen-probe buffers"
                );
                self.allocation = Some(allocation);
                self.generation += 1;
                self.clear_history();
                Ok(true)
            }
            Err(err) => {
                let partial = self.images.drain();
                warn!(
                    width,
                    height,
                    released = partial.len(),
                    error = %err,
                    "screen-probe allocation failed"
                );
                for (_, image) in partial {
                    self.backend.destroy_image(image);
                }
                Err(err)
            }
        }
    }

    /// Exchange current and history radiance, atlas, and metadata, then point
    /// the temporal-output target at the new current set.
    ///
    /// Call once per frame after the temporal pass.
    pub fn swap_radiance_buffers(&mut self) -> Result<(), ScreenProbeError> {
        let allocation = self
            .allocation
            .as_mut()
            .ok_or(ScreenProbeError::NotInitialized)?;
        let targets = &mut allocation.targets;
        std::mem::swap(&mut targets.radiance_current, &mut targets.radiance_history);
        std::mem::swap(&mut targets.metadata_current, &mut targets.metadata_history);
        std::mem::swap(&mut targets.atlas_current, &mut targets.atlas_history);
        allocation.temporal_output = temporal_output_target(targets);
        self.history_valid = true;
        trace!("swapped screen-probe history");
        Ok(())
    }

    /// Zero the current and history radiance, metadata, and atlas images.
    pub fn clear_history(&mut self) {
        let Some(allocation) = &self.allocation else {
            return;
        };
        for target in allocation.targets.temporal() {
            for attachment in target.attachments() {
                if let Some(image) = self.images.get(attachment.image) {
                    self.backend.clear_image(image);
                }
            }
        }
        self.history_valid = false;
        debug!("cleared screen-probe history");
    }

    /// Drop temporal history because continuity was broken.
    pub fn invalidate_cache(&mut self, reason: &str) {
        self.clear_history();
        self.invalidations += 1;
        info!(reason, "screen-probe cache invalidated");
        self.last_invalidation = Some(reason.to_string());
    }

    /// Copy the lit scene into the capture image. No-op before allocation.
    ///
    /// Returns `true` if a copy was issued.
    pub fn capture_scene(&mut self, source: &B::Source, width: u32, height: u32) -> bool {
        let Some(allocation) = &self.allocation else {
            return false;
        };
        let Some(target) = allocation
            .targets
            .scene_capture
            .image(0)
            .and_then(|id| self.images.get(id))
        else {
            return false;
        };
        let width = width.min(allocation.width);
        let height = height.min(allocation.height);
        if width == 0 || height == 0 {
            return false;
        }
        self.backend
            .blit_from_external(source, target, width, height);
        true
    }

    /// Release every resource. Safe to call when nothing is allocated.
    pub fn release(&mut self) -> Result<(), ScreenProbeError> {
        let Some(allocation) = self.allocation.take() else {
            return Ok(());
        };
        self.history_valid = false;

        // The borrowing target goes first, while its images are still owned.
        let mut released = Vec::new();
        let mut result = allocation
            .temporal_output
            .release(&mut self.images, &mut released);
        for target in allocation.targets.into_array() {
            let outcome = target.release(&mut self.images, &mut released);
            result = result.and(outcome);
        }
        for image in released {
            self.backend.destroy_image(image);
        }
        for (label, image) in self.images.drain() {
            warn!(label, "screen-probe image outlived its owner; releasing");
            self.backend.destroy_image(image);
        }
        debug!(
            width = allocation.width,
            height = allocation.height,
            "released screen-probe buffers"
        );
        result
    }

    /// Replace the sizing parameters. A change releases the current set; the
    /// next [`ensure_buffers`](Self::ensure_buffers) reallocates.
    pub fn apply_settings(&mut self, settings: ScreenProbeSettings) -> Result<(), ScreenProbeError> {
        settings.validate()?;
        if settings != self.settings {
            self.release()?;
            self.settings = settings;
        }
        Ok(())
    }

    /// Current sizing parameters.
    pub fn settings(&self) -> &ScreenProbeSettings {
        &self.settings
    }

    /// Whether a resource set is allocated.
    pub fn is_initialized(&self) -> bool {
        self.allocation.is_some()
    }

    /// Output size the current set was allocated for.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.allocation.as_ref().map(|a| (a.width, a.height))
    }

    /// Probe grid size: `ceil(width / spacing)` by `ceil(height / spacing)`.
    pub fn probe_count(&self) -> Option<(u32, u32)> {
        self.allocation.as_ref().map(|a| a.probe_count)
    }

    /// Approximate GPU memory held by the current set.
    pub fn resident_bytes(&self) -> u64 {
        self.allocation.as_ref().map_or(0, |a| a.resident_bytes)
    }

    /// Incremented every time a new set is allocated.
    pub fn allocation_generation(&self) -> u64 {
        self.generation
    }

    /// Whether history holds accumulated data (at least one swap since the last clear).
    pub fn history_valid(&self) -> bool {
        self.history_valid
    }

    /// Number of images currently alive.
    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }

    /// Number of explicit invalidations so far.
    pub fn invalidation_count(&self) -> u64 {
        self.invalidations
    }

    /// Reason given to the most recent invalidation.
    pub fn last_invalidation_reason(&self) -> Option<&str> {
        self.last_invalidation.as_deref()
    }

    /// Handle of an image in the current set.
    pub fn image_id(&self, image: ScreenProbeImage) -> Option<ImageId> {
        self.allocation
            .as_ref()
            .and_then(|a| a.targets.image_id(image))
    }

    /// Backend image in the current set.
    pub fn image(&self, image: ScreenProbeImage) -> Option<&B::Image> {
        self.image_id(image).and_then(|id| self.images.get(id))
    }

    /// Target the temporal pass writes: borrowed current radiance channels
    /// followed by the borrowed current metadata.
    pub fn temporal_output(&self) -> Option<&RenderTarget> {
        self.allocation.as_ref().map(|a| &a.temporal_output)
    }

    /// Resolve every attachment of a target to its backend image.
    pub fn target_images<'a>(&'a self, target: &RenderTarget) -> Vec<&'a B::Image> {
        target
            .attachments()
            .iter()
            .filter_map(|a| self.images.get(a.image))
            .collect()
    }

    /// The backend the images were allocated with.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access, e.g. to record passes.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: ProbeImageBackend> Drop for ScreenProbeBuffers<B> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(error = %err, "screen-probe teardown reported an ownership error");
        }
    }
}

fn temporal_output_target(targets: &BufferTargets) -> RenderTarget {
    let images: Vec<ImageId> = targets
        .radiance_current
        .attachments()
        .iter()
        .chain(targets.metadata_current.attachments())
        .map(|a| a.image)
        .collect();
    RenderTarget::borrowing("screen-probe-temporal-output", &images)
}

fn radiance_labels(set: BufferSet) -> [&'static str; 2] {
    match set {
        BufferSet::Trace => ["screen-probe-radiance-trace-0", "screen-probe-radiance-trace-1"],
        BufferSet::Current => ["screen-probe-radiance-a-0", "screen-probe-radiance-a-1"],
        BufferSet::History => ["screen-probe-radiance-b-0", "screen-probe-radiance-b-1"],
    }
}

fn allocate<B: ProbeImageBackend>(
    backend: &mut B,
    images: &mut ImageTable<B::Image>,
    settings: &ScreenProbeSettings,
    width: u32,
    height: u32,
) -> Result<Allocation, ScreenProbeError> {
    let probe_count = (
        width.div_ceil(settings.probe_spacing),
        height.div_ceil(settings.probe_spacing),
    );
    let (px, py) = probe_count;
    let tile = settings.atlas_tile_size;
    let (half_w, half_h) = if settings.half_resolution {
        (width.div_ceil(2), height.div_ceil(2))
    } else {
        (width, height)
    };

    let mut resident_bytes = 0;
    let mut create = |desc: ImageDesc| -> Result<ImageId, ScreenProbeError> {
        let image = backend.create_image(&desc)?;
        resident_bytes += desc.byte_size();
        Ok(images.insert(desc.label, image))
    };

    let probe_grid = |label| ImageDesc::new(label, px, py, ImageFormat::Rgba16Float);
    let atlas = |label| ImageDesc::new(label, px * tile, py * tile, ImageFormat::Rgba16Float);

    let anchor = RenderTarget::owning(
        "screen-probe-anchor",
        &[
            create(ImageDesc::new(
                "screen-probe-anchor-position",
                px,
                py,
                ImageFormat::Rgba32Float,
            ))?,
            create(probe_grid("screen-probe-anchor-normal"))?,
        ],
    );

    let mut radiance = |set: BufferSet| -> Result<RenderTarget, ScreenProbeError> {
        let [l0, l1] = radiance_labels(set);
        Ok(RenderTarget::owning(
            "screen-probe-radiance",
            &[create(probe_grid(l0))?, create(probe_grid(l1))?],
        ))
    };
    let radiance_trace = radiance(BufferSet::Trace)?;
    let radiance_current = radiance(BufferSet::Current)?;
    let radiance_history = radiance(BufferSet::History)?;

    let metadata_current = RenderTarget::owning(
        "screen-probe-metadata",
        &[create(probe_grid("screen-probe-metadata-a"))?],
    );
    let metadata_history = RenderTarget::owning(
        "screen-probe-metadata",
        &[create(probe_grid("screen-probe-metadata-b"))?],
    );

    let atlas_trace = RenderTarget::owning(
        "screen-probe-atlas",
        &[create(atlas("screen-probe-atlas-trace"))?],
    );
    let atlas_current = RenderTarget::owning(
        "screen-probe-atlas",
        &[create(atlas("screen-probe-atlas-a"))?],
    );
    let atlas_history = RenderTarget::owning(
        "screen-probe-atlas",
        &[create(atlas("screen-probe-atlas-b"))?],
    );

    let indirect_half = RenderTarget::owning(
        "screen-probe-indirect-half",
        &[create(ImageDesc::new(
            "screen-probe-indirect-half",
            half_w,
            half_h,
            ImageFormat::Rgba16Float,
        ))?],
    );
    let indirect_full = RenderTarget::owning(
        "screen-probe-indirect-full",
        &[create(ImageDesc::new(
            "screen-probe-indirect-full",
            width,
            height,
            ImageFormat::Rgba16Float,
        ))?],
    );
    let scene_capture = RenderTarget::owning(
        "screen-probe-scene-capture",
        &[create(ImageDesc::new(
            "screen-probe-scene-capture",
            width,
            height,
            ImageFormat::Rgba16Float,
        ))?],
    );
    let depth_pyramid = RenderTarget::owning(
        "screen-probe-depth-pyramid",
        &[create(
            ImageDesc::new(
                "screen-probe-depth-pyramid",
                width,
                height,
                ImageFormat::R32Float,
            )
            .with_full_mip_chain(),
        )?],
    );

    let targets = BufferTargets {
        anchor,
        radiance_trace,
        radiance_current,
        radiance_history,
        metadata_current,
        metadata_history,
        atlas_trace,
        atlas_current,
        atlas_history,
        indirect_half,
        indirect_full,
        scene_capture,
        depth_pyramid,
    };
    let temporal_output = temporal_output_target(&targets);
    Ok(Allocation {
        width,
        height,
        probe_count,
        resident_bytes,
        targets,
        temporal_output,
    })
}
