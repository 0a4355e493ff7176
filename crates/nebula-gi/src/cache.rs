//! Per-frame driver tying world-probe scheduling, trace dispatch, and
//! screen-probe buffers together.
//!
//! The cache lives on the render thread. Trace backends may finish work on
//! any thread; they report through a [`CompletionSender`] and the cache
//! applies those results serially at the start of the next update.

use std::cell::RefCell;
use std::rc::Rc;

use glam::{Vec2, Vec3};
use nebula_clipmap::{
    AnchorShiftEvent, ClipmapError, ClipmapStats, ProbeState, SchedulerConfig, UpdateBudget,
    UpdateRequest, WorldProbeScheduler,
};
use nebula_config::Config;
use nebula_screen_probes::{
    ProbeImageBackend, ScreenProbeBuffers, ScreenProbeError, ScreenProbeSettings,
};
use tracing::{debug, info, warn};

use crate::error::GiError;
use crate::uniforms::{FrameUniforms, WorldProbeUniforms};

/// Outcome of one traced probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceCompletion {
    pub request: UpdateRequest,
    pub success: bool,
}

/// Cloneable, `Send` handle trace workers use to report results.
#[derive(Clone, Debug)]
pub struct CompletionSender(crossbeam_channel::Sender<TraceCompletion>);

impl CompletionSender {
    /// Report a finished probe. Returns `false` if the cache is gone or was
    /// rebuilt since the request was issued.
    pub fn send(&self, request: UpdateRequest, success: bool) -> bool {
        self.0.send(TraceCompletion { request, success }).is_ok()
    }
}

/// Executes probe traces, usually asynchronously.
pub trait ProbeTraceBackend {
    /// Accept this frame's requests. Exactly one completion per request must
    /// eventually be sent through `completions`.
    fn dispatch(
        &mut self,
        frame_index: u64,
        requests: Vec<UpdateRequest>,
        completions: &CompletionSender,
    );
}

/// Tunables of the cache, usually derived from [`Config`].
#[derive(Clone, Debug, PartialEq)]
pub struct CacheSettings {
    pub scheduler: SchedulerConfig,
    pub screen: ScreenProbeSettings,
    pub base_spacing: f32,
    pub per_level_budgets: Vec<u32>,
    pub global_cpu_budget: u32,
    pub global_upload_byte_budget: u64,
    pub temporal_blend: f32,
    /// Log clipmap statistics every N frames; 0 disables.
    pub log_stats_every: u64,
}

impl CacheSettings {
    /// Validate `config` and extract the cache settings.
    pub fn from_config(config: &Config) -> Result<Self, GiError> {
        config.validate()?;
        let settings = Self::from_parts(config);
        settings.validate()?;
        Ok(settings)
    }

    /// Check the parts the config layer does not know about: screen-probe
    /// sizing and the capacity of the world-probe uniform block.
    pub fn validate(&self) -> Result<(), GiError> {
        self.screen.validate()?;
        WorldProbeUniforms::check_layout(&self.scheduler)?;
        Ok(())
    }

    fn from_parts(config: &Config) -> Self {
        let world = &config.world_probes;
        let screen = &config.screen_probes;
        Self {
            scheduler: SchedulerConfig {
                resolution: world.resolution,
                level_count: world.level_count,
                stale_after_frames: world.stale_after_frames.clone(),
                estimated_bytes_per_probe: world.estimated_bytes_per_probe,
            },
            screen: ScreenProbeSettings {
                probe_spacing: screen.probe_spacing,
                half_resolution: screen.half_resolution,
                atlas_tile_size: screen.atlas_tile_size,
            },
            base_spacing: world.base_spacing,
            per_level_budgets: world.per_level_budgets.clone(),
            global_cpu_budget: world.global_cpu_budget,
            global_upload_byte_budget: world.global_upload_byte_budget,
            temporal_blend: screen.temporal_blend,
            log_stats_every: config.debug.log_stats_every,
        }
    }

    fn budget(&self) -> UpdateBudget<'_> {
        UpdateBudget {
            per_level: &self.per_level_budgets,
            global_cpu: self.global_cpu_budget,
            global_upload_bytes: self.global_upload_byte_budget,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_parts(&Config::default())
    }
}

/// Completions applied by [`IndirectLightingCache::drain_completions`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Probes that became valid.
    pub valid: usize,
    /// Probes sent back to dirty (failed, or invalidated while in flight).
    pub retried: usize,
    /// Completions for slots that were not in flight.
    pub dropped: usize,
}

/// What one world-probe update did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorldProbeFrame {
    pub frame_index: u64,
    pub drained: DrainReport,
    /// Whether any placed level slid this frame.
    pub shifted: bool,
    /// Shift events raised this frame, in level order.
    pub shifts: Vec<AnchorShiftEvent>,
    /// Requests handed to the trace backend.
    pub dispatched: usize,
}

/// Probe-based indirect lighting cache: world-probe clipmap plus optional
/// screen-probe buffers.
pub struct IndirectLightingCache<B: ProbeImageBackend> {
    settings: CacheSettings,
    scheduler: WorldProbeScheduler,
    screen: Option<ScreenProbeBuffers<B>>,
    completion_tx: CompletionSender,
    completion_rx: crossbeam_channel::Receiver<TraceCompletion>,
    shifts: Rc<RefCell<Vec<AnchorShiftEvent>>>,
    frame_index: u64,
    outstanding: usize,
}

impl<B: ProbeImageBackend> IndirectLightingCache<B> {
    /// Build the cache. Without a `screen_backend` only world probes run.
    pub fn new(settings: CacheSettings, screen_backend: Option<B>) -> Result<Self, GiError> {
        settings.validate()?;
        let shifts = Rc::new(RefCell::new(Vec::new()));
        let scheduler = build_scheduler(&settings.scheduler, &shifts)?;
        let screen = screen_backend
            .map(|backend| ScreenProbeBuffers::new(backend, settings.screen.clone()))
            .transpose()?;
        let (tx, rx) = crossbeam_channel::unbounded();
        info!(
            resolution = settings.scheduler.resolution,
            levels = settings.scheduler.level_count,
            screen_probes = screen.is_some(),
            "indirect lighting cache created"
        );
        Ok(Self {
            settings,
            scheduler,
            screen,
            completion_tx: CompletionSender(tx),
            completion_rx: rx,
            shifts,
            frame_index: 0,
            outstanding: 0,
        })
    }

    /// Handle for reporting trace results from any thread.
    #[must_use]
    pub fn completion_sender(&self) -> CompletionSender {
        self.completion_tx.clone()
    }

    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Requests dispatched but not yet completed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    #[must_use]
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    #[must_use]
    pub fn scheduler(&self) -> &WorldProbeScheduler {
        &self.scheduler
    }

    /// Direct scheduler access, e.g. to subscribe additional shift listeners.
    pub fn scheduler_mut(&mut self) -> &mut WorldProbeScheduler {
        &mut self.scheduler
    }

    #[must_use]
    pub fn screen_probes(&self) -> Option<&ScreenProbeBuffers<B>> {
        self.screen.as_ref()
    }

    pub fn screen_probes_mut(&mut self) -> Option<&mut ScreenProbeBuffers<B>> {
        self.screen.as_mut()
    }

    /// Make sure screen-probe buffers match the output size.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool, GiError> {
        Ok(self.screen_mut()?.ensure_buffers(width, height)?)
    }

    /// Copy the lit scene into the screen-probe capture image.
    pub fn capture_scene(
        &mut self,
        source: &B::Source,
        width: u32,
        height: u32,
    ) -> Result<bool, GiError> {
        Ok(self.screen_mut()?.capture_scene(source, width, height))
    }

    /// Apply every completion received so far.
    pub fn drain_completions(&mut self) -> Result<DrainReport, GiError> {
        let mut report = DrainReport::default();
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.outstanding = self.outstanding.saturating_sub(1);
            match self
                .scheduler
                .complete(&completion.request, self.frame_index, completion.success)
            {
                Ok(ProbeState::Valid) => report.valid += 1,
                Ok(_) => report.retried += 1,
                Err(ClipmapError::NotInFlight { level, index }) => {
                    warn!(level, index, "dropped completion for probe not in flight");
                    report.dropped += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(report)
    }

    /// World-probe half of a frame: apply completions, follow the camera,
    /// select this frame's probes, and hand them to `backend`.
    pub fn update_world_probes(
        &mut self,
        camera_pos: Vec3,
        backend: &mut dyn ProbeTraceBackend,
    ) -> Result<WorldProbeFrame, GiError> {
        let drained = self.drain_completions()?;
        let base_spacing = self.settings.base_spacing;
        let shifted = self.scheduler.update_origins(camera_pos, base_spacing)?;
        let shifts = std::mem::take(&mut *self.shifts.borrow_mut());

        let requests = self.scheduler.build_update_list(
            self.frame_index,
            camera_pos,
            base_spacing,
            &self.settings.budget(),
        )?;
        let dispatched = requests.len();
        self.outstanding += dispatched;
        if dispatched > 0 {
            backend.dispatch(self.frame_index, requests, &self.completion_tx);
        }

        let every = self.settings.log_stats_every;
        if every > 0 && self.frame_index % every == 0 {
            let stats = self.scheduler.stats().combined();
            info!(
                frame = self.frame_index,
                valid = stats.valid,
                pending = stats.pending(),
                in_flight = stats.in_flight,
                stale = stats.stale,
                outstanding = self.outstanding,
                "world probe status"
            );
        }

        Ok(WorldProbeFrame {
            frame_index: self.frame_index,
            drained,
            shifted,
            shifts,
            dispatched,
        })
    }

    /// Screen-probe frame constants for the current frame.
    pub fn frame_uniforms(&self, jitter: Vec2) -> Result<FrameUniforms, GiError> {
        let screen = self.screen.as_ref().ok_or(GiError::ScreenProbesDisabled)?;
        let (width, height) = screen
            .dimensions()
            .ok_or(ScreenProbeError::NotInitialized)?;
        let (probe_count_x, probe_count_y) = screen
            .probe_count()
            .ok_or(ScreenProbeError::NotInitialized)?;
        let settings = screen.settings();
        Ok(FrameUniforms {
            frame_index: self.frame_index as u32,
            width,
            height,
            probe_spacing: settings.probe_spacing,
            probe_count_x,
            probe_count_y,
            atlas_tile_size: settings.atlas_tile_size,
            half_resolution: u32::from(settings.half_resolution),
            jitter_x: jitter.x,
            jitter_y: jitter.y,
            temporal_blend: self.settings.temporal_blend,
            history_valid: u32::from(screen.history_valid()),
        })
    }

    /// Clipmap placement constants for the current frame.
    pub fn world_probe_uniforms(&self) -> Result<WorldProbeUniforms, GiError> {
        Ok(WorldProbeUniforms::from_scheduler(
            &self.scheduler,
            self.settings.base_spacing,
        )?)
    }

    /// Close the frame: rotate screen-probe history and advance the frame index.
    pub fn end_frame(&mut self) -> Result<(), GiError> {
        if let Some(screen) = &mut self.screen
            && screen.is_initialized()
        {
            screen.swap_radiance_buffers()?;
        }
        self.frame_index += 1;
        Ok(())
    }

    /// Re-trace every world probe of every level inside a box, e.g. after
    /// geometry changed. Returns the number of slots covered.
    pub fn mark_dirty_world_aabb(&mut self, min: Vec3, max: Vec3) -> Result<usize, GiError> {
        let mut covered = 0;
        for level in 0..self.scheduler.level_count() {
            covered += self.scheduler.mark_dirty_world_aabb(
                level,
                min,
                max,
                self.settings.base_spacing,
            )?;
        }
        Ok(covered)
    }

    /// Throw away all cached lighting, e.g. on a camera cut or lighting change.
    pub fn invalidate(&mut self, reason: &str) {
        self.scheduler.invalidate_all();
        if let Some(screen) = &mut self.screen {
            screen.invalidate_cache(reason);
        }
        info!(reason, "indirect lighting invalidated");
    }

    /// Switch to new settings, e.g. after a config reload.
    ///
    /// A changed clipmap layout rebuilds the scheduler; results still in flight
    /// for the old layout are discarded. On error the cache keeps running with
    /// its previous world-probe settings.
    pub fn apply_settings(&mut self, settings: CacheSettings) -> Result<(), GiError> {
        if settings == self.settings {
            return Ok(());
        }
        settings.validate()?;
        let rebuilt = if settings.scheduler == self.settings.scheduler {
            None
        } else {
            Some(build_scheduler(&settings.scheduler, &self.shifts)?)
        };
        if let Some(screen) = &mut self.screen {
            screen.apply_settings(settings.screen.clone())?;
        }
        if let Some(scheduler) = rebuilt {
            self.scheduler = scheduler;
            let (tx, rx) = crossbeam_channel::unbounded();
            self.completion_tx = CompletionSender(tx);
            self.completion_rx = rx;
            debug!(discarded = self.outstanding, "rebuilt world-probe scheduler");
            self.outstanding = 0;
        }
        self.settings = settings;
        info!("applied indirect lighting settings");
        Ok(())
    }

    /// Slot counts for every level.
    #[must_use]
    pub fn stats(&self) -> ClipmapStats {
        self.scheduler.stats()
    }

    fn screen_mut(&mut self) -> Result<&mut ScreenProbeBuffers<B>, GiError> {
        self.screen.as_mut().ok_or(GiError::ScreenProbesDisabled)
    }
}

fn build_scheduler(
    config: &SchedulerConfig,
    shifts: &Rc<RefCell<Vec<AnchorShiftEvent>>>,
) -> Result<WorldProbeScheduler, GiError> {
    let mut scheduler = WorldProbeScheduler::new(config.clone())?;
    let sink = Rc::clone(shifts);
    scheduler.subscribe(move |event| sink.borrow_mut().push(event.clone()));
    Ok(scheduler)
}
