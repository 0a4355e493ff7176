//! Headless indirect-lighting demo.
//!
//! Flies a camera along a scripted path, keeps the world-probe clipmap fed
//! through a threaded simulated tracer, publishes the uniform blocks every
//! frame, and exercises the screen-probe buffers on the GPU when an adapter
//! is available.

mod tracer;

use std::path::Path;

use clap::Parser;
use glam::{Vec2, Vec3};
use nebula_config::{CliArgs, Config, default_config_dir};
use nebula_gi::{CacheSettings, GiError, IndirectLightingCache};
use nebula_screen_probes::{WgpuProbeBackend, create_headless_device};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use tracing::{debug, error, info, warn};

use crate::tracer::SimulatedTracer;

const TRACE_WORKERS: usize = 4;
const TRACE_FAILURE_RATE: f64 = 0.05;
const TRACE_SEED: u64 = 0x5EED;
const RELOAD_EVERY_FRAMES: u64 = 120;

fn main() {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    if let Some(log_file) =
        nebula_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config))
    {
        info!(path = %log_file.display(), "writing JSON log");
    }

    if let Err(err) = run(config, &config_dir, &args) {
        error!(error = %err, "indirect lighting demo failed");
        std::process::exit(1);
    }
}

/// Camera position for a frame: a slow orbit with a vertical bob, and a cut
/// to a distant location three quarters of the way through.
fn camera_path(frame: u64, frames: u64) -> Vec3 {
    let t = frame as f32 / 60.0;
    let orbit = Vec3::new(t.cos() * 40.0, (t * 0.5).sin() * 4.0, t.sin() * 40.0);
    if frames > 0 && frame >= frames * 3 / 4 {
        orbit + Vec3::new(5_000.0, 0.0, 0.0)
    } else {
        orbit
    }
}

fn create_scene_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("demo-scene-color"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba16Float,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn run(mut config: Config, config_dir: &Path, args: &CliArgs) -> Result<(), GiError> {
    let settings = CacheSettings::from_config(&config)?;

    let backend =
        create_headless_device().map(|(device, queue)| WgpuProbeBackend::new(device, queue));
    if backend.is_none() {
        warn!("no GPU adapter available, running world probes only");
    }
    let mut cache = IndirectLightingCache::new(settings, backend)?;
    let mut tracer = SimulatedTracer::new(TRACE_WORKERS, TRACE_FAILURE_RATE, TRACE_SEED);
    let mut rng = Xoshiro256StarStar::seed_from_u64(7);

    let frames = config.output.frames;
    let (mut width, mut height) = (config.output.width, config.output.height);
    let mut scene = None;
    if cache.screen_probes().is_some() {
        cache.resize(width, height)?;
        scene = cache
            .screen_probes()
            .map(|s| create_scene_texture(s.backend().device(), width, height));
    }

    let cut_frame = frames * 3 / 4;
    let mut dispatched = 0;
    let mut shifts = 0;
    for frame in 0..frames {
        if frame == cut_frame && frame > 0 {
            cache.invalidate("camera cut");
        }
        if frame == frames / 2 {
            // Simulated geometry edit next to the camera.
            let center = camera_path(frame, frames);
            let covered = cache
                .mark_dirty_world_aabb(center - Vec3::splat(3.0), center + Vec3::splat(3.0))?;
            info!(frame, covered, "geometry edit invalidated probes");
        }

        let report = cache.update_world_probes(camera_path(frame, frames), &mut tracer)?;
        dispatched += report.dispatched;
        shifts += report.shifts.len();
        for shift in &report.shifts {
            debug!(
                level = shift.level,
                delta = ?shift.delta_probes,
                ring = ?shift.new_ring_offset,
                teleport = shift.is_teleport(cache.scheduler().resolution()),
                "anchor shift"
            );
        }

        let world_block = cache.world_probe_uniforms()?.pack()?;
        if cache.screen_probes().is_some() {
            if let Some(scene) = &scene {
                cache.capture_scene(scene, width, height)?;
            }
            let jitter = Vec2::new(rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5));
            let frame_block = cache.frame_uniforms(jitter)?.pack()?;
            debug!(
                frame,
                frame_bytes = frame_block.len(),
                world_bytes = world_block.len(),
                "published uniforms"
            );
        }
        cache.end_frame()?;

        if frame > 0 && frame % RELOAD_EVERY_FRAMES == 0 {
            match config.reload(config_dir) {
                Ok(Some(mut reloaded)) => {
                    reloaded.apply_cli_overrides(args);
                    let settings = CacheSettings::from_config(&reloaded)?;
                    cache.apply_settings(settings)?;
                    if (reloaded.output.width, reloaded.output.height) != (width, height)
                        && cache.screen_probes().is_some()
                    {
                        (width, height) = (reloaded.output.width, reloaded.output.height);
                        cache.resize(width, height)?;
                        scene = cache
                            .screen_probes()
                            .map(|s| create_scene_texture(s.backend().device(), width, height));
                    }
                    config = reloaded;
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "config reload failed, keeping current settings"),
            }
            if cache.screen_probes().is_some_and(|s| !s.is_initialized()) {
                cache.resize(width, height)?;
            }
        }
    }

    tracer.shutdown();
    let drained = cache.drain_completions()?;
    let stats = cache.stats().combined();
    info!(
        frames,
        dispatched,
        shifts,
        final_valid = drained.valid,
        valid = stats.valid,
        dirty = stats.dirty,
        stale = stats.stale,
        uninitialized = stats.uninitialized,
        outstanding = cache.outstanding(),
        "indirect lighting demo finished"
    );
    if let Some(screen) = cache.screen_probes() {
        info!(
            allocations = screen.allocation_generation(),
            invalidations = screen.invalidation_count(),
            resident_bytes = screen.resident_bytes(),
            "screen probe summary"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_path_cuts_late() {
        let before = camera_path(74, 100);
        let after = camera_path(75, 100);
        assert!(before.distance(after) > 1_000.0);
        assert!(camera_path(10, 100).length() < 100.0);
    }

    #[test]
    fn test_short_run_completes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output.width = 320;
        config.output.height = 180;
        config.output.frames = 8;
        config.world_probes.resolution = 8;
        config.save(dir.path()).unwrap();
        run(config, dir.path(), &CliArgs::default()).unwrap();
    }
}
