//! Command-line overrides.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Command-line arguments of the indirect-lighting demo.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "nebula-gi", about = "Probe-based indirect lighting cache")]
pub struct CliArgs {
    /// Render width.
    #[arg(long)]
    pub width: Option<u32>,

    /// Render height.
    #[arg(long)]
    pub height: Option<u32>,

    /// Number of frames to simulate.
    #[arg(long)]
    pub frames: Option<u64>,

    /// Screen-probe spacing in pixels.
    #[arg(long)]
    pub spacing: Option<u32>,

    /// World-probe resolution per axis.
    #[arg(long)]
    pub resolution: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(w) = args.width {
            self.output.width = w;
        }
        if let Some(h) = args.height {
            self.output.height = h;
        }
        if let Some(frames) = args.frames {
            self.output.frames = frames;
        }
        if let Some(spacing) = args.spacing {
            self.screen_probes.probe_spacing = spacing;
        }
        if let Some(resolution) = args.resolution {
            self.world_probes.resolution = resolution;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
