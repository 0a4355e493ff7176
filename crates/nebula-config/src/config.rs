//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level indirect-lighting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Output surface settings.
    pub output: OutputConfig,
    /// Screen-space probe settings.
    pub screen_probes: ScreenProbeConfig,
    /// World-space probe clipmap settings.
    pub world_probes: WorldProbeConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Output surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Render width in pixels.
    pub width: u32,
    /// Render height in pixels.
    pub height: u32,
    /// Frames to simulate in headless runs.
    pub frames: u64,
}

/// Screen-space probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreenProbeConfig {
    /// Pixels between screen probes.
    pub probe_spacing: u32,
    /// Resolve indirect diffuse at half resolution.
    pub half_resolution: bool,
    /// Directional atlas tile edge in texels.
    pub atlas_tile_size: u32,
    /// Weight of history in the temporal pass (0.0 - 1.0).
    pub temporal_blend: f32,
}

/// World-space probe clipmap configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldProbeConfig {
    /// Probes per axis on every level.
    pub resolution: u32,
    /// Number of clipmap levels.
    pub level_count: u32,
    /// Probe spacing of level 0 in meters; doubles per level.
    pub base_spacing: f32,
    /// Age in frames after which a valid probe is re-traced, per level.
    pub stale_after_frames: Vec<u64>,
    /// Maximum probes traced per frame, per level.
    pub per_level_budgets: Vec<u32>,
    /// Maximum probes traced per frame across all levels.
    pub global_cpu_budget: u32,
    /// Maximum estimated upload bytes per frame across all levels.
    pub global_upload_byte_budget: u64,
    /// Upload size assumed for one probe.
    pub estimated_bytes_per_probe: u64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Log clipmap statistics every N frames (0 = never).
    pub log_stats_every: u64,
}

// --- Default implementations ---

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frames: 600,
        }
    }
}

impl Default for ScreenProbeConfig {
    fn default() -> Self {
        Self {
            probe_spacing: 8,
            half_resolution: true,
            atlas_tile_size: 8,
            temporal_blend: 0.9,
        }
    }
}

impl Default for WorldProbeConfig {
    fn default() -> Self {
        Self {
            resolution: 32,
            level_count: 4,
            base_spacing: 1.0,
            stale_after_frames: vec![60, 120, 240, 480],
            per_level_budgets: vec![128, 64, 32, 16],
            global_cpu_budget: 192,
            global_upload_byte_budget: 192 * 576,
            estimated_bytes_per_probe: 576,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_stats_every: 60,
        }
    }
}

// --- Validation ---

impl Config {
    /// Reject values the probe systems cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: String| {
            Err(ConfigError::Invalid { field, reason })
        };
        if self.output.width == 0 || self.output.height == 0 {
            return invalid(
                "output",
                format!("size {}x{} is empty", self.output.width, self.output.height),
            );
        }
        if self.screen_probes.probe_spacing == 0 {
            return invalid("screen_probes.probe_spacing", "must be positive".into());
        }
        if self.screen_probes.atlas_tile_size == 0 {
            return invalid("screen_probes.atlas_tile_size", "must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.screen_probes.temporal_blend) {
            return invalid(
                "screen_probes.temporal_blend",
                format!("{} is outside 0.0..=1.0", self.screen_probes.temporal_blend),
            );
        }

        let world = &self.world_probes;
        if world.resolution == 0 {
            return invalid("world_probes.resolution", "must be positive".into());
        }
        if world.level_count == 0 {
            return invalid("world_probes.level_count", "must be positive".into());
        }
        if !(world.base_spacing.is_finite() && world.base_spacing > 0.0) {
            return invalid(
                "world_probes.base_spacing",
                format!("{} is not a positive finite length", world.base_spacing),
            );
        }
        if world.estimated_bytes_per_probe == 0 {
            return invalid(
                "world_probes.estimated_bytes_per_probe",
                "must be positive".into(),
            );
        }
        let levels = world.level_count as usize;
        if world.stale_after_frames.len() < levels {
            return invalid(
                "world_probes.stale_after_frames",
                format!("{} entries for {levels} levels", world.stale_after_frames.len()),
            );
        }
        if world.per_level_budgets.len() < levels {
            return invalid(
                "world_probes.per_level_budgets",
                format!("{} entries for {levels} levels", world.per_level_budgets.len()),
            );
        }
        Ok(())
    }
}

// --- Load / Save / Reload ---

/// Per-user config directory, falling back to the working directory.
#[must_use]
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nebula-gi")
}

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            tracing::info!(path = %config_path.display(), "loaded config");
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            tracing::info!(path = %config_path.display(), "created default config");
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            tracing::info!("config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("probe_spacing: 8"));
        assert!(ron_str.contains("estimated_bytes_per_probe: 576"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(output: (width: 640), debug: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.output.width, 640);
        assert_eq!(config.output.height, 720);
        assert_eq!(config.world_probes, WorldProbeConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_rejects_short_budget_list() {
        let mut config = Config::default();
        config.world_probes.per_level_budgets = vec![64, 32];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "world_probes.per_level_budgets",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_non_positive_values() {
        let mut config = Config::default();
        config.world_probes.base_spacing = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.screen_probes.probe_spacing = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.world_probes.level_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output.width = 1920;
        config.world_probes.stale_after_frames = vec![30, 60, 90, 120];

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.screen_probes.half_resolution = false;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert!(!result.unwrap().screen_probes.half_resolution);
        assert!(config.reload(dir.path()).unwrap().is_some());
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }
}
