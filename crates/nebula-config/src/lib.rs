//! Configuration for the indirect-lighting cache.
//!
//! Settings persist to disk as `config.ron`, can be overridden from the
//! command line via clap, and are hot-reloadable.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    Config, DebugConfig, OutputConfig, ScreenProbeConfig, WorldProbeConfig,
    default_config_dir,
};
pub use error::ConfigError;
