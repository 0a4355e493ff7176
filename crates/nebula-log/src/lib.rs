//! Tracing subscriber setup for the indirect-lighting cache.
//!
//! Console output carries an uptime timer and module paths so per-frame
//! scheduler events can be lined up. Debug builds additionally write JSON
//! lines to a file for offline analysis of selection and allocation traces.

use std::path::{Path, PathBuf};

use nebula_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Noise suppression appended to every configured level.
const DEPENDENCY_DIRECTIVES: &str = "wgpu=warn,naga=warn";

/// File name of the JSON log inside the log directory.
pub const LOG_FILE_NAME: &str = "nebula-gi.log";

/// Build filter directives from the configured log level.
///
/// A bare level such as `debug` gets the dependency directives appended; a
/// full directive list is used verbatim.
#[must_use]
pub fn filter_directives(config: Option<&Config>) -> String {
    let level = config
        .map(|c| c.debug.log_level.trim())
        .filter(|level| !level.is_empty())
        .unwrap_or("info");
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("{level},{DEPENDENCY_DIRECTIVES}")
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the config. Returns the JSON log path when
/// file logging was enabled (debug builds with a writable `log_dir`).
pub fn init_logging(
    log_dir: Option<&Path>,
    debug_build: bool,
    config: Option<&Config>,
) -> Option<PathBuf> {
    let directives = filter_directives(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if debug_build
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join(LOG_FILE_NAME))
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return Some(log_dir.join(LOG_FILE_NAME));
    }

    subscriber.init();
    None
}

/// Filter used when no config is available.
#[must_use]
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(filter_directives(None))
}
