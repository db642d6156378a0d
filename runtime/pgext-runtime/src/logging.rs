///
/// Log output for the in-process host.
///
/// Installs a `tracing-subscriber` formatter on stderr at the configured
/// level. Only the first call installs anything, so tests and embedders may
/// call `init` freely.
///

use crate::config::LogConfig;
use crate::error::ConfigError;

pub fn init(config: &LogConfig) -> Result<(), ConfigError> {
    let level = config.level_filter()?;
    let installed = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_max_level(level)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(%level, "logging initialized");
    }
    Ok(())
}
