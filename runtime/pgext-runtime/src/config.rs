///
/// # Host Configuration
///
/// The in-process host reads an optional TOML file. Every field has a
/// default, so an empty document is a valid configuration.
///
/// ## Example pgext.toml
///
/// ```toml
/// [log]
/// level = "debug"
///
/// [toast]
/// compression = "deflate"
/// compress_threshold = 2032
/// external_threshold = 2032
/// chunk_size = 1996
///
/// [spi]
/// database = "/var/lib/pgext/test.db"
/// ```
///
/// `compress_threshold` is the payload size above which values are
/// compressed, `external_threshold` the stored size above which they move
/// to the out-of-line toast table, in chunks of `chunk_size` bytes.
/// `database` is the SQLite database that SPI statements run against;
/// `":memory:"` keeps it in memory.
///

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

use crate::error::ConfigError;

pub const DEFAULT_TOAST_THRESHOLD: usize = 2032;
pub const DEFAULT_TOAST_CHUNK_SIZE: usize = 1996;
pub const IN_MEMORY_DATABASE: &str = ":memory:";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub log: LogConfig,
    pub toast: ToastConfig,
    pub spi: SpiConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level \"{}\"", self.level)))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Deflate,
    None,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToastConfig {
    pub compression: Compression,
    pub compress_threshold: usize,
    pub external_threshold: usize,
    pub chunk_size: usize,
}

impl Default for ToastConfig {
    fn default() -> Self {
        Self {
            compression: Compression::Deflate,
            compress_threshold: DEFAULT_TOAST_THRESHOLD,
            external_threshold: DEFAULT_TOAST_THRESHOLD,
            chunk_size: DEFAULT_TOAST_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SpiConfig {
    pub database: String,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            database: IN_MEMORY_DATABASE.to_string(),
        }
    }
}

impl SpiConfig {
    pub fn is_in_memory(&self) -> bool {
        self.database == IN_MEMORY_DATABASE
    }
}

impl HostConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log.level_filter()?;
        if self.toast.chunk_size == 0 {
            return Err(ConfigError::Invalid("toast.chunk_size must be positive".to_string()));
        }
        if self.spi.database.trim().is_empty() {
            return Err(ConfigError::Invalid("spi.database must not be empty".to_string()));
        }
        Ok(())
    }
}
