//! Cache configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::errors::{CacheError, CacheResult};
use crate::infrastructure::image::default_cache_dir;

const APP_NAME: &str = "texcache";
const APP_QUALIFIER: &str = "org";
const APP_ORGANIZATION: &str = "texcache";

/// Lifetime, in seconds, of an entry that is not requested again.
pub const DEFAULT_LIFETIME_SECS: f32 = 1.5;
/// Playback speed divisor applied to millisecond frame delays. 1000 plays in real time.
pub const DEFAULT_ANIMATION_SPEED: f32 = 1000.0;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Process-wide cache configuration, set once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for fetched image bytes and their sidecars.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Log file path (binary only).
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Lifetime given to entries when a request does not specify one.
    #[serde(default = "default_lifetime_secs")]
    pub default_lifetime_secs: f32,

    /// Playback speed used when a request does not specify one.
    #[serde(default = "default_animation_speed")]
    pub animation_speed: f32,

    /// Upper bound on a single background fetch or decode.
    #[serde(default = "default_max_fetch_duration_secs")]
    pub max_fetch_duration_secs: u64,

    /// Background jobs allowed to run at once. Defaults to the available parallelism.
    #[serde(default)]
    pub max_concurrent_fetches: Option<usize>,

    /// How long a finished job keeps its concurrency slot.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Tick time after which a completed but unclaimed result is dropped.
    #[serde(default = "default_handoff_ttl_secs")]
    pub handoff_ttl_secs: f32,

    /// Tick time during which a failed key is not fetched again. Zero retries immediately.
    #[serde(default)]
    pub retry_cooldown_secs: f32,

    /// Disk-cached bytes older than this are ignored by the disk short-circuit.
    #[serde(default)]
    pub disk_cache_max_age_secs: Option<u64>,
}

const fn default_lifetime_secs() -> f32 {
    DEFAULT_LIFETIME_SECS
}

const fn default_animation_speed() -> f32 {
    DEFAULT_ANIMATION_SPEED
}

const fn default_max_fetch_duration_secs() -> u64 {
    5
}

const fn default_settle_delay_ms() -> u64 {
    500
}

const fn default_handoff_ttl_secs() -> f32 {
    5.0
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_path: None,
            log_level: LogLevel::Info,
            default_lifetime_secs: DEFAULT_LIFETIME_SECS,
            animation_speed: DEFAULT_ANIMATION_SPEED,
            max_fetch_duration_secs: default_max_fetch_duration_secs(),
            max_concurrent_fetches: None,
            settle_delay_ms: default_settle_delay_ms(),
            handoff_ttl_secs: default_handoff_ttl_secs(),
            retry_cooldown_secs: 0.0,
            disk_cache_max_age_secs: None,
        }
    }
}

impl CacheConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    /// Returns `CacheError::Config` if the document is malformed or invalid.
    pub fn from_toml_str(content: &str) -> CacheResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CacheError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration file, falling back to defaults when it does not exist.
    ///
    /// A file that cannot be parsed is reported and replaced by defaults.
    ///
    /// # Errors
    /// Returns `CacheError::Io` if an existing file cannot be read.
    pub fn load(path_override: Option<&Path>) -> CacheResult<Self> {
        let Some(path) = path_override
            .map(Path::to_path_buf)
            .or_else(Self::default_config_path)
        else {
            return Ok(Self::default());
        };

        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| CacheError::io(format!("failed to read {}: {e}", path.display())))?;
        match Self::from_toml_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("Failed to load config file: {}. Using defaults.", e);
                Ok(Self::default())
            }
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// Returns `CacheError::Config` naming the first offending field.
    pub fn validate(&self) -> CacheResult<()> {
        if !(self.default_lifetime_secs >= 0.0) {
            return Err(CacheError::Config(
                "default_lifetime_secs must be non-negative".to_string(),
            ));
        }
        if !(self.animation_speed > 0.0) {
            return Err(CacheError::Config(
                "animation_speed must be positive".to_string(),
            ));
        }
        if self.max_concurrent_fetches == Some(0) {
            return Err(CacheError::Config(
                "max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        if self.max_fetch_duration_secs == 0 {
            return Err(CacheError::Config(
                "max_fetch_duration_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("texcache.log"))
    }

    /// Returns effective cache directory.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }

    /// Upper bound on one background job.
    #[must_use]
    pub const fn max_fetch_duration(&self) -> Duration {
        Duration::from_secs(self.max_fetch_duration_secs)
    }

    /// Number of background jobs allowed at once.
    #[must_use]
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_concurrent_fetches.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
        })
    }

    /// How long a finished job keeps its concurrency slot.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Staleness bound of the disk short-circuit.
    #[must_use]
    pub fn disk_cache_max_age(&self) -> Option<Duration> {
        self.disk_cache_max_age_secs.map(Duration::from_secs)
    }
}

use super::args::CliArgs;

impl CacheConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(cache_dir) = &args.cache_dir {
            self.cache_dir = Some(cache_dir.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
    }
}
