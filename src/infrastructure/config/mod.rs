//! Cache configuration and command-line arguments.

pub mod args;
pub mod cache_config;

pub use args::{CliArgs, Command};
pub use cache_config::{CacheConfig, DEFAULT_ANIMATION_SPEED, DEFAULT_LIFETIME_SECS, LogLevel};
