//! Infrastructure layer with adapters for the codec, filesystem, HTTP and configuration.

/// Configuration.
pub mod config;
/// Image decoding, disk caching and downloading.
pub mod image;

pub use config::{CacheConfig, CliArgs, Command, LogLevel};
pub use image::{DiskImageCache, ImageCrateDecoder, PurgeReport, ReqwestFetcher};
