//! Image adapters.
//!
//! This module provides:
//! - Decoding through the `image` crate
//! - Disk caching of fetched bytes with staleness sidecars
//! - HTTP downloads through reqwest

pub mod decoder;
pub mod disk_cache;
pub mod http_fetcher;

pub use decoder::ImageCrateDecoder;
pub use disk_cache::{DiskEntry, DiskImageCache, PurgeReport, default_cache_dir};
pub use http_fetcher::{ReqwestFetcher, join_url};
