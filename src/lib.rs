//! texcache - A time-to-live cache of decoded images for immediate-mode UIs.
//!
//! This crate keeps decoded images and their renderer textures alive for as
//! long as they are requested, decodes animations and fetches network images
//! in the background, and persists fetched bytes in a disk cache.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the cache engine.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;
/// Presentation layer containing placeholder painting.
pub mod presentation;

pub use application::{ImageManager, ImageManagerBuilder, LoadOptions, NetworkRequest};
pub use domain::{
    CacheError, CacheResult, ImageState, PlaceholderPainter, ResourceKey, StoreKind, TextureBackend,
    TextureId,
};

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = "texcache";
