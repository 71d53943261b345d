//! Domain layer with cache entities, capability ports and error types.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Capability port definitions.
pub mod ports;

pub use entities::{CachedImage, ImageState, ResourceKey, StoreKind, TextureId};
pub use errors::{CacheError, CacheResult};
pub use ports::{HttpFetcher, ImageDecoder, PlaceholderPainter, TextureBackend};
