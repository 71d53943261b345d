//! Domain entities.

mod geometry;
mod image_state;
mod resource_entry;
mod resource_key;
mod texture;

pub use geometry::{Point, Rect};
pub use image_state::ImageState;
pub use resource_entry::{AnimatedResourceEntry, CacheEntry, CachedImage, ResourceEntry};
pub use resource_key::{ResourceKey, StoreKind};
pub use texture::{
    AnimatedImage, DecodedImage, ImageMeta, RGBA_CHANNELS, TextureId, TextureUpload,
};
