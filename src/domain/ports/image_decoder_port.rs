//! Port for the image codec.

use std::path::Path;

use crate::domain::entities::{AnimatedImage, DecodedImage};
use crate::domain::errors::{CacheError, CacheResult};

/// Decodes encoded image bytes into RGBA pixels.
pub trait ImageDecoder: Send + Sync {
    /// Decodes a still image.
    ///
    /// # Errors
    /// Returns `CacheError::Decode` if the bytes are not a supported image.
    fn decode(&self, bytes: &[u8]) -> CacheResult<DecodedImage>;

    /// Decodes every frame of an animated image.
    ///
    /// # Errors
    /// Returns `CacheError::Decode` if the bytes are not a supported image.
    fn decode_animated(&self, bytes: &[u8]) -> CacheResult<AnimatedImage>;

    /// Reads and decodes a still image file.
    ///
    /// # Errors
    /// Returns `CacheError::Decode` if the file is unreadable or undecodable.
    fn decode_file(&self, path: &Path) -> CacheResult<DecodedImage> {
        self.decode(&read_image_file(path)?)
    }

    /// Reads and decodes an animated image file.
    ///
    /// # Errors
    /// Returns `CacheError::Decode` if the file is unreadable or undecodable.
    fn decode_animated_file(&self, path: &Path) -> CacheResult<AnimatedImage> {
        self.decode_animated(&read_image_file(path)?)
    }
}

fn read_image_file(path: &Path) -> CacheResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| CacheError::decode(format!("failed to read {}: {e}", path.display())))
}
