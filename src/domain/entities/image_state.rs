//! Foreground view of an image request.

use crate::domain::entities::{CachedImage, TextureId};
use crate::domain::errors::CacheError;

/// Outcome of a single image request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState<'a> {
    /// The image is cached and its texture can be drawn.
    Ready(&'a CachedImage),
    /// A background job for this key has not finished yet.
    Loading,
    /// The request failed. Nothing was cached; a later request retries.
    Failed(CacheError),
}

impl<'a> ImageState<'a> {
    /// Returns true if the image can be drawn.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Returns true if a background job is still running.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns true if the request failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The cached image, if ready.
    #[must_use]
    pub const fn image(&self) -> Option<&'a CachedImage> {
        match self {
            Self::Ready(image) => Some(image),
            _ => None,
        }
    }

    /// The texture to draw, if ready.
    #[must_use]
    pub fn texture(&self) -> Option<TextureId> {
        self.image().map(|image| image.texture)
    }
}
