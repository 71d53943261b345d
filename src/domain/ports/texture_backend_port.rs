//! Port for the renderer's texture objects.

use crate::domain::entities::{TextureId, TextureUpload};

/// Creates and destroys renderer textures.
///
/// Both methods are only ever called from the thread that drives the
/// [`crate::application::ImageManager`].
pub trait TextureBackend: Send + Sync {
    /// Uploads RGBA pixels and returns the new handle.
    fn create_texture(&self, upload: TextureUpload<'_>) -> TextureId;

    /// Releases a handle previously returned by `create_texture`.
    fn destroy_texture(&self, texture: TextureId);
}
