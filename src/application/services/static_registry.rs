//! Textures that live until the host explicitly unloads them.

use std::sync::Arc;

use tracing::debug;

use crate::domain::entities::TextureId;
use crate::domain::ports::TextureBackend;

/// A registered handle and the backend that created it, when that was not the
/// default one.
pub struct StaticTexture {
    /// Renderer handle.
    pub texture: TextureId,
    /// Override backend that owns `texture`.
    pub owner: Option<Arc<dyn TextureBackend>>,
}

impl StaticTexture {
    /// Destroys the texture through its owner, or `default` if it has none.
    pub fn destroy(&self, default: &dyn TextureBackend) {
        match &self.owner {
            Some(owner) => owner.destroy_texture(self.texture),
            None => default.destroy_texture(self.texture),
        }
    }
}

impl std::fmt::Debug for StaticTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTexture")
            .field("texture", &self.texture)
            .field("has_owner", &self.owner.is_some())
            .finish()
    }
}

/// Handles of textures loaded outside the lifetime-managed stores, in load order.
///
/// The registry never destroys anything by itself; it only records which
/// handles are still owned so that a second unload of the same handle is
/// a no-op.
#[derive(Debug, Default)]
pub struct StaticImageRegistry {
    textures: Vec<StaticTexture>,
}

impl StaticImageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly created texture and the override backend that made it.
    pub fn register(&mut self, texture: TextureId, owner: Option<Arc<dyn TextureBackend>>) {
        debug!(texture = %texture, has_owner = owner.is_some(), "Registered static texture");
        self.textures.push(StaticTexture { texture, owner });
    }

    /// Forgets the first registration of `texture` and returns it, so the
    /// caller can destroy it. Returns `None` if it is not registered.
    pub fn take(&mut self, texture: TextureId) -> Option<StaticTexture> {
        let index = self.textures.iter().position(|t| t.texture == texture)?;
        Some(self.textures.remove(index))
    }

    /// Forgets every texture and returns them, in load order, for destruction.
    pub fn take_all(&mut self) -> Vec<StaticTexture> {
        std::mem::take(&mut self.textures)
    }

    /// Registered handles in load order.
    #[must_use]
    pub fn textures(&self) -> Vec<TextureId> {
        self.textures.iter().map(|t| t.texture).collect()
    }

    /// Number of registered handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}
