//! Cached units held by the resource stores.

use std::sync::Arc;

use serde::Serialize;

use crate::domain::entities::{AnimatedImage, ImageMeta, TextureId, TextureUpload};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::TextureBackend;

/// What a caller gets back for a ready entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CachedImage {
    /// Decoded dimensions.
    pub meta: ImageMeta,
    /// Current renderer texture.
    pub texture: TextureId,
}

/// A decoded image, its texture and its remaining lifetime.
pub struct ResourceEntry {
    image: CachedImage,
    remaining_lifetime: f32,
    unload_override: Option<Arc<dyn TextureBackend>>,
}

impl ResourceEntry {
    /// Creates an entry for an already uploaded texture.
    ///
    /// `unload_override` is the backend that created the texture when it was not the default one.
    #[must_use]
    pub fn new(
        image: CachedImage,
        lifetime: f32,
        unload_override: Option<Arc<dyn TextureBackend>>,
    ) -> Self {
        Self {
            image,
            remaining_lifetime: lifetime,
            unload_override,
        }
    }

    /// The cached image.
    #[must_use]
    pub const fn image(&self) -> &CachedImage {
        &self.image
    }

    /// Current texture handle.
    #[must_use]
    pub const fn texture(&self) -> TextureId {
        self.image.texture
    }

    /// Seconds left before the sweep evicts this entry.
    #[must_use]
    pub const fn remaining_lifetime(&self) -> f32 {
        self.remaining_lifetime
    }

    /// Resets the lifetime on a cache hit.
    pub fn refresh(&mut self, lifetime: f32) {
        self.remaining_lifetime = lifetime;
    }

    /// Counts the lifetime down. Returns true once it has dropped below zero.
    pub fn age(&mut self, dt: f32) -> bool {
        self.remaining_lifetime -= dt;
        self.remaining_lifetime < 0.0
    }

    /// The backend that owns this entry's texture.
    #[must_use]
    pub fn owner<'a>(&'a self, default: &'a dyn TextureBackend) -> &'a dyn TextureBackend {
        match &self.unload_override {
            Some(backend) => backend.as_ref(),
            None => default,
        }
    }

    /// Replaces the texture, destroying the previous one through its owner.
    pub fn replace_texture(&mut self, default: &dyn TextureBackend, upload: TextureUpload<'_>) {
        let old = self.image.texture;
        let owner = self.owner(default);
        if !old.is_null() {
            owner.destroy_texture(old);
        }
        let texture = owner.create_texture(upload);
        self.image.texture = texture;
    }

    /// Destroys the texture. The entry must not be used afterwards.
    pub fn release(&mut self, default: &dyn TextureBackend) {
        if self.image.texture.is_null() {
            return;
        }
        self.owner(default).destroy_texture(self.image.texture);
        self.image.texture = TextureId::NULL;
    }
}

impl std::fmt::Debug for ResourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceEntry")
            .field("image", &self.image)
            .field("remaining_lifetime", &self.remaining_lifetime)
            .field("has_unload_override", &self.unload_override.is_some())
            .finish()
    }
}

/// A multi-frame entry.
///
/// Frame 0 is uploaded when the entry is created. After that `current_frame`
/// names the next frame to upload and stays in `[1, frame_count)`, wrapping back
/// to 1, so the first frame only ever plays once.
pub struct AnimatedResourceEntry {
    pub(crate) entry: ResourceEntry,
    frames: Vec<u8>,
    delays_ms: Vec<u32>,
    pub(crate) current_frame: usize,
    pub(crate) accumulated: f32,
}

impl AnimatedResourceEntry {
    /// Uploads frame 0 through `backend` and builds the entry.
    ///
    /// # Errors
    /// Returns `CacheError::Decode` if the frame buffer does not hold exactly one
    /// RGBA frame per delay entry.
    pub fn new(
        image: AnimatedImage,
        lifetime: f32,
        backend: &dyn TextureBackend,
        unload_override: Option<Arc<dyn TextureBackend>>,
    ) -> CacheResult<Self> {
        let frame_len = image.meta.frame_len();
        let frame_count = image.frame_count();
        if frame_count == 0 || frame_len == 0 || image.frames.len() != frame_len * frame_count {
            return Err(CacheError::decode(format!(
                "animated image has {} bytes for {frame_count} frames of {frame_len} bytes",
                image.frames.len()
            )));
        }

        let texture = backend.create_texture(TextureUpload {
            meta: image.meta,
            pixels: &image.frames[..frame_len],
        });

        Ok(Self {
            entry: ResourceEntry::new(
                CachedImage {
                    meta: image.meta,
                    texture,
                },
                lifetime,
                unload_override,
            ),
            frames: image.frames,
            delays_ms: image.delays_ms,
            current_frame: usize::from(frame_count > 1),
            accumulated: 0.0,
        })
    }

    /// Shared entry state.
    #[must_use]
    pub const fn entry(&self) -> &ResourceEntry {
        &self.entry
    }

    /// Number of frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.delays_ms.len()
    }

    /// Index of the next frame to upload.
    #[must_use]
    pub const fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Seconds accumulated towards the next frame swap.
    #[must_use]
    pub const fn accumulated_time(&self) -> f32 {
        self.accumulated
    }

    /// Delay of `frame` in seconds at the given playback speed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn frame_delay(&self, frame: usize, speed: f32) -> f32 {
        self.delays_ms.get(frame).map_or(0.0, |&ms| ms as f32 / speed)
    }

    /// Replaces the texture with one built from `frame`.
    pub fn show_frame(&mut self, frame: usize, default: &dyn TextureBackend) {
        let meta = self.entry.image.meta;
        let len = meta.frame_len();
        let start = (frame % self.delays_ms.len()) * len;
        let upload = TextureUpload {
            meta,
            pixels: &self.frames[start..start + len],
        };
        self.entry.replace_texture(default, upload);
    }

    /// Bytes held for all frames.
    #[must_use]
    pub fn frame_buffer_len(&self) -> usize {
        self.frames.len()
    }
}

impl std::fmt::Debug for AnimatedResourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimatedResourceEntry")
            .field("entry", &self.entry)
            .field("frame_count", &self.frame_count())
            .field("current_frame", &self.current_frame)
            .field("accumulated", &self.accumulated)
            .finish_non_exhaustive()
    }
}

/// Common access used by the generic store and the eviction sweep.
pub trait CacheEntry {
    /// Shared entry state.
    fn core(&self) -> &ResourceEntry;

    /// Mutable shared entry state.
    fn core_mut(&mut self) -> &mut ResourceEntry;

    /// Called once per tick for entries that survived the lifetime check.
    fn on_tick(&mut self, _dt: f32) {}
}

impl CacheEntry for ResourceEntry {
    fn core(&self) -> &ResourceEntry {
        self
    }

    fn core_mut(&mut self) -> &mut ResourceEntry {
        self
    }
}

impl CacheEntry for AnimatedResourceEntry {
    fn core(&self) -> &ResourceEntry {
        &self.entry
    }

    fn core_mut(&mut self) -> &mut ResourceEntry {
        &mut self.entry
    }

    fn on_tick(&mut self, dt: f32) {
        self.accumulated += dt;
    }
}
