//! Texture handles and decoded pixel data.

use serde::Serialize;

/// Bytes per pixel of every buffer handed to a texture backend.
pub const RGBA_CHANNELS: usize = 4;

/// Opaque renderer texture handle. Zero means "not loaded".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TextureId(pub u64);

impl TextureId {
    /// The "no texture" handle.
    pub const NULL: Self = Self(0);

    /// Returns true if this handle refers to no texture.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for TextureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#X}", self.0)
    }
}

/// Dimensions recorded when an image is decoded. Immutable afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImageMeta {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Channel count of the source image (the pixel buffer itself is always RGBA).
    pub channels: u8,
}

impl ImageMeta {
    /// Size in bytes of one RGBA frame with these dimensions.
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * RGBA_CHANNELS
    }
}

/// Borrowed RGBA pixels passed to [`crate::domain::ports::TextureBackend::create_texture`].
#[derive(Debug, Clone, Copy)]
pub struct TextureUpload<'a> {
    /// Dimensions of the pixel buffer.
    pub meta: ImageMeta,
    /// Tightly packed RGBA8 pixels, `meta.frame_len()` bytes.
    pub pixels: &'a [u8],
}

/// A still image decoded to RGBA8.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Dimensions and source channel count.
    pub meta: ImageMeta,
    /// RGBA8 pixels.
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Borrows the pixels for upload.
    #[must_use]
    pub fn upload(&self) -> TextureUpload<'_> {
        TextureUpload {
            meta: self.meta,
            pixels: &self.pixels,
        }
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("meta", &self.meta)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// A multi-frame image decoded to concatenated RGBA8 frames.
#[derive(Clone, PartialEq, Eq)]
pub struct AnimatedImage {
    /// Dimensions shared by every frame.
    pub meta: ImageMeta,
    /// All frames back to back, `meta.frame_len()` bytes each.
    pub frames: Vec<u8>,
    /// One delay per frame, in milliseconds.
    pub delays_ms: Vec<u32>,
}

impl AnimatedImage {
    /// Number of frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.delays_ms.len()
    }

    /// Wraps a still image as a one-frame animation.
    #[must_use]
    pub fn single(image: DecodedImage) -> Self {
        Self {
            meta: image.meta,
            frames: image.pixels,
            delays_ms: vec![0],
        }
    }
}

impl std::fmt::Debug for AnimatedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimatedImage")
            .field("meta", &self.meta)
            .field("frames", &self.delays_ms.len())
            .field("bytes", &self.frames.len())
            .finish()
    }
}
