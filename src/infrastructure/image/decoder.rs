//! Codec adapter backed by the `image` crate.

use std::io::Cursor;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageFormat};
use tracing::trace;

use crate::domain::entities::{AnimatedImage, DecodedImage, ImageMeta};
use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::ImageDecoder;

/// Decodes PNG, JPEG, WebP and GIF to RGBA8.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, bytes: &[u8]) -> CacheResult<DecodedImage> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| CacheError::decode(format!("Failed to decode image: {e}")))?;
        let channels = img.color().channel_count();
        let rgba = img.into_rgba8();
        let (width, height) = rgba.dimensions();
        trace!(width, height, channels, "Decoded still image");

        Ok(DecodedImage {
            meta: ImageMeta {
                width,
                height,
                channels,
            },
            pixels: rgba.into_raw(),
        })
    }

    fn decode_animated(&self, bytes: &[u8]) -> CacheResult<AnimatedImage> {
        match image::guess_format(bytes) {
            Ok(ImageFormat::Gif) => decode_gif(bytes),
            _ => self.decode(bytes).map(AnimatedImage::single),
        }
    }
}

fn decode_gif(bytes: &[u8]) -> CacheResult<AnimatedImage> {
    let decoder = GifDecoder::new(Cursor::new(bytes))
        .map_err(|e| CacheError::decode(format!("Failed to read GIF header: {e}")))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| CacheError::decode(format!("Failed to decode GIF frames: {e}")))?;

    let Some(first) = frames.first() else {
        return Err(CacheError::decode("GIF has no frames"));
    };
    let (width, height) = first.buffer().dimensions();
    let meta = ImageMeta {
        width,
        height,
        channels: 4,
    };

    let mut buffer = Vec::with_capacity(meta.frame_len() * frames.len());
    let mut delays_ms = Vec::with_capacity(frames.len());
    for frame in frames {
        let (numer, denom) = frame.delay().numer_denom_ms();
        delays_ms.push(if denom == 0 { 0 } else { numer / denom });

        let pixels = frame.into_buffer();
        if pixels.dimensions() != (width, height) {
            return Err(CacheError::decode(format!(
                "GIF frame is {:?}, expected {width}x{height}",
                pixels.dimensions()
            )));
        }
        buffer.extend_from_slice(pixels.as_raw());
    }
    trace!(width, height, frames = delays_ms.len(), "Decoded animated image");

    Ok(AnimatedImage {
        meta,
        frames: buffer,
        delays_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgb, RgbImage, Rgba, RgbaImage};

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn gif_bytes(frames: usize, delay_ms: u32) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            let frames = (0..frames).map(|i| {
                let shade = u8::try_from(i * 40).unwrap();
                Frame::from_parts(
                    RgbaImage::from_pixel(4, 4, Rgba([shade, 0, 0, 255])),
                    0,
                    0,
                    Delay::from_numer_denom_ms(delay_ms, 1),
                )
            });
            encoder.encode_frames(frames).unwrap();
        }
        out
    }

    #[test]
    fn test_decode_png_to_rgba() {
        let decoded = ImageCrateDecoder.decode(&png_bytes()).unwrap();

        assert_eq!(decoded.meta.width, 3);
        assert_eq!(decoded.meta.height, 2);
        assert_eq!(decoded.meta.channels, 3);
        assert_eq!(decoded.pixels.len(), 3 * 2 * 4);
        assert_eq!(&decoded.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = ImageCrateDecoder.decode(b"definitely not an image");
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_decode_gif_frames_and_delays() {
        let animated = ImageCrateDecoder
            .decode_animated(&gif_bytes(3, 100))
            .unwrap();

        assert_eq!(animated.frame_count(), 3);
        assert_eq!(animated.delays_ms, vec![100, 100, 100]);
        assert_eq!(animated.frames.len(), 3 * animated.meta.frame_len());
    }

    #[test]
    fn test_still_image_on_animated_path_is_one_frame() {
        let animated = ImageCrateDecoder.decode_animated(&png_bytes()).unwrap();

        assert_eq!(animated.frame_count(), 1);
        assert_eq!(animated.frames.len(), animated.meta.frame_len());
    }

    #[test]
    fn test_decode_missing_file_fails() {
        let result = ImageCrateDecoder.decode_file(std::path::Path::new("/nonexistent/a.png"));
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }
}
