//! Capability ports implemented by the host or by infrastructure adapters.

mod http_fetcher_port;
mod image_decoder_port;
mod placeholder_port;
mod texture_backend_port;

pub use http_fetcher_port::HttpFetcher;
pub use image_decoder_port::ImageDecoder;
#[cfg(test)]
pub use placeholder_port::MockPlaceholderPainter;
pub use placeholder_port::PlaceholderPainter;
pub use texture_backend_port::TextureBackend;

#[cfg(test)]
pub mod mocks {
    pub use super::http_fetcher_port::mock::StubFetcher;
    pub use super::image_decoder_port::mock::{CORRUPT, StubDecoder};
    pub use super::texture_backend_port::mock::{RecordingBackend, Upload};
}
