//! Cache error types.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while loading or maintaining cached images.
///
/// "Not ready yet" is deliberately absent: an outstanding background job is
/// reported as [`crate::domain::entities::ImageState::Loading`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum CacheError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("background job exceeded {secs}s")]
    Timeout { secs: u64 },

    #[error("cache directory unavailable: {path}: {message}")]
    DirectoryUnavailable { path: String, message: String },

    #[error("io error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl CacheError {
    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates a fetch error.
    #[must_use]
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch(message.into())
    }

    /// Creates an I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Creates a directory-unavailable error.
    #[must_use]
    pub fn directory_unavailable(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::DirectoryUnavailable {
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}
