//! Application layer with the cache engine.

/// Stores, background jobs and the foreground manager.
pub mod services;

pub use services::{
    ImageManager, ImageManagerBuilder, LoadOptions, NetworkRequest, ResourceReport,
};
