//! Presentation helpers for hosts drawing cached images.

/// Loading indicator geometry and painter.
pub mod placeholder;

pub use placeholder::{SpinnerPainter, placeholder_geometry, spinner_points};
