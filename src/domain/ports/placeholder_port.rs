//! Port for the "still loading" indicator.

use crate::domain::entities::Point;

/// Draws the indicator shown in place of an image that is not ready.
#[cfg_attr(test, mockall::automock)]
pub trait PlaceholderPainter: Send + Sync {
    /// Draws the indicator centred on `center` with the given radius.
    fn draw_placeholder(&self, center: Point, radius: f32);
}
