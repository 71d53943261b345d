//! Loading indicator drawn where an image is not ready yet.

use std::f32::consts::TAU;
use std::time::Instant;

use crate::domain::entities::{Point, Rect};
use crate::domain::ports::PlaceholderPainter;

/// Line segments in one spinner arc.
pub const SPINNER_SEGMENTS: usize = 30;

/// Centre and radius of the indicator for an image slot.
///
/// The radius is a quarter of the slot's smaller side.
#[must_use]
pub fn placeholder_geometry(rect: Rect) -> (Point, f32) {
    let radius = rect.width().min(rect.height()).max(0.0) / 4.0;
    (rect.center(), radius)
}

/// Points of the spinner arc at `time` seconds.
///
/// The arc spins while its tail sweeps back and forth, so its length breathes
/// between a fifteenth and nine tenths of a circle.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn spinner_points(center: Point, radius: f32, time: f32) -> Vec<Point> {
    let (from, to) = arc_bounds(time);
    let rotation = time * 8.0;
    (0..=SPINNER_SEGMENTS)
        .map(|i| {
            let angle = rotation + from + (to - from) * (i as f32 / SPINNER_SEGMENTS as f32);
            Point::new(
                center.x + radius * angle.cos(),
                center.y + radius * angle.sin(),
            )
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn arc_bounds(time: f32) -> (f32, f32) {
    let segments = SPINNER_SEGMENTS as f32;
    let tail = (time * 1.8).sin().abs() * (segments - 5.0);
    (TAU * tail / segments, TAU * (segments - 3.0) / segments)
}

/// Painter that turns the spinner into a polyline for a host drawing callback.
pub struct SpinnerPainter<F> {
    draw_polyline: F,
    started: Instant,
}

impl<F> SpinnerPainter<F>
where
    F: Fn(&[Point]) + Send + Sync,
{
    /// Creates a painter forwarding every spinner to `draw_polyline`.
    pub fn new(draw_polyline: F) -> Self {
        Self {
            draw_polyline,
            started: Instant::now(),
        }
    }
}

impl<F> PlaceholderPainter for SpinnerPainter<F>
where
    F: Fn(&[Point]) + Send + Sync,
{
    fn draw_placeholder(&self, center: Point, radius: f32) {
        let time = self.started.elapsed().as_secs_f32();
        (self.draw_polyline)(&spinner_points(center, radius, time));
    }
}

impl<F> std::fmt::Debug for SpinnerPainter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpinnerPainter")
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}
