//! Frame advance for animated entries.
//!
//! `tick` ages each animated entry's accumulated time; an access then plays
//! every frame whose delay the accumulated time covers, keeping the remainder,
//! and uploads the last frame played.

use tracing::trace;

use crate::domain::entities::AnimatedResourceEntry;
use crate::domain::ports::TextureBackend;

/// Advances `entry` by the time accumulated since its last swap.
///
/// `speed` divides the millisecond frame delays: 1000 plays in real time, 1 treats
/// each millisecond as a second. A non-positive speed pauses the animation.
/// Returns the number of frames advanced.
pub fn advance(entry: &mut AnimatedResourceEntry, speed: f32, default: &dyn TextureBackend) -> usize {
    let frame_count = entry.frame_count();
    if frame_count < 2 || !(speed > 0.0) {
        return 0;
    }

    skip_whole_cycles(entry, speed);

    let mut advanced = 0;
    let mut shown = None;
    loop {
        let delay = entry.frame_delay(entry.current_frame, speed);
        if entry.accumulated < delay {
            break;
        }
        entry.accumulated -= delay;
        shown = Some(entry.current_frame);
        entry.current_frame += 1;
        if entry.current_frame >= frame_count {
            entry.current_frame = 1;
        }
        advanced += 1;

        // Zero-delay frames advance once per access.
        if delay <= 0.0 {
            entry.accumulated = 0.0;
            break;
        }
    }

    if let Some(frame) = shown {
        entry.show_frame(frame, default);
        trace!(frame, advanced, next = entry.current_frame, "Advanced animation");
    }
    advanced
}

/// Drops all but one full loop from the accumulated time so a long stall
/// does not replay every missed frame.
fn skip_whole_cycles(entry: &mut AnimatedResourceEntry, speed: f32) {
    let cycle: f32 = (1..entry.frame_count())
        .map(|frame| entry.frame_delay(frame, speed))
        .sum();
    if cycle <= 0.0 {
        return;
    }
    let excess = (entry.accumulated / cycle).floor() - 1.0;
    if excess >= 1.0 {
        entry.accumulated -= excess * cycle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{AnimatedImage, CacheEntry, ImageMeta};
    use crate::domain::ports::mocks::RecordingBackend;
    use test_case::test_case;

    fn entry(delays_ms: Vec<u32>, backend: &RecordingBackend) -> AnimatedResourceEntry {
        let meta = ImageMeta {
            width: 1,
            height: 1,
            channels: 4,
        };
        let mut frames = Vec::new();
        for i in 0..delays_ms.len() {
            frames.extend([u8::try_from(i).unwrap(); 4]);
        }
        AnimatedResourceEntry::new(
            AnimatedImage {
                meta,
                frames,
                delays_ms,
            },
            100.0,
            backend,
            None,
        )
        .unwrap()
    }

    #[test_case(0, 1 ; "no_time")]
    #[test_case(1, 2 ; "one_delay")]
    #[test_case(3, 4 ; "last_frame")]
    #[test_case(4, 1 ; "wraps_to_one")]
    #[test_case(5, 2 ; "second_loop")]
    #[test_case(11, 4 ; "many_loops")]
    fn test_index_after_ticks_with_access_every_tick(ticks: usize, expected: usize) {
        let backend = RecordingBackend::new();
        let mut entry = entry(vec![1; 5], &backend);

        for _ in 0..ticks {
            entry.on_tick(1.0);
            advance(&mut entry, 1.0, &backend);
        }

        assert_eq!(entry.current_frame(), expected);
        assert_eq!(entry.current_frame(), 1 + ticks % 4);
    }

    #[test_case(2 ; "two_delays")]
    #[test_case(7 ; "past_one_loop")]
    #[test_case(13 ; "past_three_loops")]
    fn test_single_access_catches_up(ticks: usize) {
        let backend = RecordingBackend::new();
        let mut entry = entry(vec![1; 5], &backend);

        for _ in 0..ticks {
            entry.on_tick(1.0);
        }
        advance(&mut entry, 1.0, &backend);

        assert_eq!(entry.current_frame(), 1 + ticks % 4);
        assert!(entry.accumulated_time() < 1.0);
        assert_eq!(backend.created_count(), 2);
    }

    #[test]
    fn test_swap_uploads_frame_and_destroys_previous() {
        let backend = RecordingBackend::new();
        let mut entry = entry(vec![100, 100, 100], &backend);
        let first = entry.entry().texture();

        entry.on_tick(0.1);
        assert_eq!(advance(&mut entry, 1000.0, &backend), 1);

        let uploads = backend.uploads();
        assert_eq!(uploads.last().unwrap().first_byte, Some(1));
        assert_eq!(backend.destroyed(), vec![first]);
        assert_eq!(entry.current_frame(), 2);
    }

    #[test]
    fn test_zero_delay_advances_once_per_access() {
        let backend = RecordingBackend::new();
        let mut entry = entry(vec![0, 0, 0], &backend);

        assert_eq!(advance(&mut entry, 1000.0, &backend), 1);
        assert_eq!(advance(&mut entry, 1000.0, &backend), 1);
        assert_eq!(entry.current_frame(), 1);
    }

    #[test]
    fn test_not_enough_time_accumulates() {
        let backend = RecordingBackend::new();
        let mut entry = entry(vec![1000, 1000], &backend);

        entry.on_tick(0.4);
        assert_eq!(advance(&mut entry, 1000.0, &backend), 0);
        assert!((entry.accumulated_time() - 0.4).abs() < f32::EPSILON);
        assert_eq!(backend.created_count(), 1);
    }

    #[test]
    fn test_single_frame_never_advances() {
        let backend = RecordingBackend::new();
        let mut entry = entry(vec![10], &backend);

        entry.on_tick(5.0);
        assert_eq!(advance(&mut entry, 1000.0, &backend), 0);
        assert_eq!(entry.current_frame(), 0);
    }
}
