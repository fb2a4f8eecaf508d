//! Frame timing for the 20 ms opus cadence
//!
//! Every encoded frame the node handles covers exactly 20 ms of audio, so
//! buffered duration and queue depth are two views of the same quantity.
//! This module holds the canonical constants and the conversions between
//! them so the arithmetic is written (and tested) in exactly one place.
//!
//! **Key rule:** buffered milliseconds are always a whole multiple of
//! [`FRAME_DURATION_MS`]; a queue of `n` frames represents `n * 20` ms.

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Duration of one opus frame in milliseconds.
///
/// The transport pulls one frame per tick at this cadence.
pub const FRAME_DURATION_MS: u64 = 20;

/// Number of frames in one second of audio (50).
pub const FRAMES_PER_SECOND: u64 = 1000 / FRAME_DURATION_MS;

/// Number of frames expected in one minute of uninterrupted playback (3000).
///
/// Used as the denominator when judging per-minute delivery health.
pub const FRAMES_PER_MINUTE: u64 = 60 * FRAMES_PER_SECOND;

// ============================================================================
// Conversions
// ============================================================================

/// Convert a frame count to its buffered duration in milliseconds.
///
/// # Example
///
/// ```
/// use takt_common::timing::frames_to_ms;
///
/// assert_eq!(frames_to_ms(0), 0);
/// assert_eq!(frames_to_ms(15), 300);
/// assert_eq!(frames_to_ms(75), 1500);
/// ```
pub fn frames_to_ms(frames: usize) -> u64 {
    frames as u64 * FRAME_DURATION_MS
}

/// Convert a duration in milliseconds to a whole frame count (truncating).
///
/// # Example
///
/// ```
/// use takt_common::timing::ms_to_frames;
///
/// assert_eq!(ms_to_frames(300), 15);
/// assert_eq!(ms_to_frames(310), 15);
/// assert_eq!(ms_to_frames(19), 0);
/// ```
pub fn ms_to_frames(ms: u64) -> usize {
    (ms / FRAME_DURATION_MS) as usize
}

/// The wall-clock interval between transport ticks.
pub const fn frame_interval() -> Duration {
    Duration::from_millis(FRAME_DURATION_MS)
}

// ============================================================================
// Tests
// ============================================================================
