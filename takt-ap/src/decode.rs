//! Decode engine seam
//!
//! The player core is codec-agnostic: it never decodes audio itself. It
//! drives a [`DecodeEngine`] that produces already-encoded opus frames on
//! demand and reports track lifecycle transitions to registered observers.
//!
//! ## Engine contract
//!
//! - `try_provide` is called on the transport tick path while internal
//!   buffer locks are held. Implementations must return promptly and must
//!   never call back into the session's player or registry from inside it.
//! - Lifecycle callbacks (`track_start`, `track_end`, `track_stuck`) are
//!   raised from the engine's own driver context, synchronously from the
//!   control call that caused them (`play`, `stop`) or from the engine's
//!   playback thread, never from inside `try_provide`.
//! - Observers are held weakly; an engine drops dead weak references when
//!   it notices them.

use std::sync::{Arc, Weak};

use uuid::Uuid;

use takt_common::events::EndReason;

/// Worst-case encoded frame size the engine may hand back per pull, in
/// bytes. Comfortably above the 1275-byte ceiling of a 20 ms opus frame
/// at the maximum bitrate.
pub const MAX_FRAME_BYTES: usize = 1536;

/// An identified, loadable track
#[derive(Debug, Clone)]
pub struct TrackHandle {
    /// Stable identifier for event correlation
    pub id: Uuid,
    /// Opaque encoded track descriptor understood by the decode engine
    pub encoded: String,
    /// Total duration in milliseconds; 0 when unknown (e.g. live streams)
    pub duration_ms: u64,
}

impl TrackHandle {
    /// Create a handle with a fresh identifier.
    pub fn new(encoded: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            encoded: encoded.into(),
            duration_ms,
        }
    }
}

/// A track currently loaded in the engine, with its playback position
#[derive(Debug, Clone)]
pub struct PlayingTrack {
    /// The loaded track
    pub handle: TrackHandle,
    /// Current playback position in milliseconds
    pub position_ms: u64,
}

impl PlayingTrack {
    /// Milliseconds of audio left before the track ends.
    ///
    /// Returns `None` when the duration is unknown.
    pub fn remaining_ms(&self) -> Option<u64> {
        if self.handle.duration_ms == 0 {
            return None;
        }
        Some(self.handle.duration_ms.saturating_sub(self.position_ms))
    }
}

/// Receiver of track lifecycle transitions
pub trait TrackObserver: Send + Sync {
    /// A track began playing.
    fn track_start(&self, track: &TrackHandle);

    /// A track stopped playing.
    fn track_end(&self, track: &TrackHandle, reason: EndReason);

    /// The engine made no playback progress for `threshold_ms`.
    fn track_stuck(&self, track: &TrackHandle, threshold_ms: u64);
}

/// Source of encoded opus frames and track control surface
///
/// One engine instance backs one session.
pub trait DecodeEngine: Send + Sync {
    /// Begin playing a track, replacing the current one if any.
    ///
    /// Raises `track_end(Replaced)` for the replaced track followed by
    /// `track_start` for the new one.
    fn play(&self, track: TrackHandle);

    /// Stop the current track, raising `track_end(Stopped)` if one was
    /// loaded. A no-op otherwise.
    fn stop(&self);

    /// Suspend or resume playback progress.
    fn set_paused(&self, paused: bool);

    /// Whether playback progress is currently suspended.
    fn is_paused(&self) -> bool;

    /// Jump to a position within the current track.
    fn seek_to(&self, position_ms: u64);

    /// Set the output volume in percent (100 = unity).
    fn set_volume(&self, volume: u16);

    /// The currently loaded track and its position, if any.
    fn current(&self) -> Option<PlayingTrack>;

    /// Produce at most one encoded frame into `frame`, overwriting its
    /// contents. Returns `false` when no frame is available right now
    /// (nothing loaded, paused, or the decoder has not caught up).
    fn try_provide(&self, frame: &mut Vec<u8>) -> bool;

    /// Register a lifecycle observer.
    fn add_observer(&self, observer: Weak<dyn TrackObserver>);
}

/// Upgrade-and-notify helper for engines that store weak observers.
///
/// Returns the live observers, dropping dead references as a side effect.
pub fn live_observers(observers: &mut Vec<Weak<dyn TrackObserver>>) -> Vec<Arc<dyn TrackObserver>> {
    observers.retain(|weak| weak.strong_count() > 0);
    observers.iter().filter_map(Weak::upgrade).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify remaining time saturates at zero and hides unknown durations
    #[test]
    fn test_remaining_ms() {
        let track = PlayingTrack {
            handle: TrackHandle::new("test:track", 180_000),
            position_ms: 179_400,
        };
        assert_eq!(track.remaining_ms(), Some(600));

        let past_end = PlayingTrack {
            handle: TrackHandle::new("test:track", 1000),
            position_ms: 2000,
        };
        assert_eq!(past_end.remaining_ms(), Some(0));

        let live = PlayingTrack {
            handle: TrackHandle::new("test:stream", 0),
            position_ms: 5000,
        };
        assert_eq!(live.remaining_ms(), None);
    }

    /// Verify handles mint distinct identifiers
    #[test]
    fn test_handle_ids_distinct() {
        let a = TrackHandle::new("test:a", 1000);
        let b = TrackHandle::new("test:a", 1000);
        assert_ne!(a.id, b.id);
    }
}
