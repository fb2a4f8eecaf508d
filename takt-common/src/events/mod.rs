//! Event system for TAKT
//!
//! Defines the event type broadcast by the audio node. Events are
//! serialized with a `type` tag so external consumers can dispatch on a
//! single field.
//!
//! **Delivery:** events fan out over a `tokio::sync::broadcast` channel
//! owned by the session registry. Slow subscribers lag and drop the
//! oldest events; emitters never block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod player_types;

pub use player_types::{BufferDiagnostics, EndReason, PlayerState};

/// Event emitted by the audio node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    /// A track began playing on a session
    ///
    /// **Triggers:**
    /// - Explicit `play` control request
    /// - Gapless swap into the queued next track
    TrackStart {
        /// Session the track started on
        session_id: u64,
        /// Track identifier
        track_id: Uuid,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },

    /// A track stopped playing on a session
    ///
    /// **Triggers:**
    /// - Natural end of the track
    /// - Explicit `stop` control request
    /// - Replacement by another track
    /// - Session teardown
    TrackEnd {
        /// Session the track ended on
        session_id: u64,
        /// Track identifier
        track_id: Uuid,
        /// Why the track ended
        reason: EndReason,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },

    /// The decode engine made no progress on the current track
    ///
    /// **Triggers:**
    /// - Engine stuck threshold exceeded
    TrackStuck {
        /// Session the track is stuck on
        session_id: u64,
        /// Track identifier
        track_id: Uuid,
        /// Stall duration that tripped the engine's detector, in milliseconds
        threshold_ms: u64,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },

    /// Periodic player state broadcast
    ///
    /// **Triggers:**
    /// - Fixed-rate schedule while a track is active (first emission immediate)
    /// - Explicit `play` control request
    PlayerUpdate {
        /// Session being reported
        session_id: u64,
        /// Currently playing track, if any
        track_id: Option<Uuid>,
        /// Playback position in milliseconds
        position_ms: u64,
        /// Whether delivery is paused
        paused: bool,
        /// Audio currently buffered for the session, in milliseconds
        buffered_ms: u64,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },

    /// The current track is near its end and a successor should be prepared
    ///
    /// **Triggers:**
    /// - Remaining playback time at or below the preload threshold
    ///   (emitted at most once per track)
    PreloadHint {
        /// Session requesting a successor
        session_id: u64,
        /// Track nearing its end, if still known
        track_id: Option<Uuid>,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },

    /// Periodic jitter-buffer diagnostic snapshot
    ///
    /// **Triggers:**
    /// - Fixed-rate schedule while diagnostics are enabled
    PlayerDiagnostics {
        /// Session being reported
        session_id: u64,
        /// Buffer state at the moment of capture
        snapshot: BufferDiagnostics,
        /// Event timestamp
        timestamp: DateTime<Utc>,
    },
}

impl NodeEvent {
    /// Session the event concerns
    pub fn session_id(&self) -> u64 {
        match self {
            NodeEvent::TrackStart { session_id, .. }
            | NodeEvent::TrackEnd { session_id, .. }
            | NodeEvent::TrackStuck { session_id, .. }
            | NodeEvent::PlayerUpdate { session_id, .. }
            | NodeEvent::PreloadHint { session_id, .. }
            | NodeEvent::PlayerDiagnostics { session_id, .. } => *session_id,
        }
    }
}
