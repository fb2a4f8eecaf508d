//! Playback-related types shared by events and the player surface

use serde::{Deserialize, Serialize};

/// Player state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    /// No track loaded
    Idle,
    /// Track loaded and frames being delivered
    Playing,
    /// Track loaded but delivery suspended
    Paused,
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerState::Idle => write!(f, "idle"),
            PlayerState::Playing => write!(f, "playing"),
            PlayerState::Paused => write!(f, "paused"),
        }
    }
}

/// Why a track stopped playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    /// Track played to completion
    Finished,
    /// Decode engine could not load or continue the track
    LoadFailed,
    /// Track was stopped by an explicit control request
    Stopped,
    /// Track was replaced by another `play` or a gapless swap
    Replaced,
    /// Session was destroyed while the track was active
    Cleanup,
}

impl EndReason {
    /// Whether an external controller may start a follow-up track
    /// in response to this end.
    ///
    /// `Stopped`, `Replaced`, and `Cleanup` all mean something else
    /// already decided what happens next.
    pub fn may_start_next(&self) -> bool {
        matches!(self, EndReason::Finished | EndReason::LoadFailed)
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::Finished => write!(f, "finished"),
            EndReason::LoadFailed => write!(f, "loadfailed"),
            EndReason::Stopped => write!(f, "stopped"),
            EndReason::Replaced => write!(f, "replaced"),
            EndReason::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// Point-in-time snapshot of one session's jitter buffer
///
/// Produced on demand for the periodic diagnostic log and the
/// `PlayerDiagnostics` event. All fields are copies; the snapshot does
/// not track the live buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDiagnostics {
    /// Audio currently queued, in milliseconds
    pub buffered_ms: u64,
    /// Current adaptive target depth in milliseconds
    pub target_buffer_ms: u64,
    /// Configured preroll threshold in milliseconds
    pub min_preroll_ms: u64,
    /// Number of frames in the queue
    pub queue_depth: usize,
    /// Underrun ticks observed since the current track started
    pub underruns: u64,
    /// Duration of the most recent fill pass, in microseconds
    pub last_fill_micros: u64,
    /// Frames pulled by the most recent fill pass
    pub last_fill_frames: u32,
    /// Concealment frames still owed from the active underrun episode
    pub concealment_frames_left: u32,
}
