//! Playback subsystem
//!
//! Per-session playback machinery:
//! - [`provider::FrameProvider`] - adaptive jitter buffer on the transport tick path
//! - [`player::Player`] - orchestration, track transitions, periodic tasks
//! - [`recovery::RecoveryStrategy`] - underrun concealment
//! - [`loss::LossTracker`] - per-minute delivery accounting

pub mod loss;
pub mod player;
pub mod provider;
pub mod recovery;

pub use loss::LossTracker;
pub use player::Player;
pub use provider::{BufferBudget, FrameProvider};
pub use recovery::RecoveryStrategy;
