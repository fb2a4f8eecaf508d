//! Test helper modules for takt-ap integration tests
//!
//! Provides reusable test infrastructure components:
//! - ScriptedEngine: decode engine stub with scripted frame supply and
//!   manual playback-position control
//! - Event capture: drain-and-filter utilities for the node event stream

#![allow(dead_code)]

pub mod event_capture;
pub mod scripted_engine;

// Re-export commonly used types
pub use event_capture::{drain_events, end_reasons, started_track_ids};
pub use scripted_engine::{synthetic_track, ScriptedEngine};
