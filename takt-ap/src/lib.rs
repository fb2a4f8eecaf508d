//! # TAKT Audio Player
//!
//! Session-oriented audio delivery core. Each session owns a player that
//! orchestrates a decode engine, an adaptive jitter buffer pacing encoded
//! opus frames at the 20 ms transport cadence, underrun concealment, and
//! gapless track transitions. A registry keys sessions and enforces the
//! node-wide buffer budget.

pub mod decode;
pub mod error;
pub mod playback;
pub mod registry;

// Re-export commonly used types
pub use error::{Error, Result};
pub use registry::SessionRegistry;
