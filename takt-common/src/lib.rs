//! # TAKT Common Library
//!
//! Shared types for the TAKT audio node: configuration, events,
//! frame timing, and common error handling.
//!
//! Used by:
//! - **takt-ap**: Audio Player (session registry, jitter buffer, playback orchestration)

pub mod config;
pub mod error;
pub mod events;
pub mod timing;

// Re-export commonly used types
pub use error::{Error, Result};
