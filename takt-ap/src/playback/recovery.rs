//! Underrun concealment strategies
//!
//! When the jitter buffer runs dry mid-track, the provider can hand the
//! transport a concealment frame instead of going silent for the tick.
//! The strategy decides what that frame is; the provider decides how many
//! ticks it is used for.

use tracing::debug;

/// The canonical opus silence frame (TOC sequence `F8 FF FE`).
///
/// Decoders treat it as a minimal comfort-noise payload, which masks a
/// short gap less audibly than repeating bytes of arbitrary audio.
pub const COMFORT_NOISE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// How to conceal a buffer underrun
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Re-emit the last successfully delivered frame
    RepeatLastFrame,
    /// Emit the fixed comfort-noise payload
    ComfortNoise,
    /// Emit nothing; the tick is silent
    Disabled,
}

impl RecoveryStrategy {
    /// Resolve a strategy from its configured name.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    /// Unknown names fall back to [`RecoveryStrategy::RepeatLastFrame`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "repeat" => RecoveryStrategy::RepeatLastFrame,
            "noise" => RecoveryStrategy::ComfortNoise,
            "off" => RecoveryStrategy::Disabled,
            other => {
                debug!("Unknown recovery strategy '{}', using repeat", other);
                RecoveryStrategy::RepeatLastFrame
            }
        }
    }

    /// Produce a concealment frame for a fresh underrun episode.
    ///
    /// # Arguments
    /// * `last_frame` - The most recent frame actually delivered, if any
    ///
    /// # Returns
    /// The frame to re-emit, or `None` when this strategy cannot conceal
    /// (disabled, or nothing has been delivered yet to repeat).
    pub fn recover(&self, last_frame: Option<&[u8]>) -> Option<Vec<u8>> {
        match self {
            RecoveryStrategy::RepeatLastFrame => last_frame.map(|frame| frame.to_vec()),
            RecoveryStrategy::ComfortNoise => Some(COMFORT_NOISE_FRAME.to_vec()),
            RecoveryStrategy::Disabled => None,
        }
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryStrategy::RepeatLastFrame => write!(f, "repeat"),
            RecoveryStrategy::ComfortNoise => write!(f, "noise"),
            RecoveryStrategy::Disabled => write!(f, "off"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify name resolution including case and whitespace tolerance
    #[test]
    fn test_from_name() {
        assert_eq!(
            RecoveryStrategy::from_name("repeat"),
            RecoveryStrategy::RepeatLastFrame
        );
        assert_eq!(
            RecoveryStrategy::from_name("NOISE"),
            RecoveryStrategy::ComfortNoise
        );
        assert_eq!(
            RecoveryStrategy::from_name("  off "),
            RecoveryStrategy::Disabled
        );
    }

    /// Verify unknown names fall back to repeat
    #[test]
    fn test_from_name_unknown_falls_back() {
        assert_eq!(
            RecoveryStrategy::from_name("psychoacoustic"),
            RecoveryStrategy::RepeatLastFrame
        );
        assert_eq!(
            RecoveryStrategy::from_name(""),
            RecoveryStrategy::RepeatLastFrame
        );
    }

    /// Verify repeat needs a prior frame while noise never does
    #[test]
    fn test_recover() {
        let last = vec![1u8, 2, 3, 4];

        assert_eq!(
            RecoveryStrategy::RepeatLastFrame.recover(Some(&last)),
            Some(last.clone())
        );
        assert_eq!(RecoveryStrategy::RepeatLastFrame.recover(None), None);

        assert_eq!(
            RecoveryStrategy::ComfortNoise.recover(None),
            Some(COMFORT_NOISE_FRAME.to_vec())
        );
        assert_eq!(
            RecoveryStrategy::ComfortNoise.recover(Some(&last)),
            Some(COMFORT_NOISE_FRAME.to_vec())
        );

        assert_eq!(RecoveryStrategy::Disabled.recover(Some(&last)), None);
        assert_eq!(RecoveryStrategy::Disabled.recover(None), None);
    }
}
