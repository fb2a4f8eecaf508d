//! Per-minute frame delivery accounting
//!
//! Tracks how many transport ticks delivered a real frame versus how many
//! delivered nothing, bucketed by wall-clock minute. The previous minute's
//! bucket is the one reported: it is complete, so its ratio is meaningful,
//! while the current minute is still accumulating.
//!
//! ## Thread Safety
//!
//! Lock-free. Counters are advisory diagnostics updated from the tick path
//! with relaxed ordering; the minute rollover uses a compare-exchange so
//! exactly one caller archives the finished bucket. A tick racing the
//! rollover may land its count in either bucket, which is acceptable for
//! a per-minute health signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use takt_common::timing::FRAMES_PER_MINUTE;

/// Counts delivered and lost frames per wall-clock minute
#[derive(Debug)]
pub struct LossTracker {
    /// Minute stamp (epoch minutes) the current bucket belongs to
    current_minute: AtomicU64,
    /// Losses accumulated in the current minute
    current_loss: AtomicU64,
    /// Successes accumulated in the current minute
    current_success: AtomicU64,
    /// Losses in the last completed minute
    last_loss: AtomicU64,
    /// Successes in the last completed minute
    last_success: AtomicU64,
}

impl LossTracker {
    pub fn new() -> Self {
        Self {
            current_minute: AtomicU64::new(Self::wall_clock_minute()),
            current_loss: AtomicU64::new(0),
            current_success: AtomicU64::new(0),
            last_loss: AtomicU64::new(0),
            last_success: AtomicU64::new(0),
        }
    }

    /// Record a tick that delivered a real frame.
    pub fn record_success(&self) {
        self.record(Self::wall_clock_minute(), true);
    }

    /// Record a tick that delivered nothing (or only concealment).
    pub fn record_loss(&self) {
        self.record(Self::wall_clock_minute(), false);
    }

    /// Losses accumulated so far in the still-open minute.
    pub fn current_minute_loss(&self) -> u64 {
        self.current_loss.load(Ordering::Relaxed)
    }

    /// Successes accumulated so far in the still-open minute.
    pub fn current_minute_success(&self) -> u64 {
        self.current_success.load(Ordering::Relaxed)
    }

    /// Losses in the last completed minute.
    pub fn last_minute_loss(&self) -> u64 {
        self.last_loss.load(Ordering::Acquire)
    }

    /// Successes in the last completed minute.
    pub fn last_minute_success(&self) -> u64 {
        self.last_success.load(Ordering::Acquire)
    }

    /// Fraction of last-minute ticks that were losses, in `0.0..=1.0`.
    ///
    /// Returns 0.0 when the last minute saw no ticks at all.
    pub fn loss_ratio(&self) -> f64 {
        let loss = self.last_minute_loss();
        let total = loss + self.last_minute_success();
        if total == 0 {
            return 0.0;
        }
        loss as f64 / total as f64
    }

    /// Whether the last completed minute saw a full, loss-free cadence.
    ///
    /// A healthy session delivers [`FRAMES_PER_MINUTE`] frames per minute;
    /// pauses and track gaps legitimately reduce the count, so this only
    /// reports an affirmative signal, never a definitive failure.
    pub fn last_minute_clean(&self) -> bool {
        self.last_minute_loss() == 0 && self.last_minute_success() >= FRAMES_PER_MINUTE
    }

    fn record(&self, minute: u64, success: bool) {
        self.roll_if_needed(minute);
        let counter = if success {
            &self.current_success
        } else {
            &self.current_loss
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Archive the current bucket when the wall-clock minute has moved on.
    ///
    /// The compare-exchange elects one caller to do the archival; losers
    /// simply record into the new bucket.
    fn roll_if_needed(&self, minute: u64) {
        let stamped = self.current_minute.load(Ordering::Acquire);
        if stamped == minute {
            return;
        }
        if self
            .current_minute
            .compare_exchange(stamped, minute, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let loss = self.current_loss.swap(0, Ordering::AcqRel);
            let success = self.current_success.swap(0, Ordering::AcqRel);
            // A gap of more than one minute means the archived bucket is
            // stale too, but the next rollover will flush it to zero.
            self.last_loss.store(loss, Ordering::Release);
            self.last_success.store(success, Ordering::Release);
        }
    }

    fn wall_clock_minute() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            / 60
    }
}

impl Default for LossTracker {
    fn default() -> Self {
        Self::new()
    }
}
