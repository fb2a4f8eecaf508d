//! Adaptive jitter buffer on the transport tick path
//!
//! One [`FrameProvider`] sits between a session's decode engine and the
//! transport that pulls one encoded opus frame every 20 ms. It absorbs
//! decoder jitter by keeping a small queue of frames ahead of the
//! transport, and adapts how far ahead it stays based on observed
//! underruns.
//!
//! **Responsibilities:**
//! - Opportunistically pull frames from the engine up to the adaptive target
//! - Gate the first frame of a track behind a preroll threshold
//! - Detect underruns, conceal them briefly, and widen the target in response
//! - Narrow the target again after a sustained quiet period
//! - Respect the per-session and node-wide buffer budget caps
//!
//! ## Target controller
//!
//! The target depth starts at the configured value and moves in 100 ms
//! steps within 300..=1500 ms. Every underrun widens it immediately.
//! It narrows only when two gates agree: at least 60 s since the last
//! underrun AND at least 60 s since the last narrowing. One quiet minute
//! therefore undoes at most one step, no matter how long it lasted.
//!
//! ## Thread Safety
//!
//! All mutable buffer state lives behind one `std::sync::Mutex` with
//! short critical sections; the tick path takes it at most twice per
//! tick. A lock-free gauge mirrors the buffered duration for readers
//! that must not contend with the tick path (the registry's budget
//! arithmetic).
//!
//! **Memory Ordering:**
//! - `buffered_ms_gauge`: Release store after every queue mutation,
//!   Acquire load by readers. The gauge is advisory; budget decisions
//!   tolerate a tick of staleness.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use takt_common::config::NodeConfig;
use takt_common::events::BufferDiagnostics;
use takt_common::timing::FRAME_DURATION_MS;

use crate::decode::DecodeEngine;
use crate::playback::loss::LossTracker;
use crate::playback::player::{Player, PRELOAD_AT_MS, SWAP_AT_MS};
use crate::playback::recovery::RecoveryStrategy;

// ============================================================================
// Tuning constants
// ============================================================================

/// Preroll applied when the configuration does not set one, in milliseconds.
pub const DEFAULT_MIN_PREROLL_MS: u64 = 300;

/// Initial target depth when the configuration does not set one, in
/// milliseconds.
pub const DEFAULT_TARGET_BUFFER_MS: u64 = 600;

/// Lower bound of the adaptive target range, in milliseconds.
pub const MIN_TARGET_BUFFER_MS: u64 = 300;

/// Upper bound of the adaptive target range, in milliseconds.
///
/// An elevated preroll may hold the effective target above this bound;
/// the controller never moves it further up on its own.
pub const MAX_TARGET_BUFFER_MS: u64 = 1500;

/// Step size for every target adjustment, in milliseconds.
pub const TARGET_STEP_MS: u64 = 100;

/// Frames pulled from the engine per tick at most.
///
/// Bounds time spent in one fill pass; a drained buffer catches back up
/// over a few ticks instead of stalling one tick for a whole refill.
pub const MAX_FILL_ITERATIONS: u32 = 5;

/// Concealment frames emitted per underrun episode.
pub const RECOVERY_FRAMES: u32 = 3;

/// Quiet period required on both controller gates before the target
/// narrows by one step.
pub const NO_UNDERRUN_DECAY: Duration = Duration::from_secs(60);

/// Hard bound on queued frames, independent of the target.
pub const MAX_QUEUED_FRAMES: usize = (MAX_TARGET_BUFFER_MS / FRAME_DURATION_MS) as usize;

/// Consecutive fully starved ticks below preroll before the target is
/// ratcheted up without waiting for a real underrun.
pub const FILL_STARVE_TICKS: u32 = 3;

// ============================================================================
// Budget seam
// ============================================================================

/// Source of the node-wide buffered-audio total.
///
/// Implemented by the session registry; the provider consults it once
/// per tick to compute how much of the global budget is left for this
/// session.
pub trait BufferBudget: Send + Sync {
    /// Aggregate buffered milliseconds across all sessions except
    /// `excluding`.
    fn global_buffered_ms(&self, excluding: u64) -> u64;
}

// ============================================================================
// Buffer state
// ============================================================================

/// Mutable state guarded by the provider's mutex.
///
/// `buffered_ms` is always `queue.len() * 20`; every mutation keeps the
/// two in lockstep.
struct BufferState {
    /// Decoded-ahead frames awaiting delivery, oldest first
    queue: VecDeque<Vec<u8>>,
    /// Buffered duration in milliseconds
    buffered_ms: u64,
    /// Adaptive target depth in milliseconds
    target_buffer_ms: u64,
    /// Whether the preroll gate has opened for the current track
    started: bool,
    /// Last frame actually delivered, kept for repeat concealment
    last_valid_frame: Option<Vec<u8>>,
    /// Armed concealment frame for the active underrun episode
    recovery_frame: Option<Vec<u8>>,
    /// Concealment emissions left in the active episode
    recovery_left: u32,
    /// Underrun ticks since the current track started
    underruns: u64,
    /// When the most recent underrun happened (diagnostic only)
    last_underrun_at: Option<Instant>,
    /// When the most recent real frame was delivered (diagnostic only)
    last_provide_at: Option<Instant>,
    /// Duration of the most recent fill pass
    last_fill: Duration,
    /// Frames pulled by the most recent fill pass
    last_fill_frames: u32,
    /// Consecutive fully starved ticks while below preroll
    fill_starve_streak: u32,
    /// Other sessions' buffered total sampled at the top of the tick
    other_global_ms: u64,
    /// Controller gate: reset to `now` on every underrun
    underrun_gate: Instant,
    /// Controller gate: reset to `now` on every narrowing
    decrease_gate: Instant,
}

// ============================================================================
// FrameProvider
// ============================================================================

/// Per-session adaptive jitter buffer
///
/// The transport drives it with two calls per tick: `can_provide` to
/// run the fill/adapt cycle and ask whether a frame is available, then
/// `retrieve_frame` to take it. Track lifecycle hooks reset the buffer
/// without touching the learned target.
pub struct FrameProvider {
    session_id: u64,
    state: Mutex<BufferState>,
    /// Lock-free mirror of `BufferState::buffered_ms`
    buffered_ms_gauge: AtomicU64,
    /// Preroll threshold, fixed at construction
    min_preroll_ms: u64,
    /// Per-session cap in milliseconds, 0 = uncapped
    session_cap_ms: u64,
    /// Node-wide cap in milliseconds, 0 = uncapped
    global_cap_ms: u64,
    strategy: RecoveryStrategy,
    engine: Arc<dyn DecodeEngine>,
    budget: Arc<dyn BufferBudget>,
    loss: Arc<LossTracker>,
    /// Owning player, held weakly to avoid a reference cycle
    player: Weak<Player>,
}

impl FrameProvider {
    /// Create a provider from the node configuration.
    ///
    /// Out-of-range configuration is clamped, not rejected: the target
    /// is forced into 300..=1500 ms, then raised to the preroll when the
    /// preroll demands more than the target.
    pub fn new(
        session_id: u64,
        config: &NodeConfig,
        engine: Arc<dyn DecodeEngine>,
        budget: Arc<dyn BufferBudget>,
        loss: Arc<LossTracker>,
        player: Weak<Player>,
    ) -> Self {
        let min_preroll_ms = config
            .buffer
            .min_preroll_ms
            .unwrap_or(DEFAULT_MIN_PREROLL_MS);
        let mut target_buffer_ms = config
            .buffer
            .target_buffer_ms
            .unwrap_or(DEFAULT_TARGET_BUFFER_MS)
            .clamp(MIN_TARGET_BUFFER_MS, MAX_TARGET_BUFFER_MS);
        if target_buffer_ms < min_preroll_ms {
            target_buffer_ms = min_preroll_ms;
        }

        let now = Instant::now();
        Self {
            session_id,
            state: Mutex::new(BufferState {
                queue: VecDeque::new(),
                buffered_ms: 0,
                target_buffer_ms,
                started: false,
                last_valid_frame: None,
                recovery_frame: None,
                recovery_left: 0,
                underruns: 0,
                last_underrun_at: None,
                last_provide_at: None,
                last_fill: Duration::ZERO,
                last_fill_frames: 0,
                fill_starve_streak: 0,
                other_global_ms: 0,
                underrun_gate: now,
                decrease_gate: now,
            }),
            buffered_ms_gauge: AtomicU64::new(0),
            min_preroll_ms,
            session_cap_ms: config.buffer.max_session_buffer_ms,
            global_cap_ms: config.buffer.max_global_buffer_ms,
            strategy: RecoveryStrategy::from_name(&config.recovery.strategy),
            engine,
            budget,
            loss,
            player,
        }
    }

    // ========================================================================
    // Tick path
    // ========================================================================

    /// Run one tick's fill/adapt cycle and report whether a frame (real
    /// or concealment) is available.
    ///
    /// # Side Effects
    /// - Pulls up to [`MAX_FILL_ITERATIONS`] frames from the engine
    /// - May narrow the target after a sustained quiet period
    /// - May emit a preload hint or trigger a gapless swap via the player
    /// - On underrun: widens the target, records the loss, arms concealment
    pub fn can_provide(&self) -> bool {
        self.can_provide_at(Instant::now())
    }

    fn can_provide_at(&self, now: Instant) -> bool {
        let other_global_ms = self.budget.global_buffered_ms(self.session_id);
        {
            let mut state = self.state.lock().unwrap();
            state.other_global_ms = other_global_ms;
            self.fill_buffer(&mut state, now);
            self.maybe_decrease_target(&mut state, now);
        }

        // A triggered swap re-enters the lifecycle hooks, so the state
        // lock must not be held across the transition check.
        self.maybe_preload_next();

        let mut state = self.state.lock().unwrap();

        if !state.started {
            if state.buffered_ms >= self.min_preroll_ms {
                state.started = true;
                debug!(
                    "Session {} preroll complete with {} ms buffered",
                    self.session_id, state.buffered_ms
                );
            } else {
                return false;
            }
        }

        if state.queue.is_empty() {
            warn!("Opus buffer underrun for session {}", self.session_id);
            state.underruns += 1;
            state.last_underrun_at = Some(now);
            self.increase_target(&mut state, now);
            self.loss.record_loss();
            if state.recovery_left == 0 {
                state.recovery_frame = self.strategy.recover(state.last_valid_frame.as_deref());
                state.recovery_left = if state.recovery_frame.is_some() {
                    RECOVERY_FRAMES
                } else {
                    0
                };
            }
            return state.recovery_frame.is_some();
        }

        true
    }

    /// Deliver one frame into `out`, overwriting its contents.
    ///
    /// While a concealment episode is active the armed frame is emitted
    /// instead of a queued one; concealment counts neither as a loss nor
    /// as a delivery and does not become the repeat candidate. An empty
    /// queue with no concealment leaves `out` empty and records a loss.
    pub fn retrieve_frame(&self, out: &mut Vec<u8>) {
        let mut state = self.state.lock().unwrap();

        if state.recovery_left > 0 {
            if let Some(frame) = state.recovery_frame.take() {
                state.recovery_left -= 1;
                out.clear();
                out.extend_from_slice(&frame);
                if state.recovery_left > 0 {
                    state.recovery_frame = Some(frame);
                }
                drop(state);
                self.touch_player();
                return;
            }
        }

        let Some(frame) = state.queue.pop_front() else {
            drop(state);
            out.clear();
            self.loss.record_loss();
            return;
        };

        state.buffered_ms = state.buffered_ms.saturating_sub(FRAME_DURATION_MS);
        self.buffered_ms_gauge
            .store(state.buffered_ms, Ordering::Release);
        state.last_provide_at = Some(Instant::now());
        out.clear();
        out.extend_from_slice(&frame);
        state.last_valid_frame = Some(frame);
        drop(state);

        self.loss.record_success();
        self.touch_player();
    }

    // ========================================================================
    // Lifecycle hooks
    // ========================================================================

    /// A track started: discard buffered audio and re-arm the preroll
    /// gate. The learned target and controller gates survive.
    pub fn on_track_start(&self) {
        let mut state = self.state.lock().unwrap();
        self.clear_buffer(&mut state);
        state.started = false;
    }

    /// A track ended: discard buffered audio. The preroll gate stays
    /// open so a follow-up track on the same provider is not re-gated
    /// unless a start hook fires.
    pub fn on_track_end(&self) {
        let mut state = self.state.lock().unwrap();
        self.clear_buffer(&mut state);
    }

    /// The engine reported a stall: widen the target one step.
    pub fn on_stuck(&self) {
        let mut state = self.state.lock().unwrap();
        self.increase_target(&mut state, Instant::now());
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Buffered duration in milliseconds, from the lock-free gauge.
    pub fn buffered_ms(&self) -> u64 {
        self.buffered_ms_gauge.load(Ordering::Acquire)
    }

    /// Configured preroll threshold in milliseconds.
    pub fn min_preroll_ms(&self) -> u64 {
        self.min_preroll_ms
    }

    /// Point-in-time snapshot for diagnostics.
    pub fn diagnostics(&self) -> BufferDiagnostics {
        let state = self.state.lock().unwrap();
        BufferDiagnostics {
            buffered_ms: state.buffered_ms,
            target_buffer_ms: state.target_buffer_ms,
            min_preroll_ms: self.min_preroll_ms,
            queue_depth: state.queue.len(),
            underruns: state.underruns,
            last_fill_micros: state.last_fill.as_micros() as u64,
            last_fill_frames: state.last_fill_frames,
            concealment_frames_left: state.recovery_left,
        }
    }

    // ========================================================================
    // Fill and target control
    // ========================================================================

    /// Pull frames from the engine toward the target, bounded per tick.
    ///
    /// A pass that pulls nothing while the buffer sits below preroll
    /// counts toward a starve streak; three in a row ratchet the target
    /// up so a slow source earns headroom before the first underrun.
    fn fill_buffer(&self, state: &mut BufferState, now: Instant) {
        let fill_started = Instant::now();
        let mut frames = 0u32;
        let mut iterations = 0u32;

        while state.buffered_ms < state.target_buffer_ms && iterations < MAX_FILL_ITERATIONS {
            if let Some(cap) = self.effective_cap_ms(state) {
                if state.buffered_ms >= cap {
                    break;
                }
            }

            let mut frame = Vec::with_capacity(crate::decode::MAX_FRAME_BYTES);
            if !self.engine.try_provide(&mut frame) {
                break;
            }

            if state.queue.len() >= MAX_QUEUED_FRAMES {
                // The pulled frame is dropped; the queue already holds
                // the hard maximum.
                break;
            }

            state.queue.push_back(frame);
            state.buffered_ms += FRAME_DURATION_MS;
            frames += 1;
            iterations += 1;
        }

        state.last_fill = fill_started.elapsed();
        state.last_fill_frames = frames;

        if frames == 0 && state.buffered_ms < self.min_preroll_ms {
            state.fill_starve_streak += 1;
            if state.fill_starve_streak >= FILL_STARVE_TICKS {
                self.increase_target(state, now);
                state.fill_starve_streak = 0;
            }
        } else {
            state.fill_starve_streak = 0;
        }

        self.buffered_ms_gauge
            .store(state.buffered_ms, Ordering::Release);
    }

    /// Widen the target one step and reset both controller gates.
    fn increase_target(&self, state: &mut BufferState, now: Instant) {
        state.target_buffer_ms =
            MAX_TARGET_BUFFER_MS.min(state.target_buffer_ms + TARGET_STEP_MS);
        self.apply_buffer_caps(state);
        state.underrun_gate = now;
        if state.decrease_gate < state.underrun_gate {
            state.decrease_gate = state.underrun_gate;
        }
    }

    /// Narrow the target one step when both gates have been quiet for
    /// [`NO_UNDERRUN_DECAY`].
    fn maybe_decrease_target(&self, state: &mut BufferState, now: Instant) {
        if now.duration_since(state.underrun_gate) < NO_UNDERRUN_DECAY {
            return;
        }
        if now.duration_since(state.decrease_gate) < NO_UNDERRUN_DECAY {
            return;
        }
        let floor = MIN_TARGET_BUFFER_MS.max(self.min_preroll_ms);
        state.target_buffer_ms = floor.max(state.target_buffer_ms.saturating_sub(TARGET_STEP_MS));
        self.apply_buffer_caps(state);
        state.decrease_gate = now;
    }

    /// Clamp the target to the effective cap when one is configured.
    ///
    /// This can transiently push the target below its usual floor; the
    /// controller recovers once the cap loosens.
    fn apply_buffer_caps(&self, state: &mut BufferState) {
        if let Some(cap) = self.effective_cap_ms(state) {
            state.target_buffer_ms = state.target_buffer_ms.min(cap);
        }
    }

    /// The tightest configured cap for this session right now, or `None`
    /// when no cap is configured at all.
    ///
    /// The global cap contributes its remaining headroom after the other
    /// sessions' buffered total, saturating at zero.
    fn effective_cap_ms(&self, state: &BufferState) -> Option<u64> {
        let mut cap: Option<u64> = None;
        if self.session_cap_ms > 0 {
            cap = Some(self.session_cap_ms);
        }
        if self.global_cap_ms > 0 {
            let remaining = self.global_cap_ms.saturating_sub(state.other_global_ms);
            cap = Some(cap.map_or(remaining, |existing| existing.min(remaining)));
        }
        cap
    }

    /// Discard buffered audio and all per-track bookkeeping.
    ///
    /// The adaptive target, the controller gates, and the preroll flag
    /// are deliberately untouched; they belong to the session, not to
    /// the track.
    fn clear_buffer(&self, state: &mut BufferState) {
        state.queue.clear();
        state.buffered_ms = 0;
        state.last_valid_frame = None;
        state.recovery_frame = None;
        state.recovery_left = 0;
        state.underruns = 0;
        state.last_underrun_at = None;
        state.last_provide_at = None;
        state.last_fill = Duration::ZERO;
        state.last_fill_frames = 0;
        state.fill_starve_streak = 0;
        self.buffered_ms_gauge.store(0, Ordering::Release);
    }

    // ========================================================================
    // Track transition checks
    // ========================================================================

    /// Check how much of the current track remains and nudge the player
    /// toward preparing or swapping in the next one.
    fn maybe_preload_next(&self) {
        let Some(player) = self.player.upgrade() else {
            return;
        };
        let Some(playing) = self.engine.current() else {
            return;
        };
        let Some(remaining_ms) = playing.remaining_ms() else {
            return;
        };
        if remaining_ms <= PRELOAD_AT_MS {
            player.hint_preload_next();
        }
        if remaining_ms <= SWAP_AT_MS {
            player.try_swap_next_soon();
        }
    }

    fn touch_player(&self) {
        if let Some(player) = self.player.upgrade() {
            player.touch_activity();
        }
    }
}

impl std::fmt::Debug for FrameProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProvider")
            .field("session_id", &self.session_id)
            .field("buffered_ms", &self.buffered_ms())
            .field("min_preroll_ms", &self.min_preroll_ms)
            .field("strategy", &self.strategy)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
