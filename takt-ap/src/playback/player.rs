//! Session player orchestration
//!
//! One [`Player`] per session. It owns the control surface (play, stop,
//! pause, seek, volume), reacts to track lifecycle transitions from the
//! decode engine, runs the periodic state broadcast and diagnostic
//! tasks, and manages the queued-next-track slot that makes gapless
//! transitions possible.
//!
//! ## Gapless transitions
//!
//! An external controller queues the follow-up track into the next-track
//! slot after the preload hint fires. When the playing track is nearly
//! done, the jitter buffer asks the player to swap: the slot is taken and
//! played immediately, without waiting for the natural end-of-track
//! round trip through the controller.
//!
//! ## Thread Safety
//!
//! The next-track slot mutex doubles as the pause-transition lock: the
//! swap's pause check and slot take form one critical section, so a
//! concurrent `set_pause(true)` either lands before the check (swap
//! refused, slot kept) or waits until the swap has committed.
//!
//! Lifecycle callbacks can arrive on plain transport threads; the
//! periodic tasks spawn through the runtime handle captured at
//! creation, never through the ambient context alone.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use takt_common::config::NodeConfig;
use takt_common::events::{EndReason, NodeEvent, PlayerState};

use crate::decode::{DecodeEngine, TrackHandle, TrackObserver};
use crate::error::{Error, Result};
use crate::playback::loss::LossTracker;
use crate::playback::provider::{BufferBudget, FrameProvider};

/// Remaining playback time at which the preload hint fires, in
/// milliseconds.
pub const PRELOAD_AT_MS: u64 = 12_000;

/// Remaining playback time at which the gapless swap is attempted, in
/// milliseconds.
pub const SWAP_AT_MS: u64 = 300;

/// Per-session playback orchestrator
pub struct Player {
    session_id: u64,
    config: NodeConfig,
    engine: Arc<dyn DecodeEngine>,
    budget: Arc<dyn BufferBudget>,
    events: broadcast::Sender<NodeEvent>,
    loss: Arc<LossTracker>,
    /// Jitter buffer once a transport has attached, session-wide
    provider: RwLock<Option<Arc<FrameProvider>>>,
    /// Next-track slot; also serializes pause transitions against swaps
    transition: Mutex<Option<TrackHandle>>,
    /// Advisory flag mirroring whether the slot holds a track
    next_queued: AtomicBool,
    /// Latch ensuring at most one preload hint per track
    preload_requested: AtomicBool,
    /// Wall-clock milliseconds of the last playback activity
    last_active_ms: AtomicU64,
    update_task: Mutex<Option<JoinHandle<()>>>,
    diagnostics_task: Mutex<Option<JoinHandle<()>>>,
    /// Runtime the periodic tasks spawn onto, captured at creation;
    /// lifecycle callbacks can arrive on plain transport threads
    runtime: Option<Handle>,
    /// Back-reference handed to the provider and the periodic tasks
    self_ref: Weak<Player>,
}

impl Player {
    /// Create a player and register it as the engine's lifecycle
    /// observer.
    ///
    /// The ambient tokio runtime, when there is one, is captured for
    /// the periodic tasks.
    pub fn new(
        session_id: u64,
        config: NodeConfig,
        engine: Arc<dyn DecodeEngine>,
        budget: Arc<dyn BufferBudget>,
        events: broadcast::Sender<NodeEvent>,
    ) -> Arc<Self> {
        let player = Arc::new_cyclic(|weak: &Weak<Player>| Self {
            session_id,
            config,
            engine: engine.clone(),
            budget,
            events,
            loss: Arc::new(LossTracker::new()),
            provider: RwLock::new(None),
            transition: Mutex::new(None),
            next_queued: AtomicBool::new(false),
            preload_requested: AtomicBool::new(false),
            last_active_ms: AtomicU64::new(wall_clock_ms()),
            update_task: Mutex::new(None),
            diagnostics_task: Mutex::new(None),
            runtime: Handle::try_current().ok(),
            self_ref: weak.clone(),
        });

        let observer: Weak<Player> = Arc::downgrade(&player);
        engine.add_observer(observer);
        player
    }

    /// Session identifier.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    // ========================================================================
    // Transport attachment
    // ========================================================================

    /// Create the jitter buffer for a freshly attached transport and
    /// return it for the transport to drive.
    ///
    /// Replaces any previous provider. If a track is already playing the
    /// new buffer starts from a clean preroll rather than inheriting the
    /// old transport's queue.
    pub fn attach(&self) -> Arc<FrameProvider> {
        let provider = Arc::new(FrameProvider::new(
            self.session_id,
            &self.config,
            self.engine.clone(),
            self.budget.clone(),
            self.loss.clone(),
            self.self_ref.clone(),
        ));
        *self.provider.write().unwrap() = Some(provider.clone());
        if self.engine.current().is_some() {
            provider.on_track_start();
        }
        provider
    }

    /// The attached jitter buffer, if any.
    pub fn provider(&self) -> Option<Arc<FrameProvider>> {
        self.provider.read().unwrap().clone()
    }

    /// Buffered audio for this session in milliseconds, zero when no
    /// transport is attached.
    pub fn buffered_ms(&self) -> u64 {
        self.provider().map(|p| p.buffered_ms()).unwrap_or(0)
    }

    // ========================================================================
    // Control surface
    // ========================================================================

    /// Begin playing a track, replacing the current one if any.
    pub fn play(&self, track: TrackHandle) {
        self.engine.play(track);
        self.send_player_update();
        self.touch_activity();
    }

    /// Stop playback and discard the queued next track.
    ///
    /// The lifecycle hooks fired by the engine already cancel the
    /// periodic tasks and clear the buffer; the explicit calls here also
    /// cover the case where nothing was playing.
    pub fn stop(&self) {
        self.engine.stop();
        self.cancel_update_task();
        self.cancel_diagnostics_task();
        self.clear_next_track();
        if let Some(provider) = self.provider() {
            provider.on_track_end();
        }
        self.touch_activity();
    }

    /// Suspend or resume playback.
    ///
    /// Serialized against gapless swaps through the transition lock.
    pub fn set_pause(&self, paused: bool) {
        {
            let _slot = self.transition.lock().unwrap();
            self.engine.set_paused(paused);
        }
        self.touch_activity();
    }

    /// Jump to a position within the current track.
    pub fn seek_to(&self, position_ms: u64) -> Result<()> {
        if self.engine.current().is_none() {
            return Err(Error::InvalidState(
                "can't seek when not playing anything".to_string(),
            ));
        }
        self.engine.seek_to(position_ms);
        Ok(())
    }

    /// Set output volume in percent (100 = unity).
    pub fn set_volume(&self, volume: u16) {
        self.engine.set_volume(volume);
    }

    /// Current coarse player state.
    pub fn state(&self) -> PlayerState {
        if self.engine.current().is_none() {
            PlayerState::Idle
        } else if self.engine.is_paused() {
            PlayerState::Paused
        } else {
            PlayerState::Playing
        }
    }

    /// Tear the session down: stop playback and detach the buffer.
    pub fn destroy(&self) {
        self.stop();
        *self.provider.write().unwrap() = None;
    }

    // ========================================================================
    // Next-track slot
    // ========================================================================

    /// Queue the track to swap to when the current one is nearly done.
    pub fn set_next_track(&self, track: TrackHandle) {
        let mut slot = self.transition.lock().unwrap();
        *slot = Some(track);
        self.next_queued.store(true, Ordering::Release);
    }

    /// Discard the queued next track, if any.
    pub fn clear_next_track(&self) {
        let mut slot = self.transition.lock().unwrap();
        *slot = None;
        self.next_queued.store(false, Ordering::Release);
    }

    /// Whether a next track is currently queued (advisory).
    pub fn is_next_queued(&self) -> bool {
        self.next_queued.load(Ordering::Acquire)
    }

    /// Attempt the gapless swap into the queued next track.
    ///
    /// Refused while paused or when the slot is empty. The pause check
    /// and the slot take are one critical section.
    ///
    /// # Returns
    /// `true` when the swap was performed.
    pub fn try_swap_next_soon(&self) -> bool {
        let taken = {
            let mut slot = self.transition.lock().unwrap();
            if self.engine.is_paused() {
                return false;
            }
            let taken = slot.take();
            if taken.is_some() {
                self.next_queued.store(false, Ordering::Release);
            }
            taken
        };

        let Some(next) = taken else {
            return false;
        };
        debug!(
            "Session {} swapping to queued track {}",
            self.session_id, next.id
        );
        self.play(next);
        true
    }

    /// Ask the controller for a successor track, at most once per track.
    pub fn hint_preload_next(&self) {
        if self.preload_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        self.broadcast(NodeEvent::PreloadHint {
            session_id: self.session_id,
            track_id: self.engine.current().map(|t| t.handle.id),
            timestamp: Utc::now(),
        });
    }

    // ========================================================================
    // Activity and reporting
    // ========================================================================

    /// Record playback activity for idle-session accounting.
    pub fn touch_activity(&self) {
        self.last_active_ms.store(wall_clock_ms(), Ordering::Release);
    }

    /// Wall-clock milliseconds of the last playback activity.
    pub fn last_active_ms(&self) -> u64 {
        self.last_active_ms.load(Ordering::Acquire)
    }

    /// Delivery ledger for this session.
    pub fn loss(&self) -> &LossTracker {
        &self.loss
    }

    /// Broadcast the current player state.
    pub fn send_player_update(&self) {
        let current = self.engine.current();
        self.broadcast(NodeEvent::PlayerUpdate {
            session_id: self.session_id,
            track_id: current.as_ref().map(|t| t.handle.id),
            position_ms: current.map(|t| t.position_ms).unwrap_or(0),
            paused: self.engine.is_paused(),
            buffered_ms: self.buffered_ms(),
            timestamp: Utc::now(),
        });
    }

    /// Whether the periodic state broadcast is currently scheduled.
    pub fn update_task_active(&self) -> bool {
        self.update_task
            .lock()
            .unwrap()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn broadcast(&self, event: NodeEvent) {
        // Ignore send errors (no subscribers is fine)
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Periodic tasks
    // ========================================================================

    /// Runtime for the periodic tasks.
    ///
    /// A track start triggered by a gapless swap arrives on the
    /// transport thread, outside any runtime context, so the handle
    /// captured at creation takes precedence over the ambient one.
    fn task_runtime(&self) -> Option<Handle> {
        let runtime = self.runtime.clone().or_else(|| Handle::try_current().ok());
        if runtime.is_none() {
            debug!(
                "Session {} has no async runtime; periodic tasks stay unscheduled",
                self.session_id
            );
        }
        runtime
    }

    /// Schedule the periodic state broadcast unless one is already live.
    ///
    /// Rapid start events reuse the running schedule instead of stacking
    /// duplicates; the first emission of a fresh schedule is immediate.
    fn schedule_update_task(&self) {
        let Some(runtime) = self.task_runtime() else {
            return;
        };
        let mut guard = self.update_task.lock().unwrap();
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        let weak = self.self_ref.clone();
        let interval_secs = self.config.playback.update_interval_secs.max(1);
        *guard = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                let Some(player) = weak.upgrade() else { break };
                player.send_player_update();
            }
        }));
    }

    fn cancel_update_task(&self) {
        if let Some(handle) = self.update_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Schedule the periodic diagnostic emission, replacing a previous
    /// schedule. A no-op unless diagnostics are enabled with a non-zero
    /// interval.
    fn schedule_diagnostics_task(&self) {
        if !self.config.diagnostics.enabled || self.config.diagnostics.interval_secs == 0 {
            return;
        }
        let Some(runtime) = self.task_runtime() else {
            return;
        };
        let mut guard = self.diagnostics_task.lock().unwrap();
        if let Some(handle) = guard.take() {
            handle.abort();
        }

        let weak = self.self_ref.clone();
        let interval_secs = self.config.diagnostics.interval_secs;
        *guard = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                let Some(player) = weak.upgrade() else { break };
                player.emit_diagnostics();
            }
        }));
    }

    fn cancel_diagnostics_task(&self) {
        if let Some(handle) = self.diagnostics_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn emit_diagnostics(&self) {
        let Some(provider) = self.provider() else {
            return;
        };
        let snapshot = provider.diagnostics();
        info!(
            "[diag session={}] buf={}ms target={}ms preroll={}ms q={} underruns={} fill={}us frames={} recovery_left={} loss={:.3}",
            self.session_id,
            snapshot.buffered_ms,
            snapshot.target_buffer_ms,
            snapshot.min_preroll_ms,
            snapshot.queue_depth,
            snapshot.underruns,
            snapshot.last_fill_micros,
            snapshot.last_fill_frames,
            snapshot.concealment_frames_left,
            self.loss.loss_ratio(),
        );
        self.broadcast(NodeEvent::PlayerDiagnostics {
            session_id: self.session_id,
            snapshot,
            timestamp: Utc::now(),
        });
    }
}

impl TrackObserver for Player {
    /// Reset per-track state, re-arm the buffer, and (re)schedule the
    /// periodic tasks. The buffer reset is strictly ordered before any
    /// scheduling so a task never observes the old track's queue.
    fn track_start(&self, track: &TrackHandle) {
        self.next_queued.store(false, Ordering::Release);
        self.preload_requested.store(false, Ordering::Release);

        if let Some(provider) = self.provider() {
            provider.on_track_start();
        }

        self.schedule_update_task();
        self.schedule_diagnostics_task();

        self.broadcast(NodeEvent::TrackStart {
            session_id: self.session_id,
            track_id: track.id,
            timestamp: Utc::now(),
        });
    }

    fn track_end(&self, track: &TrackHandle, reason: EndReason) {
        self.cancel_update_task();
        self.cancel_diagnostics_task();
        // A natural end empties the slot itself; a replacement only
        // resets the advisory flag and keeps its queued successor.
        if reason.may_start_next() {
            self.clear_next_track();
        } else {
            self.next_queued.store(false, Ordering::Release);
        }
        self.preload_requested.store(false, Ordering::Release);

        if let Some(provider) = self.provider() {
            provider.on_track_end();
        }

        self.broadcast(NodeEvent::TrackEnd {
            session_id: self.session_id,
            track_id: track.id,
            reason,
            timestamp: Utc::now(),
        });
    }

    fn track_stuck(&self, track: &TrackHandle, threshold_ms: u64) {
        if let Some(provider) = self.provider() {
            provider.on_stuck();
        }
        self.broadcast(NodeEvent::TrackStuck {
            session_id: self.session_id,
            track_id: track.id,
            threshold_ms,
            timestamp: Utc::now(),
        });
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .field("buffered_ms", &self.buffered_ms())
            .field("next_queued", &self.is_next_queued())
            .finish()
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============================================================================
// Tests
// ============================================================================
