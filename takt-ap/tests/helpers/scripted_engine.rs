//! Scripted decode engine for integration tests
//!
//! Produces deterministic frames on demand and exposes manual control
//! over playback position, so tests can steer the preload and swap
//! thresholds without waiting on wall-clock playback.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use takt_ap::decode::{live_observers, DecodeEngine, PlayingTrack, TrackHandle, TrackObserver};
use takt_common::events::EndReason;

/// Decode engine stub driven entirely by the test.
///
/// Frames are 96-byte payloads stamped with a sequence number, so tests
/// can assert both delivery counts and frame identity. Lifecycle
/// callbacks fire synchronously from the control calls, the way a real
/// engine driver raises them, and never from inside `try_provide`.
pub struct ScriptedEngine {
    /// Monotonic stamp written into each produced frame
    seq: AtomicU32,
    /// While set, `try_provide` refuses even with a track loaded
    stalled: AtomicBool,
    paused: AtomicBool,
    current: Mutex<Option<PlayingTrack>>,
    observers: Mutex<Vec<Weak<dyn TrackObserver>>>,
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seq: AtomicU32::new(0),
            stalled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            current: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Suspend or resume frame production without touching track state.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Release);
    }

    /// Move the playhead of the loaded track.
    pub fn set_position(&self, position_ms: u64) {
        if let Some(playing) = self.current.lock().unwrap().as_mut() {
            playing.position_ms = position_ms;
        }
    }

    /// Simulate the track reaching its natural end.
    pub fn finish_current(&self) {
        let previous = self.current.lock().unwrap().take();
        if let Some(previous) = previous {
            self.fire_end(&previous.handle, EndReason::Finished);
        }
    }

    /// Simulate the backend reclaiming the track during teardown.
    pub fn reclaim_current(&self) {
        let previous = self.current.lock().unwrap().take();
        if let Some(previous) = previous {
            self.fire_end(&previous.handle, EndReason::Cleanup);
        }
    }

    /// Total frames produced so far.
    pub fn frames_produced(&self) -> u32 {
        self.seq.load(Ordering::Relaxed)
    }

    fn fire_start(&self, track: &TrackHandle) {
        for observer in live_observers(&mut self.observers.lock().unwrap()) {
            observer.track_start(track);
        }
    }

    fn fire_end(&self, track: &TrackHandle, reason: EndReason) {
        for observer in live_observers(&mut self.observers.lock().unwrap()) {
            observer.track_end(track, reason);
        }
    }
}

impl DecodeEngine for ScriptedEngine {
    fn play(&self, track: TrackHandle) {
        let previous = {
            let mut current = self.current.lock().unwrap();
            current.replace(PlayingTrack {
                handle: track.clone(),
                position_ms: 0,
            })
        };
        if let Some(previous) = previous {
            self.fire_end(&previous.handle, EndReason::Replaced);
        }
        self.fire_start(&track);
    }

    fn stop(&self) {
        let previous = self.current.lock().unwrap().take();
        if let Some(previous) = previous {
            self.fire_end(&previous.handle, EndReason::Stopped);
        }
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn seek_to(&self, position_ms: u64) {
        self.set_position(position_ms);
    }

    fn set_volume(&self, _volume: u16) {}

    fn current(&self) -> Option<PlayingTrack> {
        self.current.lock().unwrap().clone()
    }

    fn try_provide(&self, frame: &mut Vec<u8>) -> bool {
        if self.paused.load(Ordering::Acquire) || self.stalled.load(Ordering::Acquire) {
            return false;
        }
        if self.current.lock().unwrap().is_none() {
            return false;
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        frame.clear();
        frame.resize(96, 0);
        frame[..4].copy_from_slice(&seq.to_be_bytes());
        true
    }

    fn add_observer(&self, observer: Weak<dyn TrackObserver>) {
        self.observers.lock().unwrap().push(observer);
    }
}

/// Track handle with a test-scheme encoded form.
pub fn synthetic_track(duration_ms: u64) -> TrackHandle {
    TrackHandle::new(format!("test:{}", duration_ms), duration_ms)
}
