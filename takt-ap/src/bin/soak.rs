//! Soak driver for the session playback core
//!
//! Runs a number of synthetic sessions at the real 20 ms transport
//! cadence against a jittery frame source, exercising preroll, underrun
//! concealment, the adaptive target controller, and gapless transitions,
//! then prints a per-session delivery summary.
//!
//! Usage:
//!   soak --sessions 4 --duration-secs 30 --stall-chance 0.05
//!   soak --seed 42 --export /tmp/soak.json

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::EnvFilter;

use takt_ap::decode::{
    live_observers, DecodeEngine, PlayingTrack, TrackHandle, TrackObserver, MAX_FRAME_BYTES,
};
use takt_ap::playback::Player;
use takt_ap::SessionRegistry;
use takt_common::config::NodeConfig;
use takt_common::events::{EndReason, NodeEvent};
use takt_common::timing::frame_interval;

#[derive(Parser, Debug)]
#[command(name = "soak", about = "TAKT session core soak driver", version)]
struct Args {
    /// Number of concurrent sessions
    #[arg(long, default_value_t = 4)]
    sessions: u64,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 30)]
    duration_secs: u64,

    /// Probability that a single frame pull stalls
    #[arg(long, default_value_t = 0.05)]
    stall_chance: f64,

    /// Configuration file path
    #[arg(long, env = "TAKT_CONFIG")]
    config: Option<PathBuf>,

    /// Write a JSON report to this path at the end
    #[arg(long)]
    export: Option<PathBuf>,

    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

/// Decode engine stub with tunable delivery jitter
///
/// Playback position advances with the wall clock while decode progress
/// advances per pulled frame, so the buffer legitimately runs ahead of
/// the position the way a real decoder does. Lifecycle events fire from
/// control calls and from the driver loop, never from `try_provide`.
struct JitterEngine {
    rng: Mutex<StdRng>,
    stall_chance: f64,
    state: Mutex<EngineState>,
    paused: AtomicBool,
    observers: Mutex<Vec<Weak<dyn TrackObserver>>>,
    plays: AtomicU64,
}

struct EngineState {
    track: Option<TrackHandle>,
    started_at: Instant,
    /// Decode progress in milliseconds, capped at the track duration
    decoded_ms: u64,
}

impl JitterEngine {
    fn new(seed: u64, stall_chance: f64) -> Arc<Self> {
        Arc::new(Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            stall_chance,
            state: Mutex::new(EngineState {
                track: None,
                started_at: Instant::now(),
                decoded_ms: 0,
            }),
            paused: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
            plays: AtomicU64::new(0),
        })
    }

    /// Take the current track if its wall-clock position has reached the
    /// end, so the driver can raise the Finished transition.
    fn take_finished(&self) -> Option<TrackHandle> {
        let mut state = self.state.lock().unwrap();
        let done = match &state.track {
            Some(track) => {
                track.duration_ms > 0
                    && state.started_at.elapsed().as_millis() as u64 >= track.duration_ms
            }
            None => false,
        };
        if done {
            state.track.take()
        } else {
            None
        }
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

impl DecodeEngine for JitterEngine {
    fn play(&self, track: TrackHandle) {
        self.plays.fetch_add(1, Ordering::Relaxed);
        let previous = {
            let mut state = self.state.lock().unwrap();
            let previous = state.track.replace(track.clone());
            state.started_at = Instant::now();
            state.decoded_ms = 0;
            previous
        };
        if let Some(previous) = previous {
            self.fire_end(&previous, EndReason::Replaced);
        }
        self.fire_start(&track);
    }

    fn stop(&self) {
        let previous = self.state.lock().unwrap().track.take();
        if let Some(previous) = previous {
            self.fire_end(&previous, EndReason::Stopped);
        }
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn seek_to(&self, _position_ms: u64) {}

    fn set_volume(&self, _volume: u16) {}

    fn current(&self) -> Option<PlayingTrack> {
        let state = self.state.lock().unwrap();
        state.track.as_ref().map(|track| {
            let elapsed = state.started_at.elapsed().as_millis() as u64;
            let position_ms = if track.duration_ms > 0 {
                elapsed.min(track.duration_ms)
            } else {
                elapsed
            };
            PlayingTrack {
                handle: track.clone(),
                position_ms,
            }
        })
    }

    fn try_provide(&self, frame: &mut Vec<u8>) -> bool {
        if self.is_paused() {
            return false;
        }
        let (stalled, len) = {
            let mut rng = self.rng.lock().unwrap();
            (rng.gen_bool(self.stall_chance), rng.gen_range(80..=160))
        };
        if stalled {
            return false;
        }
        let mut state = self.state.lock().unwrap();
        let Some(track) = &state.track else {
            return false;
        };
        if track.duration_ms > 0 && state.decoded_ms >= track.duration_ms {
            // Decoder exhausted; the buffered tail keeps playing until
            // the wall clock catches up
            return false;
        }
        state.decoded_ms += takt_common::timing::FRAME_DURATION_MS;
        frame.clear();
        frame.resize(len, 0xA5);
        true
    }

    fn add_observer(&self, observer: Weak<dyn TrackObserver>) {
        self.observers.lock().unwrap().push(observer);
    }
}

#[derive(Debug, Serialize)]
struct SessionReport {
    session_id: u64,
    ticks: u64,
    delivered: u64,
    silent: u64,
    tracks_played: u64,
    final_target_ms: u64,
    final_buffered_ms: u64,
}

#[derive(Debug, Serialize)]
struct SoakReport {
    seed: u64,
    sessions: Vec<SessionReport>,
}

fn synthetic_track(rng: &mut impl Rng) -> TrackHandle {
    let duration_ms = rng.gen_range(15_000..=30_000);
    TrackHandle::new(format!("soak:{}", rng.gen::<u32>()), duration_ms)
}

/// Drive one session at the transport cadence until the deadline.
async fn run_session(
    player: Arc<Player>,
    engine: Arc<JitterEngine>,
    seed: u64,
    duration_secs: u64,
) -> SessionReport {
    let mut rng = StdRng::seed_from_u64(seed);
    let provider = player.attach();
    player.play(synthetic_track(&mut rng));

    let deadline = Instant::now() + std::time::Duration::from_secs(duration_secs);
    let mut ticker = tokio::time::interval(frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut frame = Vec::with_capacity(MAX_FRAME_BYTES);
    let mut ticks = 0u64;
    let mut delivered = 0u64;
    let mut silent = 0u64;

    while Instant::now() < deadline {
        ticker.tick().await;
        ticks += 1;

        if let Some(finished) = engine.take_finished() {
            engine.fire_end(&finished, EndReason::Finished);
            // Prefer the queued successor; fall back to a fresh track
            if !player.try_swap_next_soon() {
                player.play(synthetic_track(&mut rng));
            }
        }

        if provider.can_provide() {
            provider.retrieve_frame(&mut frame);
            if frame.is_empty() {
                silent += 1;
            } else {
                delivered += 1;
            }
        } else {
            silent += 1;
        }
    }

    let diag = provider.diagnostics();
    SessionReport {
        session_id: player.session_id(),
        ticks,
        delivered,
        silent,
        tracks_played: engine.plays.load(Ordering::Relaxed),
        final_target_ms: diag.target_buffer_ms,
        final_buffered_ms: diag.buffered_ms,
    }
}

/// Feed queued successors whenever a session asks for one.
async fn run_preload_controller(registry: Arc<SessionRegistry>, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rx = registry.subscribe();
    loop {
        match rx.recv().await {
            Ok(NodeEvent::PreloadHint { session_id, .. }) => {
                if let Some(player) = registry.get(session_id) {
                    player.set_next_track(synthetic_track(&mut rng));
                }
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!(
        "takt-ap soak {} ({} {} {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = NodeConfig::load_or_default(args.config.as_deref(), "TAKT_CONFIG")
        .context("Failed to load configuration")?;

    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!(
        "Running {} sessions for {} s, stall chance {:.3}, seed {}",
        args.sessions, args.duration_secs, args.stall_chance, seed
    );

    let registry = SessionRegistry::new(config);
    tokio::spawn(run_preload_controller(registry.clone(), seed ^ 0x5eed));

    let mut tasks = Vec::new();
    for session_id in 1..=args.sessions {
        let engine = JitterEngine::new(seed.wrapping_add(session_id), args.stall_chance);
        let player = registry.get_or_create(session_id, engine.clone());
        tasks.push(tokio::spawn(run_session(
            player,
            engine,
            seed.wrapping_add(session_id),
            args.duration_secs,
        )));
    }

    let mut sessions = Vec::new();
    for task in tasks {
        sessions.push(task.await.context("Session task panicked")?);
    }
    sessions.sort_by_key(|report| report.session_id);

    println!("\n=== Soak Summary ===");
    println!(
        "{:>8} {:>8} {:>10} {:>8} {:>8} {:>12} {:>12}",
        "session", "ticks", "delivered", "silent", "tracks", "target(ms)", "buffered(ms)"
    );
    for report in &sessions {
        println!(
            "{:>8} {:>8} {:>10} {:>8} {:>8} {:>12} {:>12}",
            report.session_id,
            report.ticks,
            report.delivered,
            report.silent,
            report.tracks_played,
            report.final_target_ms,
            report.final_buffered_ms
        );
    }
    let delivered: u64 = sessions.iter().map(|r| r.delivered).sum();
    let silent: u64 = sessions.iter().map(|r| r.silent).sum();
    let total = delivered + silent;
    let health = if total > 0 {
        delivered as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    println!(
        "\nDelivered {} of {} ticks ({:.2}%) across {} sessions",
        delivered,
        total,
        health,
        sessions.len()
    );

    for report in &sessions {
        registry.remove(report.session_id);
    }

    if let Some(path) = args.export {
        let report = SoakReport { seed, sessions };
        let json = serde_json::to_string_pretty(&report).context("Failed to encode report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    Ok(())
}
