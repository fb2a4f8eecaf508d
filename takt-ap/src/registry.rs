//! Session registry
//!
//! Owns every live session's player, keyed by session id, and the
//! node-wide event channel. It is also the [`BufferBudget`] the jitter
//! buffers consult: the global buffered total is the sum of the
//! per-session lock-free gauges, so the tick path never contends with
//! another session's buffer lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use takt_common::config::NodeConfig;
use takt_common::events::NodeEvent;

use crate::decode::DecodeEngine;
use crate::playback::player::Player;
use crate::playback::provider::BufferBudget;

/// Broadcast capacity; lagging subscribers drop the oldest events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Registry of live playback sessions
pub struct SessionRegistry {
    config: NodeConfig,
    sessions: RwLock<HashMap<u64, Arc<Player>>>,
    event_tx: broadcast::Sender<NodeEvent>,
}

impl SessionRegistry {
    /// Create an empty registry with the given node configuration.
    pub fn new(config: NodeConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            event_tx,
        })
    }

    /// Fetch the session's player, creating it (and registering it with
    /// the engine) on first use.
    ///
    /// The engine is only consumed on creation; an existing session
    /// keeps the engine it was created with.
    pub fn get_or_create(
        self: &Arc<Self>,
        session_id: u64,
        engine: Arc<dyn DecodeEngine>,
    ) -> Arc<Player> {
        if let Some(player) = self.sessions.read().unwrap().get(&session_id) {
            return player.clone();
        }

        let mut sessions = self.sessions.write().unwrap();
        sessions
            .entry(session_id)
            .or_insert_with(|| {
                debug!("Creating session {}", session_id);
                let budget: Arc<dyn BufferBudget> = self.clone();
                Player::new(
                    session_id,
                    self.config.clone(),
                    engine,
                    budget,
                    self.event_tx.clone(),
                )
            })
            .clone()
    }

    /// Fetch an existing session's player.
    pub fn get(&self, session_id: u64) -> Option<Arc<Player>> {
        self.sessions.read().unwrap().get(&session_id).cloned()
    }

    /// Destroy a session: stop playback, detach its buffer, and forget
    /// it.
    ///
    /// # Returns
    /// `true` when the session existed.
    pub fn remove(&self, session_id: u64) -> bool {
        let removed = { self.sessions.write().unwrap().remove(&session_id) };
        match removed {
            Some(player) => {
                // Teardown runs outside the map lock; budget reads keep going.
                player.destroy();
                info!("Destroyed session {}", session_id);
                true
            }
            None => false,
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Identifiers of all live sessions.
    pub fn session_ids(&self) -> Vec<u64> {
        self.sessions.read().unwrap().keys().copied().collect()
    }

    /// Subscribe to the node event channel.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe as an async stream, for consumers that forward events.
    pub fn subscribe_stream(&self) -> BroadcastStream<NodeEvent> {
        BroadcastStream::new(self.event_tx.subscribe())
    }

    /// Sender handle for components that emit node events.
    pub fn event_sender(&self) -> broadcast::Sender<NodeEvent> {
        self.event_tx.clone()
    }
}

impl BufferBudget for SessionRegistry {
    fn global_buffered_ms(&self, excluding: u64) -> u64 {
        self.sessions
            .read()
            .unwrap()
            .iter()
            .filter(|(id, _)| **id != excluding)
            .map(|(_, player)| player.buffered_ms())
            .sum()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.session_count())
            .finish()
    }
}
