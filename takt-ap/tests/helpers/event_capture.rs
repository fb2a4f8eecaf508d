//! Drain-and-filter utilities for the node event stream

use tokio::sync::broadcast;
use uuid::Uuid;

use takt_common::events::{EndReason, NodeEvent};

/// Collect everything currently sitting in the receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<NodeEvent>) -> Vec<NodeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Track-end reasons in emission order.
pub fn end_reasons(events: &[NodeEvent]) -> Vec<EndReason> {
    events
        .iter()
        .filter_map(|event| match event {
            NodeEvent::TrackEnd { reason, .. } => Some(*reason),
            _ => None,
        })
        .collect()
}

/// Track identifiers from start events, in emission order.
pub fn started_track_ids(events: &[NodeEvent]) -> Vec<Uuid> {
    events
        .iter()
        .filter_map(|event| match event {
            NodeEvent::TrackStart { track_id, .. } => Some(*track_id),
            _ => None,
        })
        .collect()
}
