//! Cross-view replication of the selection state. Multiple views (a ratio
//! editor and its detached results window) share one logical dataset
//! instance over a named broadcast topic; each carries a full snapshot and
//! the last snapshot to arrive wins. No locks, no server round trip.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::selection::{SelectionSnapshot, SelectionStore};
use crate::types::{CellKey, FormulaId};

/// Wire messages. `State` replicates the whole selection; `Request` is sent
/// by a freshly mounted view and answered by any peer holding state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    #[serde(rename = "ratio-sync-state")]
    State {
        source: String,
        ts: u64,
        strikes: Vec<CellKey>,
        selected: Vec<(usize, FormulaId)>,
    },
    #[serde(rename = "ratio-sync-request")]
    Request { source: String },
}

impl SyncMessage {
    pub fn source(&self) -> &str {
        match self {
            SyncMessage::State { source, .. } | SyncMessage::Request { source } => source,
        }
    }
}

/// In-process stand-in for the host's broadcast topic: every published
/// message lands in the mailbox of every peer except its source, in
/// publication order. Delivery is fire-and-forget.
#[derive(Debug, Default)]
pub struct LocalBus {
    peers: Vec<(String, VecDeque<SyncMessage>)>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, peer_id: &str) {
        if !self.peers.iter().any(|(id, _)| id == peer_id) {
            self.peers.push((peer_id.to_string(), VecDeque::new()));
        }
    }

    pub fn unsubscribe(&mut self, peer_id: &str) {
        self.peers.retain(|(id, _)| id != peer_id);
    }

    pub fn publish(&mut self, msg: SyncMessage) {
        for (id, mailbox) in &mut self.peers {
            if id != msg.source() {
                mailbox.push_back(msg.clone());
            }
        }
    }

    /// Pending messages for one peer, oldest first.
    pub fn drain(&mut self, peer_id: &str) -> Vec<SyncMessage> {
        self.peers
            .iter_mut()
            .find(|(id, _)| id == peer_id)
            .map(|(_, mailbox)| mailbox.drain(..).collect())
            .unwrap_or_default()
    }
}

/// What handling one incoming message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEffect {
    /// Not ours to handle (own echo); nothing happened.
    Ignored,
    /// A peer's snapshot was applied over the local state.
    Applied,
    /// A peer asked for state and we replied with ours.
    Replied,
}

/// The apply operation is a discrete state, not a free-floating flag: while
/// a received snapshot is being written into the store the endpoint is
/// `Applying`, and the publish path refuses to emit. That is what stops an
/// incoming snapshot from echoing back out as a fresh broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Applying,
}

pub struct SyncEndpoint {
    source_id: String,
    phase: Phase,
}

impl SyncEndpoint {
    pub fn new(source_id: &str) -> Self {
        SyncEndpoint { source_id: source_id.to_string(), phase: Phase::Idle }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    fn state_message(&self, store: &SelectionStore, ts: u64) -> SyncMessage {
        let SelectionSnapshot { strikes, selected } = store.snapshot();
        SyncMessage::State { source: self.source_id.clone(), ts, strikes, selected }
    }

    /// Publish the current state to the siblings. Called after every local
    /// mutation; a no-op while a received snapshot is being applied.
    pub fn broadcast(&self, store: &SelectionStore, bus: &mut LocalBus, ts: u64) {
        if self.phase == Phase::Applying {
            return;
        }
        bus.publish(self.state_message(store, ts));
    }

    /// Ask the siblings for their state; sent once on mount.
    pub fn request_sync(&self, bus: &mut LocalBus) {
        bus.publish(SyncMessage::Request { source: self.source_id.clone() });
    }

    /// Handle one incoming message. Snapshots replace the local state
    /// wholesale; requests are answered with the current state.
    pub fn on_message(
        &mut self,
        msg: &SyncMessage,
        store: &mut SelectionStore,
        bus: &mut LocalBus,
        ts: u64,
    ) -> SyncEffect {
        if msg.source() == self.source_id {
            return SyncEffect::Ignored;
        }
        match msg {
            SyncMessage::Request { .. } => {
                self.broadcast(store, bus, ts);
                SyncEffect::Replied
            }
            SyncMessage::State { strikes, selected, .. } => {
                let snapshot =
                    SelectionSnapshot { strikes: strikes.clone(), selected: selected.clone() };
                self.phase = Phase::Applying;
                store.apply_snapshot(&snapshot);
                self.phase = Phase::Idle;
                SyncEffect::Applied
            }
        }
    }
}
