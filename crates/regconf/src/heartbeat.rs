//! Heartbeat tracking
//!
//! Nodes announce themselves by publishing a [`Heartbeat`] periodically. The
//! [`HeartbeatTracker`] remembers every node it heard from during the
//! current observation window. Beacons arrive in any order and may repeat;
//! neither changes the resulting snapshot.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use log::{debug, trace};
use mutex::{BlockingMutex, raw_impls::cs::CriticalSectionRawMutex};
use tokio::time::Instant;

use crate::{
    NodeId,
    bus::Bus,
    well_known::{Heartbeat, HeartbeatTopic},
};

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatObservation {
    pub node: NodeId,
    /// When the node was last heard from.
    pub at: Instant,
    /// Last heartbeat payload, if the observation came from a beacon.
    pub heartbeat: Option<Heartbeat>,
}

/// Set of nodes seen in the current window. Clones share the same state.
#[derive(Clone)]
pub struct HeartbeatTracker {
    inner: Arc<BlockingMutex<CriticalSectionRawMutex, BTreeMap<NodeId, HeartbeatObservation>>>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BlockingMutex::new(BTreeMap::new())),
        }
    }

    /// Record that `node` is alive.
    pub fn observe(&self, node: NodeId) {
        self.record(node, None);
    }

    /// Record a received beacon.
    pub fn observe_heartbeat(&self, node: NodeId, heartbeat: Heartbeat) {
        self.record(node, Some(heartbeat));
    }

    fn record(&self, node: NodeId, heartbeat: Option<Heartbeat>) {
        let at = Instant::now();
        let new = self.inner.with_lock(|obs| match obs.get_mut(&node) {
            Some(existing) => {
                existing.at = at;
                if heartbeat.is_some() {
                    existing.heartbeat = heartbeat;
                }
                false
            }
            None => {
                obs.insert(
                    node,
                    HeartbeatObservation {
                        node,
                        at,
                        heartbeat,
                    },
                );
                true
            }
        });
        if new {
            debug!("Discovered node {node}");
        }
    }

    /// Node ids seen so far, in ascending order.
    pub fn snapshot(&self) -> BTreeSet<NodeId> {
        self.inner.with_lock(|obs| obs.keys().copied().collect())
    }

    pub fn observations(&self) -> Vec<HeartbeatObservation> {
        self.inner.with_lock(|obs| obs.values().cloned().collect())
    }

    pub fn get(&self, node: NodeId) -> Option<HeartbeatObservation> {
        self.inner.with_lock(|obs| obs.get(&node).cloned())
    }

    /// Forget everything and start a new window.
    pub fn clear(&self) {
        self.inner.with_lock(|obs| obs.clear());
    }

    /// Observe every heartbeat published on `bus` until the bus goes away.
    pub async fn track<B: Bus>(&self, bus: &B, bound: usize) {
        let mut sub = bus.subscribe::<HeartbeatTopic>(bound);
        while let Some(msg) = sub.recv().await {
            trace!(
                "Heartbeat from {}: uptime {}s {} {}",
                msg.src, msg.t.uptime, msg.t.health, msg.t.mode
            );
            self.observe_heartbeat(msg.src, msg.t);
        }
    }
}

impl Default for HeartbeatTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use super::HeartbeatTracker;
    use crate::{NodeId, well_known::Heartbeat};

    #[test]
    fn duplicates_do_not_change_snapshot() {
        let tracker = HeartbeatTracker::new();
        for node in [50, 42, 50, 51, 42, 50] {
            tracker.observe(NodeId(node));
        }
        let expected: BTreeSet<NodeId> = [42, 50, 51].into_iter().map(NodeId).collect();
        assert_eq!(tracker.snapshot(), expected);
        assert_eq!(tracker.observations().len(), 3);
    }

    #[test]
    fn heartbeat_payload_is_kept() {
        let tracker = HeartbeatTracker::new();
        tracker.observe_heartbeat(NodeId(42), Heartbeat::nominal(12));
        tracker.observe(NodeId(42));
        let obs = tracker.get(NodeId(42)).unwrap();
        assert_eq!(obs.heartbeat.map(|h| h.uptime), Some(12));
    }

    #[test]
    fn clear_starts_a_new_window() {
        let tracker = HeartbeatTracker::new();
        tracker.observe(NodeId(1));
        tracker.clear();
        assert!(tracker.snapshot().is_empty());
    }
}
