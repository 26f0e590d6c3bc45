//! Heartbeat-based failure detection.
//!
//! The coordinator tracks heartbeats from every other member. A member
//! that stays silent for a full failure window (heartbeat interval times
//! the failure threshold) is declared failed and removed from the view. A
//! startup grace period keeps slow-starting members from being declared
//! failed before their heartbeat loop has run once.
//!
//! Suspicion is logged halfway through the window so transient network
//! blips are visible without causing removals.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::types::{MembershipView, NodeId};

#[derive(Debug, Clone, Copy)]
struct HeartbeatEntry {
    joined: Instant,
    last_seen: Instant,
    suspected: bool,
}

/// Tracks member liveness on the coordinator.
pub(crate) struct FailureDetector {
    entries: DashMap<NodeId, HeartbeatEntry>,
    window: Duration,
    grace: Duration,
}

impl FailureDetector {
    pub fn new(window: Duration, grace: Duration) -> Self {
        FailureDetector {
            entries: DashMap::new(),
            window,
            grace,
        }
    }

    /// Start tracking a member if it is not tracked yet.
    ///
    /// Used when a member joins and when a freshly promoted coordinator
    /// adopts the survivors of the previous view.
    pub fn track(&self, id: NodeId) {
        let now = Instant::now();
        self.entries.entry(id).or_insert(HeartbeatEntry {
            joined: now,
            last_seen: now,
            suspected: false,
        });
    }

    /// Record a heartbeat from a member.
    pub fn record(&self, id: NodeId) {
        let now = Instant::now();
        match self.entries.get_mut(&id) {
            Some(mut entry) => {
                entry.last_seen = now;
                entry.suspected = false;
            }
            None => self.track(id),
        }
    }

    /// Stop tracking a member.
    pub fn forget(&self, id: NodeId) {
        self.entries.remove(&id);
    }

    /// Drop entries for members no longer in the view.
    pub fn retain(&self, view: &MembershipView) {
        self.entries.retain(|id, _| view.contains(*id));
    }

    /// Members whose silence exceeds the failure window.
    pub fn overdue(&self) -> Vec<NodeId> {
        let now = Instant::now();
        let mut failed = Vec::new();
        for mut entry in self.entries.iter_mut() {
            let silence = now.duration_since(entry.last_seen);
            if now.duration_since(entry.joined) < self.grace {
                continue;
            }
            if silence >= self.window {
                failed.push(*entry.key());
            } else if silence >= self.window / 2 && !entry.suspected {
                entry.suspected = true;
                debug!(member = %entry.key(), silence_ms = silence.as_millis() as u64, "member suspected");
            }
        }
        failed
    }
}
