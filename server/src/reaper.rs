//! Idle session eviction.

use log::info;
use shared::disconnect_notice;
use std::time::{Duration, Instant};

use crate::registry::{SessionId, SessionRegistry};

/// Evicts sessions that have been silent for longer than `timeout` at `now`,
/// along with any session scheduled for removal after a failed send.
///
/// Every session actually removed is announced to the remaining sessions with
/// a disconnect notice. Returns the evicted ids in eviction order.
pub fn reap(registry: &mut SessionRegistry, now: Instant, timeout: Duration) -> Vec<SessionId> {
    let mut candidates = registry.idle_ids(now, timeout);
    for id in registry.take_scheduled() {
        if !candidates.contains(&id) {
            candidates.push(id);
        }
    }

    let mut evicted = Vec::new();
    for id in candidates {
        // already gone, e.g. it disconnected earlier in this tick
        if registry.remove(id).is_err() {
            continue;
        }

        info!("Evicted session {}", id);
        registry.broadcast(&disconnect_notice(id), None);
        evicted.push(id);
    }

    evicted
}
