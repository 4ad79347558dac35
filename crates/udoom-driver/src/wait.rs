//! Many logical waiters multiplexed onto the single `BATCH_WAIT` trigger.
//!
//! Pending waiters are kept in completion order, i.e. by circular distance of their target from
//! `BATCH_GET`. `BATCH_GET` only moves forward and every pending target lies in `(GET, PUT]`, so
//! that order holds as the ring advances and the trigger is always the front waiter's target.

use std::collections::{HashMap, VecDeque};

use udoom_abi::ring::{distance, is_ahead};
use udoom_abi::WAIT_NONE;

use crate::client::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaiterId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// `BATCH_GET` reached the target.
    Completed,
    /// The owner was quarantined or the device went away first.
    Faulted,
}

#[derive(Debug)]
struct Waiter {
    id: WaiterId,
    target: u32,
    client: ClientId,
}

#[derive(Debug, Default)]
pub(crate) struct WaitList {
    pending: VecDeque<Waiter>,
    /// Outcomes not yet collected by the blocked thread.
    resolved: HashMap<WaiterId, WaitOutcome>,
    next_id: u64,
}

impl WaitList {
    /// Adds a waiter for `target`, which must lie ahead of `get`.
    pub(crate) fn insert(&mut self, target: u32, client: ClientId, get: u32) -> WaiterId {
        let id = WaiterId(self.next_id);
        self.next_id += 1;

        let d = distance(get, target);
        let pos = self
            .pending
            .iter()
            .position(|w| distance(get, w.target) > d)
            .unwrap_or(self.pending.len());
        self.pending.insert(pos, Waiter { id, target, client });
        id
    }

    /// Completes every waiter whose target is no longer ahead of `get`. Returns how many.
    pub(crate) fn resolve_passed(&mut self, get: u32, put: u32) -> usize {
        let mut n = 0;
        while let Some(front) = self.pending.front() {
            if is_ahead(front.target, get, put) {
                break;
            }
            if let Some(w) = self.pending.pop_front() {
                self.resolved.insert(w.id, WaitOutcome::Completed);
                n += 1;
            }
        }
        n
    }

    /// Fails every pending waiter of `client`. Returns how many.
    pub(crate) fn resolve_client(&mut self, client: ClientId) -> usize {
        let before = self.pending.len();
        let resolved = &mut self.resolved;
        self.pending.retain(|w| {
            if w.client == client {
                resolved.insert(w.id, WaitOutcome::Faulted);
                false
            } else {
                true
            }
        });
        before - self.pending.len()
    }

    pub(crate) fn resolve_all(&mut self, outcome: WaitOutcome) {
        for w in self.pending.drain(..) {
            self.resolved.insert(w.id, outcome);
        }
    }

    /// Withdraws a waiter whose thread gave up. Returns whether it was still pending.
    pub(crate) fn remove(&mut self, id: WaiterId) -> bool {
        if let Some(pos) = self.pending.iter().position(|w| w.id == id) {
            self.pending.remove(pos);
            true
        } else {
            self.resolved.remove(&id);
            false
        }
    }

    pub(crate) fn take_outcome(&mut self, id: WaiterId) -> Option<WaitOutcome> {
        self.resolved.remove(&id)
    }

    /// Whether some pending waiter targets `slot`.
    pub(crate) fn targets(&self, slot: u32) -> bool {
        self.pending.iter().any(|w| w.target == slot)
    }

    /// Value for `BATCH_WAIT`: the nearest pending target, or [`WAIT_NONE`].
    pub(crate) fn trigger(&self) -> u32 {
        self.pending.front().map_or(WAIT_NONE, |w| w.target)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
