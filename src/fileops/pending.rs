//! Pending-operation tables for blocking client calls.
//!
//! A client call registers interest under the DFS filename, fires its
//! request datagrams, and parks on a deadline-bounded wait; the receive loop
//! completes the slot when the response datagram shows up. One `Notify` per
//! table plays the broadcast condition variable: completions wake every
//! waiter and each re-checks its own slot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use crate::utils::ShoalError;

use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

enum Slot<T> {
    Waiting,
    Done(Result<T, String>),
}

/// One-shot request/response rendezvous keyed by filename.
pub(crate) struct PendingTable<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
    notify: Notify,
}

impl<T> PendingTable<T> {
    pub(crate) fn new() -> Self {
        PendingTable {
            slots: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    /// Opens a slot. False if an operation on this key is already in flight.
    pub(crate) fn register(&self, key: &str) -> bool {
        let mut slots = self.slots.lock().unwrap();
        if slots.contains_key(key) {
            return false;
        }
        slots.insert(key.to_string(), Slot::Waiting);
        true
    }

    /// True if a waiter is parked (or a result is parked unclaimed) on key.
    pub(crate) fn is_pending(&self, key: &str) -> bool {
        self.slots.lock().unwrap().contains_key(key)
    }

    /// Delivers a result into a waiting slot. False if nobody is waiting or
    /// a result was already delivered (late duplicates are dropped).
    pub(crate) fn complete(&self, key: &str, result: Result<T, String>) -> bool {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(key) {
            Some(slot @ Slot::Waiting) => {
                *slot = Slot::Done(result);
                self.notify.notify_waiters();
                true
            }
            _ => false,
        }
    }

    /// Abandons a slot (send failure before any wait).
    pub(crate) fn cancel(&self, key: &str) {
        self.slots.lock().unwrap().remove(key);
    }

    /// Parks until the slot completes or the deadline passes. The slot is
    /// removed on the way out either way.
    pub(crate) async fn wait(&self, key: &str, limit: Duration) -> Result<T, ShoalError> {
        let deadline = Instant::now() + limit;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut slots = self.slots.lock().unwrap();
                if let Some(Slot::Done(_)) = slots.get(key) {
                    let Some(Slot::Done(result)) = slots.remove(key) else {
                        unreachable!();
                    };
                    return result.map_err(ShoalError);
                }
            }

            if timeout_at(deadline, notified).await.is_err() {
                self.slots.lock().unwrap().remove(key);
                return Err(ShoalError(format!(
                    "timeout after {:?} waiting on '{}'",
                    limit, key
                )));
            }
        }
    }
}

struct GatherState<R> {
    expected: usize,
    responses: HashMap<SocketAddr, R>,
}

/// Fan-out collector keyed by filename: gathers one response per peer
/// address until the expected count arrives or the deadline passes, then
/// hands back whatever came in.
pub(crate) struct ResponseGather<R> {
    states: Mutex<HashMap<String, GatherState<R>>>,
    notify: Notify,
}

impl<R> ResponseGather<R> {
    pub(crate) fn new() -> Self {
        ResponseGather {
            states: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    /// Opens a gather expecting `expected` responses. False if one is
    /// already open for this key.
    pub(crate) fn open(&self, key: &str, expected: usize) -> bool {
        let mut states = self.states.lock().unwrap();
        if states.contains_key(key) {
            return false;
        }
        states.insert(
            key.to_string(),
            GatherState {
                expected,
                responses: HashMap::new(),
            },
        );
        true
    }

    /// Files one peer's response. Repeats from the same address overwrite.
    /// False if no gather is open for this key.
    pub(crate) fn add(&self, key: &str, from: SocketAddr, response: R) -> bool {
        let mut states = self.states.lock().unwrap();
        let Some(state) = states.get_mut(key) else {
            return false;
        };
        state.responses.insert(from, response);
        if state.responses.len() >= state.expected {
            self.notify.notify_waiters();
        }
        true
    }

    /// Parks until all expected responses arrive or the deadline passes,
    /// then closes the gather and returns what was collected.
    pub(crate) async fn wait(&self, key: &str, limit: Duration) -> HashMap<SocketAddr, R> {
        let deadline = Instant::now() + limit;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut states = self.states.lock().unwrap();
                let full = states
                    .get(key)
                    .map(|s| s.responses.len() >= s.expected)
                    .unwrap_or(true);
                if full {
                    return states
                        .remove(key)
                        .map(|s| s.responses)
                        .unwrap_or_default();
                }
            }

            if timeout_at(deadline, notified).await.is_err() {
                let mut states = self.states.lock().unwrap();
                return states.remove(key).map(|s| s.responses).unwrap_or_default();
            }
        }
    }
}
