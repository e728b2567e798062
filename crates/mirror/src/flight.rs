//! # Single-flight
//!
//! Coalesces concurrent cache misses for the same key. The first request
//! becomes the leader and performs the upstream fetch; requests arriving while
//! it is in progress become followers and wait for the leader's outcome
//! instead of fetching again.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::sync::watch;

use crate::key::CacheKey;

/// How a leader's fetch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlightOutcome {
    /// The entry was committed to disk
    Stored,
    Forbidden,
    Unavailable(StatusCode),
    Failed { message: String, timed_out: bool },
}

type Slot = watch::Receiver<Option<FlightOutcome>>;

/// Result of joining a flight
pub enum Join {
    Leader(FlightGuard),
    Follower(Follower),
}

/// Registry of fetches currently in progress
#[derive(Debug, Default)]
pub struct InFlight {
    flights: Mutex<HashMap<CacheKey, Slot>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, starting one if none is running
    pub fn join(self: &Arc<Self>, key: &CacheKey) -> Join {
        let mut flights = self.flights.lock();
        if let Some(slot) = flights.get(key) {
            return Join::Follower(Follower { slot: slot.clone() });
        }

        let (tx, rx) = watch::channel(None);
        flights.insert(key.clone(), rx);
        Join::Leader(FlightGuard {
            key: key.clone(),
            tx: Some(tx),
            registry: Arc::clone(self),
        })
    }

    /// Number of fetches in progress
    pub fn len(&self) -> usize {
        self.flights.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, key: &CacheKey) {
        self.flights.lock().remove(key);
    }
}

/// Held by the leader until the fetch is resolved.
///
/// Dropping the guard without calling [`FlightGuard::complete`] releases the
/// key and wakes followers with no outcome, so they start over.
#[derive(Debug)]
pub struct FlightGuard {
    key: CacheKey,
    tx: Option<watch::Sender<Option<FlightOutcome>>>,
    registry: Arc<InFlight>,
}

impl FlightGuard {
    /// Release the key and publish `outcome` to every follower
    pub fn complete(mut self, outcome: FlightOutcome) {
        // Unregister first: a request arriving after this point must see the
        // committed entry (or start a new flight), never join a finished one.
        self.registry.remove(&self.key);
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.registry.remove(&self.key);
        }
    }
}

/// A request waiting on another request's fetch
pub struct Follower {
    slot: Slot,
}

impl Follower {
    /// Wait for the leader. `None` means the leader went away without an
    /// outcome and the caller should retry.
    pub async fn wait(mut self) -> Option<FlightOutcome> {
        loop {
            if let Some(outcome) = self.slot.borrow_and_update().clone() {
                return Some(outcome);
            }
            if self.slot.changed().await.is_err() {
                return self.slot.borrow().clone();
            }
        }
    }
}
