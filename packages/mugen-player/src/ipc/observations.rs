//! Observed property bookkeeping.
//!
//! Pure data structure for tracking which properties the player process is
//! currently pushing changes for. Each property name maps to one observation
//! id plus the number of interested subscribers, so the underlying
//! `observe_property` command is issued only on first interest and
//! `unobserve_property` only on last release.
//!
//! Until the first subscriber's `observe_property` is answered the observation
//! is pending: later subscribers wait for that answer instead of assuming
//! success.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{IpcError, IpcResult};

struct Observation {
    id: u64,
    subscribers: usize,
    confirmed: bool,
    waiters: Vec<oneshot::Sender<IpcResult<()>>>,
}

/// Outcome of [`ObservationStore::acquire`].
#[derive(Debug)]
pub enum Acquired {
    /// First subscriber: the caller must issue `observe_property` with this id,
    /// then [`confirm`](ObservationStore::confirm) or
    /// [`rollback`](ObservationStore::rollback).
    First(u64),
    /// Already observed; nothing to send.
    Shared,
    /// The first request is still in flight; resolves with its outcome.
    Pending(oneshot::Receiver<IpcResult<()>>),
}

/// Outcome of [`ObservationStore::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// Last subscriber gone: the caller must issue `unobserve_property`.
    Last(u64),
    /// Other subscribers remain.
    Shared,
}

/// Property name to observation id and subscriber count.
pub struct ObservationStore {
    observations: Mutex<HashMap<String, Observation>>,
    next_id: Mutex<u64>,
}

impl ObservationStore {
    pub fn new() -> Self {
        Self {
            observations: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
        }
    }

    /// Registers interest in `name`.
    pub fn acquire(&self, name: &str) -> Acquired {
        let mut observations = self.observations.lock();
        if let Some(obs) = observations.get_mut(name) {
            obs.subscribers += 1;
            if obs.confirmed {
                return Acquired::Shared;
            }
            let (tx, rx) = oneshot::channel();
            obs.waiters.push(tx);
            return Acquired::Pending(rx);
        }

        let id = {
            let mut next = self.next_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        observations.insert(
            name.to_string(),
            Observation {
                id,
                subscribers: 1,
                confirmed: false,
                waiters: Vec::new(),
            },
        );
        Acquired::First(id)
    }

    /// Releases interest in `name`.
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::NotObserved`] if nothing observes `name`.
    pub fn release(&self, name: &str) -> IpcResult<Released> {
        let mut observations = self.observations.lock();
        let obs = observations
            .get_mut(name)
            .ok_or_else(|| IpcError::NotObserved(name.to_string()))?;

        obs.subscribers -= 1;
        if obs.subscribers == 0 {
            let id = obs.id;
            observations.remove(name);
            Ok(Released::Last(id))
        } else {
            Ok(Released::Shared)
        }
    }

    /// Marks the first acquisition as answered and releases its waiters.
    pub fn confirm(&self, name: &str, id: u64) {
        let mut observations = self.observations.lock();
        if let Some(obs) = observations.get_mut(name).filter(|o| o.id == id) {
            obs.confirmed = true;
            for waiter in obs.waiters.drain(..) {
                let _ = waiter.send(Ok(()));
            }
        }
    }

    /// Undoes a failed first acquisition.
    ///
    /// Subscribers that were waiting on it receive `error` and hold no share.
    pub fn rollback(&self, name: &str, id: u64, error: &IpcError) {
        let mut observations = self.observations.lock();
        if observations.get(name).is_some_and(|o| o.id == id) {
            if let Some(obs) = observations.remove(name) {
                for waiter in obs.waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
        }
    }

    /// Returns the observation id for `name`, if observed.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<u64> {
        self.observations.lock().get(name).map(|o| o.id)
    }

    /// Returns the subscriber count for `name`.
    #[must_use]
    pub fn subscribers(&self, name: &str) -> usize {
        self.observations
            .lock()
            .get(name)
            .map_or(0, |o| o.subscribers)
    }

    /// Forgets every observation (the process that held them is gone).
    pub fn clear(&self) {
        self.observations.lock().clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.lock().is_empty()
    }
}

impl Default for ObservationStore {
    fn default() -> Self {
        Self::new()
    }
}
