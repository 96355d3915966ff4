//! Pending request table for command/response correlation.
//!
//! Pure data structure: each in-flight command registers a continuation keyed
//! by its request id. A response resolves exactly the matching entry; teardown
//! fails every entry so no caller waits on a dead connection.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{IpcError, IpcResult};

type Continuation = oneshot::Sender<IpcResult<Value>>;

/// In-flight requests for one socket.
#[derive(Default)]
pub struct PendingRequests {
    entries: DashMap<u64, Continuation>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request and returns the receiver its response resolves.
    pub fn register(&self, request_id: u64) -> oneshot::Receiver<IpcResult<Value>> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(request_id, tx);
        rx
    }

    /// Resolves the entry for `request_id`.
    ///
    /// Returns false when no caller is waiting for that id (late or foreign
    /// response).
    pub fn resolve(&self, request_id: u64, result: IpcResult<Value>) -> bool {
        match self.entries.remove(&request_id) {
            Some((_, tx)) => {
                // Receiver may have been dropped by a timed-out caller
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Drops an entry without resolving it (write failure, timeout).
    pub fn forget(&self, request_id: u64) {
        self.entries.remove(&request_id);
    }

    /// Fails every in-flight request with `error`. Returns how many were failed.
    pub fn fail_all(&self, error: &IpcError) -> usize {
        let ids: Vec<u64> = self.entries.iter().map(|e| *e.key()).collect();
        let mut failed = 0;
        for id in ids {
            if self.resolve(id, Err(error.clone())) {
                failed += 1;
            }
        }
        failed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
