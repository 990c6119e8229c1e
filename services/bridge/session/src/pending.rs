//! In-flight request tracking keyed by correlation id.
//!
//! The table assigns ids, holds one completion handle per outstanding
//! request, and force-invalidates everything when the session dies. An
//! id leaves the table exactly once, either through a correlated
//! response or through [`PendingTable::fail_all`].

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::RpcError;
use crate::subscription::SubscriptionSpec;

/// What to do with a correlated response
pub enum Completion {
    /// Resolve an external caller's future
    Caller(oneshot::Sender<Result<Value, RpcError>>),
    /// The reserved authentication call gating `Ready`
    Auth,
    /// A caller-initiated subscription negotiation
    Subscribe {
        /// Spec being negotiated
        spec: SubscriptionSpec,
        /// Caller waiting for the token
        reply: oneshot::Sender<Result<String, RpcError>>,
    },
    /// Re-negotiation of a recorded subscription after reconnect
    Resubscribe {
        /// Resource of the recorded spec
        resource: String,
        /// Channel of the recorded spec
        channel: String,
    },
}

/// One in-flight request
pub struct PendingEntry {
    /// Remote target, kept for diagnostics
    pub resource: String,
    /// Remote method, kept for diagnostics
    pub method: String,
    /// Completion handle
    pub completion: Completion,
    /// Registration time
    pub created_at: Instant,
}

/// Table of in-flight requests
pub struct PendingTable {
    next_id: u64,
    entries: HashMap<u64, PendingEntry>,
}

impl PendingTable {
    /// Create an empty table; ids start at 1
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    /// Assign a fresh id and register the entry under it
    pub fn register(&mut self, resource: &str, method: &str, completion: Completion) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            PendingEntry {
                resource: resource.to_string(),
                method: method.to_string(),
                completion,
                created_at: Instant::now(),
            },
        );
        id
    }

    /// Remove and return the entry for a correlated response.
    ///
    /// Returns `None` for ids the table does not know, including ids
    /// already completed; late responses are expected and harmless.
    pub fn complete(&mut self, id: u64) -> Option<PendingEntry> {
        self.entries.remove(&id)
    }

    /// Number of in-flight requests
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Invalidate every in-flight request.
    ///
    /// External callers are rejected with `ConnectionLost`. Internal
    /// completions are dropped; their work is redone on the next
    /// session.
    pub fn fail_all(&mut self) {
        for (id, entry) in self.entries.drain() {
            match entry.completion {
                Completion::Caller(reply) => {
                    let _ = reply.send(Err(RpcError::ConnectionLost));
                }
                Completion::Subscribe { reply, .. } => {
                    let _ = reply.send(Err(RpcError::ConnectionLost));
                }
                Completion::Auth | Completion::Resubscribe { .. } => {
                    debug!("dropping internal request {} on disconnect", id);
                }
            }
        }
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> (Completion, oneshot::Receiver<Result<Value, RpcError>>) {
        let (tx, rx) = oneshot::channel();
        (Completion::Caller(tx), rx)
    }

    #[test]
    fn test_ids_are_monotonic_and_unique_among_pending() {
        let mut table = PendingTable::new();
        let (c1, _r1) = caller();
        let (c2, _r2) = caller();

        let a = table.register("ScenesService", "getScenes", c1);
        let b = table.register("ScenesService", "getScene", c2);

        assert!(b > a);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_complete_removes_exactly_once() {
        let mut table = PendingTable::new();
        let (completion, _rx) = caller();
        let id = table.register("ScenesService", "getScenes", completion);

        assert!(table.complete(id).is_some());
        assert!(table.complete(id).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_unknown_id_is_ignored() {
        let mut table = PendingTable::new();
        assert!(table.complete(999).is_none());
    }

    #[tokio::test]
    async fn test_fail_all_rejects_callers_and_empties_table() {
        let mut table = PendingTable::new();
        let (c1, r1) = caller();
        let (c2, r2) = caller();
        table.register("StreamingService", "getModel", c1);
        table.register("ScenesService", "getScenes", c2);
        table.register("TcpServerService", "auth", Completion::Auth);

        table.fail_all();

        assert!(table.is_empty());
        assert_eq!(r1.await.unwrap(), Err(RpcError::ConnectionLost));
        assert_eq!(r2.await.unwrap(), Err(RpcError::ConnectionLost));
    }
}
