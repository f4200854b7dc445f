//! # Correlation Table
//!
//! Maps in-flight request ids to the one-shot channel that completes the
//! caller's future. Ids start at 1 and only ever grow; running out of ids is
//! reported as [`ControlError::IdExhausted`] rather than wrapping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{ControlError, Result};
use crate::protocol::{BindingKey, CommandKind, Target};

/// Receiving half handed back to the caller of a request.
pub type Reply = oneshot::Receiver<Result<Value>>;

/// One outstanding command awaiting its `success` or `error` reply.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: u64,
    pub kind: CommandKind,
    pub target: Target,
    pub name: String,
    pub args: Vec<Value>,
    pub created_at: Instant,
    responder: oneshot::Sender<Result<Value>>,
}

impl PendingRequest {
    pub fn key(&self) -> BindingKey {
        self.target.key(self.name.clone())
    }

    /// Completes the caller's future. A caller that stopped waiting is ignored.
    pub fn complete(self, outcome: Result<Value>) {
        let _ = self.responder.send(outcome);
    }
}

/// Thread-safe table of requests that have been sent but not answered.
pub struct CorrelationTable {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub(crate) fn starting_at(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves the next request id.
    pub fn next_id(&self) -> Result<u64> {
        self.next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map_err(|_| ControlError::IdExhausted)
    }

    /// Records a request and returns the channel its reply will arrive on.
    pub fn register(
        &self,
        id: u64,
        kind: CommandKind,
        target: &Target,
        name: &str,
        args: Vec<Value>,
    ) -> Reply {
        let (tx, rx) = oneshot::channel();
        let request = PendingRequest {
            id,
            kind,
            target: target.clone(),
            name: name.to_string(),
            args,
            created_at: Instant::now(),
            responder: tx,
        };
        let mut pending = self.pending.lock().expect("Correlation table lock poisoned");
        if pending.insert(id, request).is_some() {
            log::error!("Request id {} registered twice; previous caller dropped", id);
        }
        rx
    }

    /// Removes and returns the request with this id, if it is still pending.
    pub fn take(&self, id: u64) -> Option<PendingRequest> {
        self.pending
            .lock()
            .expect("Correlation table lock poisoned")
            .remove(&id)
    }

    /// Drops a registration whose reply is no longer wanted (send failure, timeout).
    pub fn discard(&self, id: u64) -> bool {
        self.take(id).is_some()
    }

    /// Rejects every outstanding request with `error`. Returns how many were rejected.
    pub fn reject_all(&self, error: ControlError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().expect("Correlation table lock poisoned");
            pending.drain().map(|(_, request)| request).collect()
        };
        let count = drained.len();
        for request in drained {
            log::debug!(
                "Rejecting {} request({}) for {}.{}",
                request.kind,
                request.id,
                request.target,
                request.name
            );
            request.complete(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().expect("Correlation table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> Target {
        Target::new("sys-1", "disp", 1)
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let table = CorrelationTable::new();
        assert_eq!(table.next_id().unwrap(), 1);
        assert_eq!(table.next_id().unwrap(), 2);
        assert_eq!(table.next_id().unwrap(), 3);
    }

    #[test]
    fn test_id_exhaustion_is_reported() {
        let table = CorrelationTable::starting_at(u64::MAX - 1);
        assert_eq!(table.next_id().unwrap(), u64::MAX - 1);
        assert_eq!(table.next_id(), Err(ControlError::IdExhausted));
        assert_eq!(table.next_id(), Err(ControlError::IdExhausted));
    }

    #[tokio::test]
    async fn test_take_completes_the_registered_caller() {
        let table = CorrelationTable::new();
        let id = table.next_id().unwrap();
        let reply = table.register(id, CommandKind::Exec, &target(), "power", vec![json!(true)]);

        let request = table.take(id).expect("request should be pending");
        assert_eq!(request.kind, CommandKind::Exec);
        assert_eq!(request.args, vec![json!(true)]);
        request.complete(Ok(json!("done")));

        assert_eq!(reply.await.unwrap(), Ok(json!("done")));
        assert!(table.take(id).is_none());
    }

    #[tokio::test]
    async fn test_reject_all_drains_the_table() {
        let table = CorrelationTable::new();
        let a = table.register(table.next_id().unwrap(), CommandKind::Bind, &target(), "a", vec![]);
        let b = table.register(table.next_id().unwrap(), CommandKind::Bind, &target(), "b", vec![]);

        let rejected = table.reject_all(ControlError::Transport("closed".into()));

        assert_eq!(rejected, 2);
        assert!(table.is_empty());
        assert_eq!(a.await.unwrap(), Err(ControlError::Transport("closed".into())));
        assert_eq!(b.await.unwrap(), Err(ControlError::Transport("closed".into())));
    }

    #[test]
    fn test_discard_unknown_id() {
        let table = CorrelationTable::new();
        assert!(!table.discard(42));
    }
}
