use serde_json::Value;
use tokio::sync::{broadcast, watch};

/// Capacity of the per-variable failure channel.
const FAILURE_CHANNEL_CAPACITY: usize = 32;

/// Fan-out point for one status variable.
///
/// Observers hold a `watch` receiver for the latest value and optionally a
/// `broadcast` receiver for `error` replies. Dropping a receiver detaches the
/// observer and nothing else.
pub struct StatusVariable {
    name: String,
    value: watch::Sender<Option<Value>>,
    failures: broadcast::Sender<String>,
}

impl StatusVariable {
    pub fn new(name: &str) -> Self {
        let (value, _) = watch::channel(None);
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            name: name.to_string(),
            value,
            failures,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current(&self) -> Option<Value> {
        self.value.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Value>> {
        self.value.subscribe()
    }

    pub fn failures(&self) -> broadcast::Receiver<String> {
        self.failures.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.value.receiver_count()
    }

    /// Stores a new value. Observers are only woken when it differs.
    pub fn apply_value(&self, value: Value) -> bool {
        self.value.send_if_modified(|current| {
            if current.as_ref() == Some(&value) {
                false
            } else {
                *current = Some(value);
                true
            }
        })
    }

    pub fn apply_error(&self, message: String) {
        // No failure observers is fine.
        let _ = self.failures.send(message);
    }
}
