//! # Binding Registry
//!
//! Holds one [`Binding`] per status variable the client has subscribed to,
//! together with its last known value. A key is subscribed on the engine at
//! most once: callers that bind a key already present get the cached value,
//! and callers that bind a key whose `bind` is still on the wire are attached
//! to that in-flight request instead of sending another one.
//!
//! Bindings survive a disconnect (only their `subscribed` flag is cleared) so
//! the lifecycle can replay them once the link is back.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::protocol::BindingKey;

/// A live subscription to one status variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub value: Value,
    /// Whether the engine currently knows about this subscription.
    pub subscribed: bool,
}

/// What a `bind` caller has to do next.
#[derive(Debug)]
pub enum BindStart {
    /// The key is already bound; here is its value.
    Cached(Value),
    /// No bind is in flight; the caller must send one and complete it.
    Leader,
    /// Another caller is already binding this key; wait for its outcome.
    Follower(oneshot::Receiver<Result<Value>>),
}

#[derive(Default)]
struct RegistryState {
    bindings: HashMap<BindingKey, Binding>,
    in_flight: HashMap<BindingKey, Vec<oneshot::Sender<Result<Value>>>>,
}

/// Mutex-guarded map of bindings and in-flight binds.
#[derive(Default)]
pub struct BindingRegistry {
    state: Mutex<RegistryState>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether a bind for `key` needs a wire request.
    pub fn begin_bind(&self, key: &BindingKey) -> BindStart {
        let mut state = self.state.lock().expect("Binding registry lock poisoned");
        if let Some(binding) = state.bindings.get(key) {
            return BindStart::Cached(binding.value.clone());
        }
        match state.in_flight.get_mut(key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                BindStart::Follower(rx)
            }
            None => {
                state.in_flight.insert(key.clone(), Vec::new());
                BindStart::Leader
            }
        }
    }

    /// Records the outcome of a `bind` on the wire.
    ///
    /// On success the binding is created (or refreshed after a replay) and
    /// marked subscribed. Every attached follower receives the same outcome.
    /// Completing a key with nothing in flight and a failed outcome is a no-op.
    pub fn complete_bind(&self, key: &BindingKey, outcome: &Result<Value>) {
        let waiters = {
            let mut state = self.state.lock().expect("Binding registry lock poisoned");
            if let Ok(value) = outcome {
                state.bindings.insert(
                    key.clone(),
                    Binding {
                        value: value.clone(),
                        subscribed: true,
                    },
                );
            }
            state.in_flight.remove(key).unwrap_or_default()
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Forgets a binding after a successful `unbind`.
    pub fn remove(&self, key: &BindingKey) -> Option<Binding> {
        self.state
            .lock()
            .expect("Binding registry lock poisoned")
            .bindings
            .remove(key)
    }

    /// Replaces the cached value of a bound key.
    ///
    /// Returns the value to forward to observers, or `None` when the key is
    /// not bound (a late notification after `unbind`).
    pub fn update_from_notify(&self, key: &BindingKey, value: Value) -> Option<Value> {
        let mut state = self.state.lock().expect("Binding registry lock poisoned");
        let binding = state.bindings.get_mut(key)?;
        binding.value = value.clone();
        Some(value)
    }

    pub fn value(&self, key: &BindingKey) -> Option<Value> {
        self.get(key).map(|binding| binding.value)
    }

    pub fn get(&self, key: &BindingKey) -> Option<Binding> {
        self.state
            .lock()
            .expect("Binding registry lock poisoned")
            .bindings
            .get(key)
            .cloned()
    }

    pub fn is_subscribed(&self, key: &BindingKey) -> bool {
        self.get(key).map(|binding| binding.subscribed).unwrap_or(false)
    }

    /// Snapshot of every bound key, used for replay after a reconnect.
    pub fn keys(&self) -> Vec<BindingKey> {
        self.state
            .lock()
            .expect("Binding registry lock poisoned")
            .bindings
            .keys()
            .cloned()
            .collect()
    }

    /// Called when the link drops: the engine has forgotten every subscription.
    pub fn mark_unsubscribed(&self) {
        let mut state = self.state.lock().expect("Binding registry lock poisoned");
        for binding in state.bindings.values_mut() {
            binding.subscribed = false;
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("Binding registry lock poisoned")
            .bindings
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControlError;
    use serde_json::json;

    fn power() -> BindingKey {
        BindingKey::new("sys-1", "disp", 1, "power")
    }

    #[tokio::test]
    async fn test_second_bind_attaches_to_the_first() {
        let registry = BindingRegistry::new();
        assert!(matches!(registry.begin_bind(&power()), BindStart::Leader));

        let follower = match registry.begin_bind(&power()) {
            BindStart::Follower(rx) => rx,
            other => panic!("expected follower, got {:?}", other),
        };

        registry.complete_bind(&power(), &Ok(json!(true)));

        assert_eq!(follower.await.unwrap(), Ok(json!(true)));
        assert_eq!(registry.value(&power()), Some(json!(true)));
        assert!(registry.is_subscribed(&power()));
        assert!(matches!(registry.begin_bind(&power()), BindStart::Cached(v) if v == json!(true)));
    }

    #[tokio::test]
    async fn test_failed_bind_reaches_followers_and_allows_retry() {
        let registry = BindingRegistry::new();
        assert!(matches!(registry.begin_bind(&power()), BindStart::Leader));
        let follower = match registry.begin_bind(&power()) {
            BindStart::Follower(rx) => rx,
            other => panic!("expected follower, got {:?}", other),
        };

        let failure = Err(ControlError::Protocol("module offline".into()));
        registry.complete_bind(&power(), &failure);

        assert_eq!(follower.await.unwrap(), failure);
        assert!(registry.is_empty());
        assert!(matches!(registry.begin_bind(&power()), BindStart::Leader));
    }

    #[test]
    fn test_notify_is_idempotent_and_ignores_unbound_keys() {
        let registry = BindingRegistry::new();
        registry.begin_bind(&power());
        registry.complete_bind(&power(), &Ok(json!(false)));

        assert_eq!(registry.update_from_notify(&power(), json!(true)), Some(json!(true)));
        assert_eq!(registry.update_from_notify(&power(), json!(true)), Some(json!(true)));
        assert_eq!(registry.value(&power()), Some(json!(true)));

        let other = BindingKey::new("sys-1", "disp", 1, "volume");
        assert_eq!(registry.update_from_notify(&other, json!(10)), None);
        assert!(registry.get(&other).is_none());
    }

    #[test]
    fn test_disconnect_keeps_values_but_clears_subscribed() {
        let registry = BindingRegistry::new();
        registry.begin_bind(&power());
        registry.complete_bind(&power(), &Ok(json!(true)));

        registry.mark_unsubscribed();

        assert_eq!(registry.keys(), vec![power()]);
        assert_eq!(registry.value(&power()), Some(json!(true)));
        assert!(!registry.is_subscribed(&power()));

        // A replayed bind refreshes the binding in place.
        registry.complete_bind(&power(), &Ok(json!(false)));
        assert!(registry.is_subscribed(&power()));
        assert_eq!(registry.value(&power()), Some(json!(false)));
    }

    #[test]
    fn test_remove() {
        let registry = BindingRegistry::new();
        registry.begin_bind(&power());
        registry.complete_bind(&power(), &Ok(json!(1)));
        assert!(registry.remove(&power()).is_some());
        assert!(registry.remove(&power()).is_none());
    }
}
