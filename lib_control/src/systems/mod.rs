//! # Systems Directory
//!
//! The addressing side of the client: an explicit, caller-owned registry of
//! systems, their module instances and the status variables observers care
//! about. The notification router walks it to deliver inbound values.
//!
//! ```text
//! Systems ── "sys-1" ──► System ── ("Display", 1) ──► Module ── "power" ──► StatusVariable
//! ```
//!
//! Observing a variable is purely local. Whether the engine is asked to push
//! updates for it is decided by the caller through `ControlClient::bind`.

/// Module instances and their status variables.
pub mod module;
/// Observer fan-out for a single status variable.
pub mod status;
/// A named collection of modules.
pub mod system;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub use module::{split_module_id, Module};
pub use status::StatusVariable;
pub use system::System;

/// Registry of the systems this client routes notifications for.
#[derive(Default)]
pub struct Systems {
    systems: Mutex<HashMap<String, Arc<System>>>,
}

impl Systems {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the system with this id, creating it if needed.
    pub fn register(&self, id: &str) -> Arc<System> {
        let mut systems = self.systems.lock().expect("Systems lock poisoned");
        Arc::clone(
            systems
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(System::new(id))),
        )
    }

    /// Looks a system up without creating it.
    pub fn system(&self, id: &str) -> Option<Arc<System>> {
        self.systems
            .lock()
            .expect("Systems lock poisoned")
            .get(id)
            .cloned()
    }

    /// Tears a system down locally. Later messages addressed to it are dropped.
    pub fn remove(&self, id: &str) -> Option<Arc<System>> {
        self.systems.lock().expect("Systems lock poisoned").remove(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.systems
            .lock()
            .expect("Systems lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent_and_remove_forgets() {
        let systems = Systems::new();
        let first = systems.register("sys-1");
        let second = systems.register("sys-1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(systems.ids(), vec!["sys-1".to_string()]);

        assert!(systems.remove("sys-1").is_some());
        assert!(systems.system("sys-1").is_none());
    }
}
