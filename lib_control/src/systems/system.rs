use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::systems::module::{split_module_id, Module};

/// A named collection of module instances.
pub struct System {
    id: String,
    modules: Mutex<HashMap<(String, u32), Arc<Module>>>,
}

impl System {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the module instance, creating it on first use.
    ///
    /// An id such as `"Display_2"` carries its own index and overrides
    /// `index`. An index of 0 is treated as 1.
    pub fn module(&self, id: &str, index: u32) -> Arc<Module> {
        let (name, index) = split_module_id(id, index);
        let mut modules = self.modules.lock().expect("System modules lock poisoned");
        Arc::clone(
            modules
                .entry((name.clone(), index))
                .or_insert_with(|| Arc::new(Module::new(&self.id, &name, index))),
        )
    }

    /// Looks a module instance up without creating it.
    pub fn existing_module(&self, id: &str, index: u32) -> Option<Arc<Module>> {
        let (name, index) = split_module_id(id, index);
        self.modules
            .lock()
            .expect("System modules lock poisoned")
            .get(&(name, index))
            .cloned()
    }

    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.modules
            .lock()
            .expect("System modules lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_is_created_lazily_once() {
        let system = System::new("sys-1");
        assert!(system.existing_module("Display", 1).is_none());

        let a = system.module("Display", 1);
        let b = system.module("Display_1", 7);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(system.modules().len(), 1);

        let second = system.module("Display", 2);
        assert_eq!(second.index(), 2);
        assert_eq!(system.modules().len(), 2);
    }
}
