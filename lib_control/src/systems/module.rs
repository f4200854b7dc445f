use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::protocol::{BindingKey, Target};
use crate::systems::status::StatusVariable;

/// Splits `"Display_2"` into `("Display", 2)`.
///
/// Ids without a numeric suffix keep `index`; an index of 0 becomes 1.
pub fn split_module_id(id: &str, index: u32) -> (String, u32) {
    if let Some((name, suffix)) = id.rsplit_once('_') {
        if let Ok(parsed) = suffix.parse::<u32>() {
            return (name.to_string(), parsed.max(1));
        }
    }
    (id.to_string(), index.max(1))
}

/// One instance of a module inside a system.
pub struct Module {
    target: Target,
    variables: Mutex<HashMap<String, Arc<StatusVariable>>>,
}

impl Module {
    pub fn new(system: &str, id: &str, index: u32) -> Self {
        Self {
            target: Target::new(system, id, index),
            variables: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.target.module
    }

    pub fn index(&self) -> u32 {
        self.target.index
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn key(&self, name: &str) -> BindingKey {
        self.target.key(name)
    }

    /// Returns the status variable, creating it so observers can attach.
    pub fn observe(&self, name: &str) -> Arc<StatusVariable> {
        let mut variables = self.variables.lock().expect("Module variables lock poisoned");
        Arc::clone(
            variables
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(StatusVariable::new(name))),
        )
    }

    /// Looks a status variable up without creating it.
    pub fn variable(&self, name: &str) -> Option<Arc<StatusVariable>> {
        self.variables
            .lock()
            .expect("Module variables lock poisoned")
            .get(name)
            .cloned()
    }

    /// Stops routing values for `name` locally. Does not unbind on the engine.
    pub fn forget(&self, name: &str) -> Option<Arc<StatusVariable>> {
        self.variables
            .lock()
            .expect("Module variables lock poisoned")
            .remove(name)
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables
            .lock()
            .expect("Module variables lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_module_id() {
        assert_eq!(split_module_id("Display_2", 1), ("Display".to_string(), 2));
        assert_eq!(split_module_id("Display", 3), ("Display".to_string(), 3));
        assert_eq!(split_module_id("Display", 0), ("Display".to_string(), 1));
        assert_eq!(split_module_id("Video_Switcher", 4), ("Video_Switcher".to_string(), 4));
        assert_eq!(split_module_id("Video_Switcher_3", 1), ("Video_Switcher".to_string(), 3));
    }

    #[test]
    fn test_observe_and_forget() {
        let module = Module::new("sys-1", "Display", 1);
        assert!(module.variable("power").is_none());

        let a = module.observe("power");
        let b = module.observe("power");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(module.key("power"), BindingKey::new("sys-1", "Display", 1, "power"));

        assert!(module.forget("power").is_some());
        assert!(module.variable("power").is_none());
    }
}
