use std::fmt;
use std::sync::Arc;

use crate::model::Test;
use crate::runner::controller::TestController;
use crate::runner::delegating::TestControllerProvider;
use crate::runner::scripted::ScriptedTestController;

/// Metadata key naming the controller that owns a test's subtree.
pub const FRAMEWORK_METADATA_KEY: &str = "framework";

/// Registry of specialized test controllers.
///
/// Acts as a [`TestControllerProvider`]: a test whose `framework` metadata
/// names a registered controller is handed to that controller along with
/// its whole subtree.
#[derive(Clone)]
pub struct ControllerRegistry {
    controllers: Vec<Arc<dyn TestController>>,
}

impl ControllerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            controllers: Vec::new(),
        }
    }

    /// Create a registry with the built-in controllers.
    ///
    /// Currently registers: `scripted`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ScriptedTestController));
        registry
    }

    /// Look up a controller by name (e.g., "scripted").
    pub fn get(&self, name: &str) -> Option<Arc<dyn TestController>> {
        self.controllers
            .iter()
            .find(|c| c.name() == name)
            .map(Arc::clone)
    }

    /// List all registered controller names.
    pub fn list(&self) -> Vec<&str> {
        self.controllers.iter().map(|c| c.name()).collect()
    }

    /// Register an additional controller. A controller with the same name
    /// replaces the earlier one.
    pub fn register(&mut self, controller: Arc<dyn TestController>) {
        self.controllers.retain(|c| c.name() != controller.name());
        self.controllers.push(controller);
    }
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerRegistry")
            .field("controllers", &self.list())
            .finish()
    }
}

impl TestControllerProvider for ControllerRegistry {
    fn controller_for(&self, test: &Test) -> Option<Arc<dyn TestController>> {
        test.metadata_value(FRAMEWORK_METADATA_KEY)
            .and_then(|name| self.get(name))
    }
}
