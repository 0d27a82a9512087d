//! Registry of hardware backends.
//!
//! A backend creates the DAQ card and the photon counter together. The
//! registry is built at startup and passed to whoever constructs the
//! interfuse; there is no global state.

use crate::drivers;
use qscan_common::hal::driver::{BackendFactory, HalError, HardwareBackend};
use std::collections::HashMap;
use tracing::debug;

/// Registry of available backends.
pub struct BackendRegistry {
    factories: HashMap<&'static str, BackendFactory>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in backend.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        drivers::register_all(&mut registry);
        registry
    }

    /// Register a backend factory.
    ///
    /// # Panics
    /// Panics if a backend with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: BackendFactory) {
        if self.factories.contains_key(name) {
            panic!("Backend '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a backend factory by name.
    pub fn get_factory(&self, name: &str) -> Option<BackendFactory> {
        self.factories.get(name).copied()
    }

    /// Create a backend by name, passing it its configuration table.
    ///
    /// # Errors
    /// `HalError::BackendNotFound` for an unknown name, or whatever the
    /// factory reports.
    pub fn create(
        &self,
        name: &str,
        config: Option<&toml::Value>,
    ) -> Result<HardwareBackend, HalError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| HalError::BackendNotFound(name.to_string()))?;
        debug!("Creating backend '{}'", name);
        factory(config)
    }

    /// List all registered backend names.
    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
