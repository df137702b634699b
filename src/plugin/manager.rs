//! Plugin factory management
//!
//! Maps plugin type names to constructors so a loader can turn
//! configuration entries into components. Registration into a container is
//! left to the orchestrator.

use std::collections::HashMap;

use log::{debug, info};
use serde_json::Value as JsonValue;

use crate::{
    config::PluginEntry,
    core::{
        error::{OrchestratorError, OrchestratorResult},
        traits::ComponentRef,
    },
};

use super::echo;

/// Plugin factory function type
pub type PluginFactory = fn(JsonValue) -> OrchestratorResult<ComponentRef>;

/// Registry of plugin factories
pub struct PluginManager {
    factories: HashMap<String, PluginFactory>,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginManager {
    /// Create a manager with the built-in factories registered
    pub fn new() -> Self {
        let mut manager = Self::empty();
        manager.register_builtin_plugins();
        manager
    }

    /// Create a manager without any factories
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a plugin factory, replacing any previous one for `name`
    pub fn register_factory(&mut self, name: impl Into<String>, factory: PluginFactory) {
        let name = name.into();
        debug!("Registering plugin factory: {name}");
        self.factories.insert(name, factory);
    }

    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Sorted factory names
    pub fn factory_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Create a plugin instance from configuration
    pub fn create_plugin(&self, name: &str, config: JsonValue) -> OrchestratorResult<ComponentRef> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| OrchestratorError::UnknownPlugin(name.to_string()))?;

        factory(config)
    }

    /// Instantiate every configured plugin, failing on the first error
    pub fn create_plugins(&self, entries: &[PluginEntry]) -> OrchestratorResult<Vec<ComponentRef>> {
        let plugins = entries
            .iter()
            .map(|entry| self.create_plugin(&entry.name, entry.config.clone()))
            .collect::<OrchestratorResult<Vec<_>>>()?;
        info!("Created {} plugin(s) from configuration", plugins.len());
        Ok(plugins)
    }

    fn register_builtin_plugins(&mut self) {
        self.register_factory(echo::PLUGIN_NAME, echo::create_echo_plugin);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{core::metadata::Metadata, plugin::adapter::FnComponent};

    fn noop_plugin(_: JsonValue) -> OrchestratorResult<ComponentRef> {
        Ok(FnComponent::new(Metadata::new("noop", "0.1.0")).build())
    }

    #[test]
    fn test_builtin_factories() {
        let manager = PluginManager::new();
        assert!(manager.has_factory(echo::PLUGIN_NAME));
        assert!(!PluginManager::empty().has_factory(echo::PLUGIN_NAME));
    }

    #[test]
    fn test_unknown_plugin() {
        let manager = PluginManager::new();
        let err = manager.create_plugin("missing", JsonValue::Null).err().unwrap();
        assert!(matches!(err, OrchestratorError::UnknownPlugin(ref name) if name == "missing"));
    }

    #[test]
    fn test_create_plugins_from_entries() {
        let mut manager = PluginManager::new();
        manager.register_factory("noop", noop_plugin);
        assert_eq!(manager.factory_names(), vec!["echo", "noop"]);

        let entries = vec![
            PluginEntry {
                name: "noop".to_string(),
                config: JsonValue::Null,
            },
            PluginEntry {
                name: "echo".to_string(),
                config: json!({"name": "greeter"}),
            },
        ];
        let plugins = manager.create_plugins(&entries).unwrap();
        let names: Vec<&str> = plugins.iter().map(|p| p.metadata().name.as_str()).collect();
        assert_eq!(names, vec!["noop", "greeter"]);
        assert!(!Arc::ptr_eq(&plugins[0], &plugins[1]));
    }
}
