//! Registry of the process-wide named collections.

use super::backend::Collection;
use super::config::CollectionConfig;
use super::key::CollectionKey;
use super::memory::InMemoryCollection;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Shared collections looked up by name, case-insensitively.
///
/// The registry is built once and cloned into every transaction; clones
/// share the same underlying collections.
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    collections: HashMap<CollectionKey, Arc<dyn Collection>>,
}

impl CollectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create one in-memory collection per configured name.
    pub fn from_config(config: &CollectionConfig) -> Self {
        let mut registry = Self::new();
        for name in &config.names {
            registry.register(Arc::new(InMemoryCollection::with_capacity(
                name.as_str(),
                config.initial_capacity,
            )));
        }
        debug!(count = registry.len(), "initialized collections");
        registry
    }

    /// Register a collection under its own name, replacing any previous one.
    pub fn register(&mut self, collection: Arc<dyn Collection>) {
        let name = CollectionKey::from(collection.name());
        self.collections.insert(name, collection);
    }

    /// Look up a collection.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Collection>> {
        self.collections.get(&CollectionKey::from(name))
    }

    /// Whether a collection with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.collections.contains_key(&CollectionKey::from(name))
    }

    /// Registered collection names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.collections.keys().map(CollectionKey::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered collections.
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config() {
        let registry = CollectionRegistry::from_config(&CollectionConfig::default());
        assert_eq!(registry.len(), 5);
        assert_eq!(
            registry.names(),
            vec!["GLOBAL", "IP", "RESOURCE", "SESSION", "USER"]
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = CollectionRegistry::from_config(&CollectionConfig::default());
        assert!(registry.get("ip").is_some());
        assert!(registry.contains("Session"));
        assert!(registry.get("TX").is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let registry = CollectionRegistry::from_config(&CollectionConfig::default());
        let clone = registry.clone();

        registry.get("GLOBAL").unwrap().store("counter", "1");
        assert_eq!(
            clone.get("global").unwrap().resolve_first("COUNTER").as_deref(),
            Some("1")
        );
    }
}
