//! Collection configuration

use serde::{Deserialize, Serialize};

/// Configuration for the process-wide collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Names of the shared collections to create
    #[serde(default = "default_names")]
    pub names: Vec<String>,

    /// Number of keys reserved per collection
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,
}

fn default_names() -> Vec<String> {
    ["GLOBAL", "IP", "SESSION", "USER", "RESOURCE"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_initial_capacity() -> usize {
    super::memory::DEFAULT_CAPACITY
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            names: default_names(),
            initial_capacity: default_initial_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CollectionConfig::default();
        assert_eq!(config.names.len(), 5);
        assert!(config.names.iter().any(|n| n == "IP"));
        assert_eq!(config.initial_capacity, 1000);
    }

    #[test]
    fn test_partial_toml() {
        let config: CollectionConfig = toml::from_str("names = [\"IP\"]").unwrap();
        assert_eq!(config.names, vec!["IP".to_string()]);
        assert_eq!(config.initial_capacity, 1000);
    }
}
