//! Configuration type definitions.

use crate::modules::collection::CollectionConfig;
use crate::modules::waf::{RuleEngineMode, WafConfig};
use serde::{Deserialize, Serialize};

/// Root configuration structure for the WAF engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine identity and mode.
    pub engine: EngineSection,

    /// Shared collections.
    pub collections: CollectionConfig,

    /// Rules, exceptions and match logging.
    pub waf: WafConfig,
}

/// Engine section configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// Engine instance name.
    pub name: String,

    /// Rule engine mode.
    pub mode: RuleEngineMode,

    /// Snapshot the process environment for `ENV` at startup.
    pub capture_process_env: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            name: "r0n-waf".to_string(),
            mode: RuleEngineMode::On,
            capture_process_env: false,
        }
    }
}
