//! # Configuration
//!
//! TOML configuration for the engine: identity and mode, the shared
//! collections, and the rule set with its exceptions.
//!
//! Rules may live in the main file or in rule files pulled in through
//! `waf.include`; a directory entry includes every `*.toml` file in it, in
//! name order. Included files hold `[[rules]]`, `[[exceptions]]` and
//! `remove_rule_ids` at top level.
//!
//! ## Example Configuration
//!
//! ```toml
//! [engine]
//! name = "edge-waf"
//! mode = "on"
//!
//! [collections]
//! names = ["IP", "SESSION"]
//!
//! [waf]
//! include = ["rules.d"]
//!
//! [[waf.rules]]
//! id = 1001
//! phase = 2
//! variables = ["ARGS", "!ARGS:token"]
//! operator = "@rx (?i)union\\s+select"
//! actions = ["t:urlDecode", "deny", "msg:'SQL injection'"]
//! ```

mod error;
mod loader;
mod types;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{EngineConfig, EngineSection};
pub use validation::{
    BasicValidator, RuleCompileValidator, ValidationError, ValidationResult, ValidationSeverity,
    Validator,
};
