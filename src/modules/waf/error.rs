//! WAF error types

use std::path::PathBuf;
use thiserror::Error;

/// WAF-specific errors.
///
/// Every variant describes a load-time failure. Rule evaluation itself never
/// fails: problems at request time are logged and count as no match.
#[derive(Debug, Error)]
pub enum WafError {
    /// Invalid configuration
    #[error("Invalid WAF config: {0}")]
    InvalidConfig(String),

    /// Invalid rule definition
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Unknown or malformed variable reference
    #[error("Invalid variable `{0}'")]
    InvalidVariable(String),

    /// Unknown operator
    #[error("Unknown operator `{0}'")]
    UnknownOperator(String),

    /// Unknown transformation
    #[error("Unknown transformation `{0}'")]
    UnknownTransform(String),

    /// Unknown or malformed action
    #[error("Invalid action `{0}'")]
    InvalidAction(String),

    /// Action or operator parameter of the wrong shape
    #[error("{name}: the input \"{value}\" is not valid: {reason}")]
    InvalidParameter {
        /// Action or operator name
        name: String,
        /// The rejected parameter
        value: String,
        /// What was expected
        reason: String,
    },

    /// Regular expression failed to compile
    #[error("Invalid pattern `{pattern}': {source}")]
    InvalidPattern {
        /// The pattern text
        pattern: String,
        /// Compilation error
        #[source]
        source: regex::Error,
    },

    /// Resource file referenced by an operator could not be read
    #[error("Failed to read resource {path}: {source}")]
    MissingResource {
        /// Resource path
        path: PathBuf,
        /// I/O error
        #[source]
        source: std::io::Error,
    },

    /// A rule failed to load
    #[error("Rule {rule_id}: {source}")]
    RuleLoad {
        /// Id of the failing rule
        rule_id: i64,
        /// Underlying error
        #[source]
        source: Box<WafError>,
    },
}

/// Result type for WAF operations
pub type WafResult<T> = Result<T, WafError>;

impl WafError {
    /// Attach a rule id to a load error.
    pub fn for_rule(self, rule_id: i64) -> Self {
        match self {
            Self::RuleLoad { .. } => self,
            other => Self::RuleLoad {
                rule_id,
                source: Box::new(other),
            },
        }
    }

    /// Shorthand for [`WafError::InvalidParameter`].
    pub fn invalid_parameter(
        name: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Get the rule id if this error belongs to a rule
    pub fn rule_id(&self) -> Option<i64> {
        match self {
            Self::RuleLoad { rule_id, .. } => Some(*rule_id),
            _ => None,
        }
    }
}
