//! WAF configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Rule set configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WafConfig {
    /// Rule definitions, in load order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Target update exceptions
    #[serde(default)]
    pub exceptions: Vec<ExceptionConfig>,

    /// Rule ids dropped at load time
    #[serde(default)]
    pub remove_rule_ids: Vec<i64>,

    /// Match logging configuration
    #[serde(default)]
    pub match_log: MatchLogConfig,

    /// Rule files or directories of `*.toml` rule files merged at load time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<PathBuf>,
}

/// Contents of an included rule file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleFile {
    /// Rule definitions
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Target update exceptions
    #[serde(default)]
    pub exceptions: Vec<ExceptionConfig>,

    /// Rule ids dropped at load time
    #[serde(default)]
    pub remove_rule_ids: Vec<i64>,
}

impl WafConfig {
    /// Append the contents of an included rule file
    pub fn merge(&mut self, file: RuleFile) {
        self.rules.extend(file.rules);
        self.exceptions.extend(file.exceptions);
        self.remove_rule_ids.extend(file.remove_rule_ids);
    }
}

fn default_true() -> bool {
    true
}

fn default_operator() -> String {
    "@unconditionalMatch".to_string()
}

/// Engine mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEngineMode {
    /// Evaluate rules and apply disruptive actions
    #[default]
    On,
    /// Evaluate and log, never intervene
    DetectionOnly,
    /// Do not evaluate rules
    Off,
}

impl RuleEngineMode {
    /// Whether rules are evaluated at all
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Whether disruptive actions take effect
    pub fn should_intervene(&self) -> bool {
        matches!(self, Self::On)
    }

    /// Get display name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "On",
            Self::DetectionOnly => "DetectionOnly",
            Self::Off => "Off",
        }
    }
}

/// A single rule.
///
/// Metadata may be given either as fields or as entries of `actions`
/// (`id:100`, `phase:2`, `tag:sqli`, `msg:'...'`); action entries win.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rule id (0 for chain links without one)
    #[serde(default)]
    pub id: i64,

    /// Processing phase (1-5)
    #[serde(default)]
    pub phase: Option<u8>,

    /// Rule message
    #[serde(default)]
    pub msg: Option<String>,

    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Variable references, e.g. `ARGS`, `!ARGS:token`, `&TX:score`
    #[serde(default)]
    pub variables: Vec<String>,

    /// Operator, e.g. `@rx ^admin`, `!@streq GET`
    #[serde(default = "default_operator")]
    pub operator: String,

    /// Actions, e.g. `deny`, `status:403`, `t:lowercase`, `setvar:tx.score=+5`
    #[serde(default)]
    pub actions: Vec<String>,

    /// Marks the rule as chained even without a `chain` table
    #[serde(default)]
    pub chained: bool,

    /// Next rule of the chain
    #[serde(default)]
    pub chain: Option<Box<RuleConfig>>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            id: 0,
            phase: None,
            msg: None,
            tags: Vec::new(),
            variables: Vec::new(),
            operator: default_operator(),
            actions: Vec::new(),
            chained: false,
            chain: None,
        }
    }
}

impl RuleConfig {
    /// Iterate over this rule and its chained successors
    pub fn links(&self) -> impl Iterator<Item = &RuleConfig> {
        std::iter::successors(Some(self), |r| r.chain.as_deref())
    }
}

/// Exclusion/addition of rule targets, selected by tag, message or id.
///
/// Exactly one selector must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExceptionConfig {
    /// Select rules carrying this tag
    #[serde(default)]
    pub tag: Option<String>,

    /// Select rules with this message
    #[serde(default)]
    pub msg: Option<String>,

    /// Select the rule with this id
    #[serde(default)]
    pub id: Option<i64>,

    /// Variable references added to, or with `!`, removed from, the rule
    pub targets: Vec<String>,
}

impl ExceptionConfig {
    /// Number of selectors set
    pub fn selector_count(&self) -> usize {
        usize::from(self.tag.is_some())
            + usize::from(self.msg.is_some())
            + usize::from(self.id.is_some())
    }
}

/// Rule severity, syslog style
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSeverity {
    /// 0
    Emergency,
    /// 1
    Alert,
    /// 2
    Critical,
    /// 3
    Error,
    /// 4
    Warning,
    /// 5
    Notice,
    /// 6
    Info,
    /// 7
    Debug,
}

impl RuleSeverity {
    const ALL: [Self; 8] = [
        Self::Emergency,
        Self::Alert,
        Self::Critical,
        Self::Error,
        Self::Warning,
        Self::Notice,
        Self::Info,
        Self::Debug,
    ];

    /// Parse from a level number or a name
    pub fn parse(s: &str) -> Option<Self> {
        if let Ok(level) = s.parse::<usize>() {
            return Self::ALL.get(level).copied();
        }
        Self::ALL
            .iter()
            .copied()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s))
    }

    /// Numeric level, 0 is most severe
    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// Get display name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "EMERGENCY",
            Self::Alert => "ALERT",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }
}

/// Match logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchLogConfig {
    /// Whether matches are recorded
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum entries to keep in memory
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Also emit every entry through `tracing`
    #[serde(default = "default_true")]
    pub forward_to_tracing: bool,
}

fn default_max_entries() -> usize {
    10000
}

impl Default for MatchLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            forward_to_tracing: true,
        }
    }
}
