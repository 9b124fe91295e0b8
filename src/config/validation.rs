//! Configuration validation.
//!
//! Validators run on the merged configuration before any rule is compiled
//! into a handler. Errors reject the configuration; warnings are logged by
//! the loader.

use super::types::EngineConfig;
use crate::modules::waf::{RuleConfig, RuleSet, PHASE_COUNT};
use std::collections::HashSet;

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong.
    pub message: String,
    /// Whether the finding rejects the configuration.
    pub severity: ValidationSeverity,
}

impl ValidationError {
    /// A finding that rejects the configuration.
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, ValidationSeverity::Error)
    }

    /// A finding that is only reported.
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, ValidationSeverity::Warning)
    }

    fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        severity: ValidationSeverity,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity,
        }
    }
}

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// The configuration cannot be used.
    Error,
    /// The configuration loads but probably does not do what was meant.
    Warning,
}

/// Findings of one or more validators.
#[derive(Debug, Default)]
pub struct ValidationResult {
    issues: Vec<ValidationError>,
}

impl ValidationResult {
    /// Create an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finding.
    pub fn push(&mut self, issue: ValidationError) {
        self.issues.push(issue);
    }

    /// Whether no finding is an error.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    /// All findings, in the order they were recorded.
    #[must_use]
    pub fn issues(&self) -> &[ValidationError] {
        &self.issues
    }

    /// Findings that reject the configuration.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationError> {
        self.by_severity(ValidationSeverity::Error)
    }

    /// Findings that are only reported.
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationError> {
        self.by_severity(ValidationSeverity::Warning)
    }

    fn by_severity(&self, severity: ValidationSeverity) -> impl Iterator<Item = &ValidationError> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    /// Append the findings of another result.
    pub fn merge(&mut self, other: ValidationResult) {
        self.issues.extend(other.issues);
    }
}

/// A configuration check.
pub trait Validator: std::fmt::Debug + Send + Sync {
    /// Check `config` and report what is wrong with it.
    fn validate(&self, config: &EngineConfig) -> ValidationResult;
}

/// Structural checks that need no rule compilation.
#[derive(Debug, Default)]
pub struct BasicValidator;

impl BasicValidator {
    /// Create a new basic validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn check_engine(config: &EngineConfig, result: &mut ValidationResult) {
    if config.engine.name.trim().is_empty() {
        result.push(ValidationError::error("engine.name", "Engine name cannot be empty"));
    }
}

// Collection names are looked up case-insensitively, so `ip` and `IP` clash
fn check_collections(config: &EngineConfig, result: &mut ValidationResult) {
    let mut seen = HashSet::new();
    for name in &config.collections.names {
        if name.is_empty() {
            result.push(ValidationError::error(
                "collections.names",
                "Collection name cannot be empty",
            ));
        } else if name.eq_ignore_ascii_case("TX") {
            result.push(ValidationError::error(
                "collections.names",
                "TX is per transaction and cannot be shared",
            ));
        } else if !seen.insert(name.to_ascii_uppercase()) {
            result.push(ValidationError::error(
                "collections.names",
                format!("Duplicate collection name: {name}"),
            ));
        }
    }
}

fn check_link_phase(field: &str, link: &RuleConfig, result: &mut ValidationResult) {
    let Some(phase) = link.phase else {
        return;
    };
    if !(1..=PHASE_COUNT as u8).contains(&phase) {
        result.push(ValidationError::error(
            format!("{field}.phase"),
            format!("Phase {phase} is outside 1-{PHASE_COUNT}"),
        ));
    }
}

fn check_rules(config: &EngineConfig, result: &mut ValidationResult) {
    let mut ids = HashSet::new();
    for (index, rule) in config.waf.rules.iter().enumerate() {
        let field = format!("waf.rules[{index}]");
        if rule.id != 0 && !ids.insert(rule.id) {
            result.push(ValidationError::error(
                format!("{field}.id"),
                format!("Duplicate rule id: {}", rule.id),
            ));
        }
        for link in rule.links() {
            check_link_phase(&field, link, result);
        }
        if rule.variables.is_empty() && rule.operator != "@unconditionalMatch" {
            result.push(ValidationError::warning(
                format!("{field}.variables"),
                "Rule without variables matches once against an empty value",
            ));
        }
    }

    for id in &config.waf.remove_rule_ids {
        if !ids.contains(id) {
            result.push(ValidationError::warning(
                "waf.remove_rule_ids",
                format!("Rule {id} is removed but never defined"),
            ));
        }
    }
}

fn check_exceptions(config: &EngineConfig, result: &mut ValidationResult) {
    for (index, exception) in config.waf.exceptions.iter().enumerate() {
        let field = format!("waf.exceptions[{index}]");
        if exception.selector_count() != 1 {
            result.push(ValidationError::error(
                field.clone(),
                "Exception needs exactly one of tag, msg or id",
            ));
        }
        if exception.targets.is_empty() {
            result.push(ValidationError::error(
                format!("{field}.targets"),
                "Exception needs at least one target",
            ));
        }
    }
}

impl Validator for BasicValidator {
    fn validate(&self, config: &EngineConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        check_engine(config, &mut result);
        check_collections(config, &mut result);
        check_rules(config, &mut result);
        check_exceptions(config, &mut result);

        if config.waf.match_log.max_entries == 0 {
            result.push(ValidationError::warning(
                "waf.match_log.max_entries",
                "Match log keeps a single entry when max_entries is 0",
            ));
        }
        result
    }
}

/// Compiles every rule and exception without activating them.
///
/// Failures are errors by default; with [`RuleCompileValidator::lenient`]
/// they become warnings and the engine loads the remaining rules.
#[derive(Debug, Default)]
pub struct RuleCompileValidator {
    lenient: bool,
}

impl RuleCompileValidator {
    /// Report compile failures as errors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report compile failures as warnings.
    #[must_use]
    pub fn lenient() -> Self {
        Self { lenient: true }
    }
}

impl Validator for RuleCompileValidator {
    fn validate(&self, config: &EngineConfig) -> ValidationResult {
        let mut result = ValidationResult::new();
        for error in RuleSet::from_config(&config.waf).errors {
            let field = match error.rule_id() {
                Some(id) => format!("waf.rules.{id}"),
                None => "waf.exceptions".to_string(),
            };
            let message = error.to_string();
            result.push(if self.lenient {
                ValidationError::warning(field, message)
            } else {
                ValidationError::error(field, message)
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::waf::ExceptionConfig;

    fn rule(id: i64, operator: &str) -> RuleConfig {
        RuleConfig {
            id,
            variables: vec!["ARGS".to_string()],
            operator: operator.to_string(),
            ..Default::default()
        }
    }

    fn messages(result: &ValidationResult) -> Vec<String> {
        result.errors().map(|e| e.message.clone()).collect()
    }

    #[test]
    fn test_default_config_is_valid() {
        let result = BasicValidator::new().validate(&EngineConfig::default());
        assert!(result.is_valid());
        assert!(result.issues().is_empty());
    }

    #[test]
    fn test_empty_engine_name() {
        let mut config = EngineConfig::default();
        config.engine.name = "  ".to_string();

        let result = BasicValidator::new().validate(&config);
        assert!(!result.is_valid());
        assert_eq!(result.issues()[0].field, "engine.name");
    }

    #[test]
    fn test_duplicates() {
        let mut config = EngineConfig::default();
        config.collections.names.push("ip".to_string());
        config.collections.names.push("tx".to_string());
        config.waf.rules.push(rule(1, "@rx a"));
        config.waf.rules.push(rule(1, "@rx b"));

        let result = BasicValidator::new().validate(&config);
        let messages = messages(&result);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages.iter().filter(|m| m.contains("Duplicate")).count(), 2);
        assert!(messages.iter().any(|m| m.contains("TX")));
    }

    #[test]
    fn test_phase_and_exceptions() {
        let mut config = EngineConfig::default();
        let mut bad_phase = rule(1, "@rx a");
        bad_phase.chain = Some(Box::new(RuleConfig {
            phase: Some(9),
            ..rule(0, "@rx b")
        }));
        config.waf.rules.push(bad_phase);
        config.waf.exceptions.push(ExceptionConfig {
            tag: Some("x".to_string()),
            msg: Some("y".to_string()),
            targets: vec!["ARGS".to_string()],
            ..Default::default()
        });

        let result = BasicValidator::new().validate(&config);
        let errors: Vec<_> = result.errors().collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].field.ends_with(".phase"));
        assert_eq!(errors[1].field, "waf.exceptions[0]");
    }

    #[test]
    fn test_warnings_do_not_reject() {
        let mut config = EngineConfig::default();
        config.waf.rules.push(RuleConfig {
            id: 3,
            operator: "@streq x".to_string(),
            ..Default::default()
        });
        config.waf.remove_rule_ids.push(99);
        config.waf.match_log.max_entries = 0;

        let result = BasicValidator::new().validate(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings().count(), 3);
    }

    #[test]
    fn test_rule_compile_validator() {
        let mut config = EngineConfig::default();
        config.waf.rules.push(rule(1, "@rx ("));
        config.waf.rules.push(rule(2, "@rx ok"));

        let strict = RuleCompileValidator::new().validate(&config);
        assert!(!strict.is_valid());
        assert_eq!(strict.issues()[0].field, "waf.rules.1");

        let lenient = RuleCompileValidator::lenient().validate(&config);
        assert!(lenient.is_valid());
        assert_eq!(lenient.warnings().count(), 1);
    }

    #[test]
    fn test_merge() {
        let mut first = ValidationResult::new();
        first.push(ValidationError::error("a", "broken"));

        let mut second = ValidationResult::new();
        second.push(ValidationError::warning("b", "odd"));

        first.merge(second);
        assert_eq!(first.issues().len(), 2);
        assert_eq!(first.warnings().count(), 1);
    }
}
