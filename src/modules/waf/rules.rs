//! Rule definitions and compilation

use super::actions::{parse_action, Action, ActionStage, ParsedAction, RuleAttribute};
use super::config::{RuleConfig, RuleSeverity, WafConfig};
use super::error::{WafError, WafResult};
use super::exceptions::RuleExceptions;
use super::operators::RuleOperator;
use super::transaction::Transaction;
use super::transforms::TransformPipeline;
use super::variables::{parse_variable_list, MacroString, Variable};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default phase of rules that do not name one
pub const DEFAULT_PHASE: u8 = 2;

/// Number of processing phases
pub const PHASE_COUNT: usize = 5;

/// A compiled rule, the head or one link of a chain.
#[derive(Debug)]
pub struct Rule {
    id: i64,
    phase: u8,
    msg: Option<MacroString>,
    tags: Vec<String>,
    severity: Option<RuleSeverity>,
    ver: Option<String>,
    rev: Option<String>,
    maturity: Option<u8>,
    accuracy: Option<u8>,
    variables: Vec<Box<dyn Variable>>,
    operator: RuleOperator,
    transforms: TransformPipeline,
    actions: Vec<Box<dyn Action>>,
    multi_match: bool,
    capture: bool,
    chained: bool,
    chain: Option<Box<Rule>>,
}

impl Rule {
    /// Compile a rule and its chain
    pub fn from_config(config: &RuleConfig) -> WafResult<Self> {
        let id = declared_id(config);
        Self::compile(config, None, true).map_err(|e| e.for_rule(id))
    }

    fn compile(config: &RuleConfig, inherited_phase: Option<u8>, head: bool) -> WafResult<Self> {
        let mut rule = Self {
            id: config.id,
            phase: config.phase.or(inherited_phase).unwrap_or(DEFAULT_PHASE),
            msg: config.msg.as_deref().map(MacroString::parse).transpose()?,
            tags: config.tags.clone(),
            severity: None,
            ver: None,
            rev: None,
            maturity: None,
            accuracy: None,
            variables: parse_variable_list(&config.variables)?,
            operator: RuleOperator::parse(&config.operator)?,
            transforms: TransformPipeline::new(),
            actions: Vec::new(),
            multi_match: false,
            capture: false,
            chained: config.chained || config.chain.is_some(),
            chain: None,
        };

        for text in &config.actions {
            match parse_action(text)? {
                ParsedAction::Attribute(attribute) => rule.apply(attribute)?,
                ParsedAction::Action(action) => {
                    if !head && action.stage() == ActionStage::Disruptive {
                        return Err(WafError::InvalidRule(format!(
                            "disruptive action `{}' is only allowed on the chain head",
                            action.name()
                        )));
                    }
                    rule.actions.push(action);
                },
            }
        }

        if !(1..=PHASE_COUNT as u8).contains(&rule.phase) {
            return Err(WafError::invalid_parameter(
                "phase",
                rule.phase.to_string(),
                "expected a phase between 1 and 5",
            ));
        }

        if let Some(child) = &config.chain {
            rule.chain = Some(Box::new(Self::compile(child, Some(rule.phase), false)?));
        }

        Ok(rule)
    }

    fn apply(&mut self, attribute: RuleAttribute) -> WafResult<()> {
        match attribute {
            RuleAttribute::Id(id) => self.id = id,
            RuleAttribute::Msg(msg) => self.msg = Some(MacroString::parse(&msg)?),
            RuleAttribute::Tag(tag) => self.tags.push(tag),
            RuleAttribute::Severity(severity) => self.severity = Some(severity),
            RuleAttribute::Phase(phase) => self.phase = phase,
            RuleAttribute::Ver(ver) => self.ver = Some(ver),
            RuleAttribute::Rev(rev) => self.rev = Some(rev),
            RuleAttribute::Maturity(maturity) => self.maturity = Some(maturity),
            RuleAttribute::Accuracy(accuracy) => self.accuracy = Some(accuracy),
            RuleAttribute::Chain => self.chained = true,
            RuleAttribute::MultiMatch => self.multi_match = true,
            RuleAttribute::Capture => self.capture = true,
            RuleAttribute::Transform(transform) => self.transforms.push(transform),
        }
        Ok(())
    }

    /// Rule id
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Processing phase
    pub fn phase(&self) -> u8 {
        self.phase
    }

    /// Unexpanded message
    pub fn msg_text(&self) -> Option<&str> {
        self.msg.as_ref().map(MacroString::raw)
    }

    /// Message with macros expanded against `tx`
    pub fn message(&self, tx: &Transaction) -> Option<String> {
        self.msg.as_ref().map(|m| m.expand(tx, self))
    }

    /// Tags
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Whether the rule carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Severity
    pub fn severity(&self) -> Option<RuleSeverity> {
        self.severity
    }

    /// Version
    pub fn ver(&self) -> Option<&str> {
        self.ver.as_deref()
    }

    /// Revision
    pub fn rev(&self) -> Option<&str> {
        self.rev.as_deref()
    }

    /// Maturity
    pub fn maturity(&self) -> Option<u8> {
        self.maturity
    }

    /// Accuracy
    pub fn accuracy(&self) -> Option<u8> {
        self.accuracy
    }

    /// Configured targets
    pub fn variables(&self) -> &[Box<dyn Variable>] {
        &self.variables
    }

    /// Operator
    pub fn operator(&self) -> &RuleOperator {
        &self.operator
    }

    /// Transformation pipeline
    pub fn transforms(&self) -> &TransformPipeline {
        &self.transforms
    }

    /// Runtime actions of one stage, in declaration order
    pub fn actions(&self, stage: ActionStage) -> impl Iterator<Item = &dyn Action> {
        self.actions
            .iter()
            .map(|a| a.as_ref())
            .filter(move |a| a.stage() == stage)
    }

    /// Whether the operator is consulted after every transformation step
    pub fn multi_match(&self) -> bool {
        self.multi_match
    }

    /// Whether regex captures are stored in `TX:0`..`TX:9`
    pub fn capture(&self) -> bool {
        self.capture
    }

    /// Whether the rule expects a successor
    pub fn is_chained(&self) -> bool {
        self.chained
    }

    /// Next link of the chain
    pub fn chain(&self) -> Option<&Rule> {
        self.chain.as_deref()
    }

    /// Iterate over this rule and its successors
    pub fn links(&self) -> impl Iterator<Item = &Rule> {
        std::iter::successors(Some(self), |r| r.chain())
    }

    /// A rule without targets matches once, like a bare action
    pub fn is_unconditional(&self) -> bool {
        self.variables.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn for_test(id: i64) -> Self {
        Self {
            id,
            phase: DEFAULT_PHASE,
            msg: None,
            tags: Vec::new(),
            severity: None,
            ver: None,
            rev: None,
            maturity: None,
            accuracy: None,
            variables: Vec::new(),
            operator: RuleOperator::parse("@unconditionalMatch").expect("valid operator"),
            transforms: TransformPipeline::new(),
            actions: Vec::new(),
            multi_match: false,
            capture: false,
            chained: false,
            chain: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_capture(mut self) -> Self {
        self.capture = true;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    #[cfg(test)]
    pub(crate) fn with_msg(mut self, msg: &str) -> Self {
        self.msg = MacroString::parse(msg).ok();
        self
    }
}

/// Id declared by a rule config, from its `id:` action when present
fn declared_id(config: &RuleConfig) -> i64 {
    config
        .actions
        .iter()
        .filter_map(|a| a.trim().strip_prefix("id:"))
        .find_map(|id| id.trim().trim_matches('\'').parse().ok())
        .unwrap_or(config.id)
}

/// Outcome of loading a rule set: rules that compiled and errors of those
/// that did not
#[derive(Debug)]
pub struct RuleSetLoad {
    /// Active rules
    pub rules: RuleSet,
    /// One error per rejected rule or exception
    pub errors: Vec<WafError>,
}

/// Compiled rules, grouped by phase in load order
#[derive(Debug, Default)]
pub struct RuleSet {
    phases: [Vec<Rule>; PHASE_COUNT],
    by_id: HashMap<i64, (u8, usize)>,
    by_tag: HashMap<String, Vec<i64>>,
    exceptions: Arc<RuleExceptions>,
}

impl RuleSet {
    /// Create an empty rule set
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every rule and exception of `config`.
    ///
    /// A rule that fails to compile is reported and skipped; the others load.
    pub fn from_config(config: &WafConfig) -> RuleSetLoad {
        let mut rules = Self::new();
        let mut errors = Vec::new();

        for rule_config in &config.rules {
            let id = declared_id(rule_config);
            if config.remove_rule_ids.contains(&id) {
                debug!(rule_id = id, "Rule removed at load time");
                continue;
            }

            match Rule::from_config(rule_config).and_then(|rule| rules.add_rule(rule)) {
                Ok(()) => {},
                Err(e) => {
                    warn!(rule_id = id, error = %e, "Rule rejected");
                    errors.push(e);
                },
            }
        }

        let (exceptions, exception_errors) = RuleExceptions::from_config(&config.exceptions);
        errors.extend(exception_errors);
        rules.exceptions = Arc::new(exceptions);

        info!(
            rules = rules.len(),
            exceptions = rules.exceptions.len(),
            errors = errors.len(),
            "Loaded rule set"
        );
        RuleSetLoad { rules, errors }
    }

    /// Add a compiled rule at the end of its phase
    pub fn add_rule(&mut self, rule: Rule) -> WafResult<()> {
        if rule.id() == 0 {
            return Err(WafError::InvalidRule(
                "a rule outside a chain needs a non-zero id".to_string(),
            ));
        }
        if self.by_id.contains_key(&rule.id()) {
            let id = rule.id();
            return Err(WafError::InvalidRule(format!("duplicate rule id {id}")).for_rule(id));
        }

        let phase = rule.phase();
        let slot = &mut self.phases[usize::from(phase - 1)];
        self.by_id.insert(rule.id(), (phase, slot.len()));
        for tag in rule.tags() {
            self.by_tag.entry(tag.clone()).or_default().push(rule.id());
        }
        slot.push(rule);
        Ok(())
    }

    /// Replace the exception lists
    pub fn set_exceptions(&mut self, exceptions: RuleExceptions) {
        self.exceptions = Arc::new(exceptions);
    }

    /// Exception lists
    pub fn exceptions(&self) -> &Arc<RuleExceptions> {
        &self.exceptions
    }

    /// Get a rule by id
    pub fn get(&self, id: i64) -> Option<&Rule> {
        let (phase, index) = self.by_id.get(&id)?;
        self.phases[usize::from(*phase - 1)].get(*index)
    }

    /// Rules carrying `tag`
    pub fn by_tag(&self, tag: &str) -> Vec<&Rule> {
        self.by_tag
            .get(tag)
            .map(|ids| ids.iter().filter_map(|id| self.get(*id)).collect())
            .unwrap_or_default()
    }

    /// Rules of a phase in load order; empty for an unknown phase
    pub fn rules_for_phase(&self, phase: u8) -> &[Rule] {
        match phase {
            1..=5 => &self.phases[usize::from(phase - 1)],
            _ => &[],
        }
    }

    /// Iterate over every rule, phase by phase
    pub fn all_rules(&self) -> impl Iterator<Item = &Rule> {
        self.phases.iter().flatten()
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether no rule is loaded
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::waf::config::ExceptionConfig;

    fn rule(id: i64, actions: &[&str]) -> RuleConfig {
        RuleConfig {
            id,
            variables: vec!["ARGS".to_string()],
            operator: "@rx attack".to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_compile_attributes() {
        let rule = Rule::from_config(&rule(
            0,
            &[
                "id:1001",
                "phase:1",
                "msg:'Attack %{TX.anomaly}'",
                "tag:attack-generic",
                "severity:CRITICAL",
                "ver:1.0",
                "rev:3",
                "maturity:9",
                "accuracy:8",
                "t:lowercase",
                "t:urlDecode",
                "multiMatch",
                "capture",
                "setvar:tx.anomaly=+5",
                "deny",
            ],
        ))
        .unwrap();

        assert_eq!(rule.id(), 1001);
        assert_eq!(rule.phase(), 1);
        assert_eq!(rule.msg_text(), Some("Attack %{TX.anomaly}"));
        assert!(rule.has_tag("attack-generic"));
        assert!(!rule.has_tag("attack"));
        assert_eq!(rule.severity(), Some(RuleSeverity::Critical));
        assert_eq!(rule.ver(), Some("1.0"));
        assert_eq!(rule.rev(), Some("3"));
        assert_eq!(rule.maturity(), Some(9));
        assert_eq!(rule.accuracy(), Some(8));
        assert_eq!(rule.transforms().steps().len(), 2);
        assert!(rule.multi_match());
        assert!(rule.capture());
        assert!(!rule.is_chained());
        assert_eq!(rule.actions(ActionStage::IndependentOfChain).count(), 1);
        assert_eq!(rule.actions(ActionStage::Disruptive).count(), 1);
        assert_eq!(rule.actions(ActionStage::AfterFullMatch).count(), 0);
    }

    #[test]
    fn test_chain_inherits_phase() {
        let mut head = rule(2001, &["phase:1", "deny"]);
        head.chain = Some(Box::new(rule(0, &["setvar:tx.x=1"])));
        let rule = Rule::from_config(&head).unwrap();

        assert!(rule.is_chained());
        let child = rule.chain().unwrap();
        assert_eq!(child.phase(), 1);
        assert_eq!(rule.links().count(), 2);
    }

    #[test]
    fn test_chained_flag_without_successor() {
        let rule = Rule::from_config(&rule(2002, &["chain"])).unwrap();
        assert!(rule.is_chained());
        assert!(rule.chain().is_none());
    }

    #[test]
    fn test_disruptive_on_chain_link_rejected() {
        let mut head = rule(2003, &[]);
        head.chain = Some(Box::new(rule(0, &["deny"])));
        let err = Rule::from_config(&head).unwrap_err();
        assert_eq!(err.rule_id(), Some(2003));
    }

    #[test]
    fn test_load_errors_carry_rule_id() {
        let err = Rule::from_config(&rule(0, &["id:3001", "maturity:high"])).unwrap_err();
        assert_eq!(err.rule_id(), Some(3001));

        let mut bad_operator = rule(3002, &[]);
        bad_operator.operator = "@rx (".to_string();
        assert_eq!(
            Rule::from_config(&bad_operator).unwrap_err().rule_id(),
            Some(3002)
        );
    }

    #[test]
    fn test_ruleset_from_config() {
        let mut bad = rule(12, &[]);
        bad.variables = vec!["NOPE".to_string()];
        let config = WafConfig {
            rules: vec![
                rule(10, &["phase:1", "tag:a"]),
                rule(11, &["tag:a"]),
                bad,
                rule(13, &[]),
                rule(10, &[]),
            ],
            exceptions: vec![ExceptionConfig {
                tag: Some("a".to_string()),
                targets: vec!["!ARGS".to_string()],
                ..Default::default()
            }],
            remove_rule_ids: vec![13],
            ..Default::default()
        };

        let load = RuleSet::from_config(&config);
        assert_eq!(load.rules.len(), 2);
        assert_eq!(load.errors.len(), 2);
        assert_eq!(load.rules.rules_for_phase(1).len(), 1);
        assert_eq!(load.rules.rules_for_phase(2).len(), 1);
        assert!(load.rules.rules_for_phase(9).is_empty());
        assert_eq!(load.rules.by_tag("a").len(), 2);
        assert!(load.rules.get(13).is_none());
        assert_eq!(load.rules.get(11).unwrap().phase(), 2);
        assert_eq!(load.rules.exceptions().len(), 1);
    }

    #[test]
    fn test_zero_id_rejected_at_top_level() {
        let mut set = RuleSet::new();
        let rule = Rule::from_config(&rule(0, &[])).unwrap();
        assert!(set.add_rule(rule).is_err());
        assert!(set.is_empty());
    }
}
