//! Rule chain evaluation
//!
//! A chain is a conjunction: every link must match at least one value.
//! Per-value evidence is logged as it is found; the entry closing the chain
//! is logged once, after the last link matched.

use super::actions::ActionStage;
use super::config::RuleEngineMode;
use super::exceptions::RuleExceptions;
use super::logging::{MatchLogger, RuleMessage, TracingLogger};
use super::operators::OperatorResult;
use super::rules::Rule;
use super::transaction::Transaction;
use super::value::{ValueList, VariableValue};
use super::variables::{Variable, VariableSet};
use crate::modules::collection::Collection;
use std::sync::Arc;
use tracing::{debug, trace};

/// State after evaluating one link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStep {
    /// The link matched and has a successor
    MatchedContinue,
    /// The link matched and closes the chain
    MatchedTerminal,
    /// The link did not match
    Failed,
}

/// Evaluates rule chains against a transaction.
///
/// The engine holds no per-request state; everything it reads or writes
/// lives in the [`Transaction`].
#[derive(Debug, Clone)]
pub struct RuleEngine {
    mode: RuleEngineMode,
    exceptions: Arc<RuleExceptions>,
    logger: Arc<dyn MatchLogger>,
}

impl RuleEngine {
    /// Create an engine without exceptions, logging through `tracing`
    pub fn new(mode: RuleEngineMode) -> Self {
        Self {
            mode,
            exceptions: Arc::new(RuleExceptions::new()),
            logger: Arc::new(TracingLogger),
        }
    }

    /// Builder: set the exception lists
    #[must_use]
    pub fn with_exceptions(mut self, exceptions: Arc<RuleExceptions>) -> Self {
        self.exceptions = exceptions;
        self
    }

    /// Builder: set the match logger
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn MatchLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Engine mode
    pub fn mode(&self) -> RuleEngineMode {
        self.mode
    }

    /// Evaluate `rule` and its chain.
    ///
    /// A rule removed for this transaction is vacuously true: it runs no
    /// action and logs nothing.
    pub fn evaluate(&self, tx: &mut Transaction, rule: &Rule) -> bool {
        if !self.mode.is_enabled() {
            return false;
        }
        if tx.overrides().is_rule_removed(rule.id()) {
            debug!(tx = %tx.id(), rule_id = rule.id(), "Rule removed, skipping");
            return true;
        }

        let mut message = RuleMessage::new(tx, rule);
        let mut matched: Vec<&Rule> = Vec::new();
        let mut link = rule;

        loop {
            let removed = !std::ptr::eq(link, rule) && tx.overrides().is_rule_removed(link.id());
            let step = if removed {
                debug!(
                    tx = %tx.id(),
                    rule_id = link.id(),
                    "Chained rule removed, chain ends here"
                );
                ChainStep::MatchedTerminal
            } else {
                let step = self.evaluate_link(tx, link, &mut message);
                if step != ChainStep::Failed {
                    matched.push(link);
                }
                step
            };

            match step {
                ChainStep::Failed => {
                    debug!(tx = %tx.id(), rule_id = rule.id(), "Chain did not match");
                    return false;
                },
                ChainStep::MatchedTerminal => break,
                ChainStep::MatchedContinue => match link.chain() {
                    Some(next) => link = next,
                    None => {
                        debug!(
                            tx = %tx.id(),
                            rule_id = rule.id(),
                            "Chained rule has no successor, treating as no match"
                        );
                        return false;
                    },
                },
            }
        }

        self.finish_chain(tx, rule, &matched, message);
        true
    }

    /// Evaluate one link against every value of its effective targets
    fn evaluate_link(
        &self,
        tx: &mut Transaction,
        rule: &Rule,
        message: &mut RuleMessage,
    ) -> ChainStep {
        let next = if rule.is_chained() {
            ChainStep::MatchedContinue
        } else {
            ChainStep::MatchedTerminal
        };

        if rule.is_unconditional() {
            trace!(tx = %tx.id(), rule_id = rule.id(), "Rule without targets, matching once");
            let result = rule.operator().evaluate(tx, rule, "");
            if !result.matched {
                tx.clean_matched_vars();
                return ChainStep::Failed;
            }
            self.run_independent(tx, rule, message);
            return next;
        }

        let (exclusion, addition) = self.exceptions.variables_for(rule, tx);
        let targets = self.effective_targets(tx, rule, &exclusion, &addition);

        let mut any_match = false;
        for variable in targets {
            let mut values = ValueList::new();
            variable.evaluate(tx, rule, &mut values);

            for value in values {
                if exclusion.contains_value(&value)
                    || tx
                        .overrides()
                        .is_target_removed(rule, value.key_with_collection())
                {
                    trace!(
                        tx = %tx.id(),
                        rule_id = rule.id(),
                        target = value.key_with_collection(),
                        "Target excluded"
                    );
                    continue;
                }

                for (transformed, reference) in
                    rule.transforms().execute(value.value(), rule.multi_match())
                {
                    trace!(
                        tx = %tx.id(),
                        rule_id = rule.id(),
                        target = value.key_with_collection(),
                        value = %transformed,
                        "Testing operator"
                    );
                    let result = rule.operator().evaluate(tx, rule, &transformed);
                    if !result.matched {
                        continue;
                    }
                    any_match = true;
                    self.record_match(tx, rule, &value, transformed, &reference, result, message);
                }
            }
        }

        if !any_match {
            tx.clean_matched_vars();
            return ChainStep::Failed;
        }
        next
    }

    /// Configured targets minus exclusions and removed targets, plus
    /// additions
    fn effective_targets<'a>(
        &self,
        tx: &Transaction,
        rule: &'a Rule,
        exclusion: &VariableSet<'a>,
        addition: &VariableSet<'a>,
    ) -> Vec<&'a dyn Variable> {
        let mut targets: Vec<&'a dyn Variable> = rule
            .variables()
            .iter()
            .map(|v| v.as_ref())
            .filter(|v| {
                let kept = !exclusion.contains(*v)
                    && !tx.overrides().is_target_removed(rule, v.full_name());
                if !kept {
                    trace!(
                        tx = %tx.id(),
                        rule_id = rule.id(),
                        variable = v.full_name(),
                        "Variable excluded"
                    );
                }
                kept
            })
            .collect();
        targets.extend(addition.iter());
        targets
    }

    #[allow(clippy::too_many_arguments)]
    fn record_match(
        &self,
        tx: &mut Transaction,
        rule: &Rule,
        value: &VariableValue,
        transformed: String,
        reference: &str,
        result: OperatorResult,
        message: &mut RuleMessage,
    ) {
        let key = value.key_with_collection();
        message.match_message = rule.operator().match_message(key, value.value());
        for origin in value.origins() {
            message.push_reference(&origin.to_string());
        }
        if let Some((offset, len)) = result.span {
            message.push_reference(&format!("o{offset},{len}"));
        }
        message.push_reference(reference);
        message.matched_key = key.to_string();

        if rule.capture() {
            for (index, captured) in result.captures.iter().enumerate() {
                tx.tx().store_or_update_first(&index.to_string(), captured);
            }
        }

        let offset = value.origins().first().map_or(0, |o| o.offset);
        tx.update_matched_vars(key, &transformed, offset);
        message.matched_value = transformed;

        if let Some(msg) = rule.message(tx) {
            message.message = msg;
        }
        debug!(
            tx = %tx.id(),
            rule_id = rule.id(),
            target = key,
            operator = rule.operator().name(),
            "Rule matched"
        );

        self.run_independent(tx, rule, message);

        let mut entry = message.clone();
        entry.is_final = false;
        self.logger.log(&entry);
    }

    fn run_independent(&self, tx: &mut Transaction, rule: &Rule, message: &mut RuleMessage) {
        for action in rule.actions(ActionStage::IndependentOfChain) {
            action.execute(tx, rule, message);
        }
    }

    /// Run the full-match and disruptive actions of every matched link,
    /// innermost first, then log the closing entry
    fn finish_chain(
        &self,
        tx: &mut Transaction,
        head: &Rule,
        matched: &[&Rule],
        mut message: RuleMessage,
    ) {
        if let Some(msg) = head.message(tx) {
            message.message = msg;
        }

        for link in matched.iter().rev() {
            for action in link.actions(ActionStage::AfterFullMatch) {
                action.execute(tx, link, &mut message);
            }
            for action in link.actions(ActionStage::Disruptive) {
                if self.mode.should_intervene() {
                    action.execute(tx, link, &mut message);
                } else {
                    debug!(
                        tx = %tx.id(),
                        rule_id = head.id(),
                        action = action.name(),
                        "Detection only, disruptive action not applied"
                    );
                }
            }
        }

        message.is_final = true;
        self.logger.log(&message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::collection::CollectionRegistry;
    use crate::modules::waf::config::{MatchLogConfig, RuleConfig};
    use crate::modules::waf::logging::MatchLog;

    fn engine(mode: RuleEngineMode) -> (RuleEngine, Arc<MatchLog>) {
        let log = Arc::new(MatchLog::new(MatchLogConfig {
            forward_to_tracing: false,
            ..Default::default()
        }));
        (RuleEngine::new(mode).with_logger(log.clone()), log)
    }

    fn tx() -> Transaction {
        Transaction::new("t1", CollectionRegistry::new())
            .with_uri("/index.php?id=1+union+select&name=bob")
            .with_query_string("id=1+union+select&name=bob")
    }

    fn rule(variables: &[&str], operator: &str, actions: &[&str]) -> RuleConfig {
        RuleConfig {
            id: 100,
            variables: variables.iter().map(|v| v.to_string()).collect(),
            operator: operator.to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    fn compile(config: &RuleConfig) -> Rule {
        Rule::from_config(config).unwrap()
    }

    #[test]
    fn test_single_rule_match_and_intervention() {
        let (engine, log) = engine(RuleEngineMode::On);
        let rule = compile(&rule(
            &["ARGS"],
            "@rx union\\s+select",
            &["msg:'SQLi in %{MATCHED_VAR_NAME}'", "deny", "status:406"],
        ));
        let mut tx = tx();

        assert!(engine.evaluate(&mut tx, &rule));
        let intervention = tx.intervention().unwrap();
        assert_eq!(intervention.status, 406);
        assert_eq!(intervention.rule_id, 100);

        let finals = log.final_entries();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].message, "SQLi in ARGS:id");
        assert_eq!(finals[0].matched_key, "ARGS:id");
        assert!(finals[0].disruptive);
        assert!(finals[0].reference.contains("o2,12"));
        assert_eq!(log.count(), 2);
    }

    #[test]
    fn test_no_match_cleans_matched_vars() {
        let (engine, log) = engine(RuleEngineMode::On);
        let mut tx = tx();
        tx.update_matched_vars("ARGS:old", "stale", 0);

        let rule = compile(&rule(&["ARGS"], "@rx nothing-here", &["deny"]));
        assert!(!engine.evaluate(&mut tx, &rule));
        assert!(tx.intervention().is_none());
        assert!(tx.matched_vars_names().is_empty());
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn test_chain_conjunction() {
        let (engine, log) = engine(RuleEngineMode::On);

        let mut head = rule(&["ARGS:id"], "@contains union", &["deny", "setvar:tx.head=1"]);
        head.chain = Some(Box::new(rule(&["ARGS:name"], "@streq alice", &[])));
        let failing = compile(&head);
        let mut tx1 = tx();
        assert!(!engine.evaluate(&mut tx1, &failing));
        assert!(tx1.intervention().is_none());
        // independent actions of the first link ran anyway
        assert_eq!(tx1.tx().resolve_first("head").as_deref(), Some("1"));
        assert!(log.final_entries().is_empty());

        head.chain = Some(Box::new(rule(&["ARGS:name"], "@streq bob", &[])));
        let passing = compile(&head);
        let mut tx2 = tx();
        assert!(engine.evaluate(&mut tx2, &passing));
        assert!(tx2.intervention().is_some());
        assert_eq!(log.final_entries().len(), 1);
    }

    #[test]
    fn test_missing_successor_is_no_match() {
        let (engine, _) = engine(RuleEngineMode::On);
        let rule = compile(&rule(&["ARGS"], "@contains union", &["chain", "deny"]));
        let mut tx = tx();
        assert!(!engine.evaluate(&mut tx, &rule));
        assert!(tx.intervention().is_none());
    }

    #[test]
    fn test_removed_rule_is_vacuously_true() {
        let (engine, log) = engine(RuleEngineMode::On);
        let rule = compile(&rule(&["ARGS"], "@streq never", &["deny"]));
        let mut tx = tx();
        tx.overrides_mut().remove_rule_by_id_range(50, 150);

        assert!(engine.evaluate(&mut tx, &rule));
        assert!(tx.intervention().is_none());
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn test_target_removal_per_value() {
        let (engine, _) = engine(RuleEngineMode::On);
        let rule = compile(&rule(&["ARGS"], "@rx union", &[]));

        for (target, expected) in [("ARGS:id", false), ("ARGS", false), ("ARGS:name", true)] {
            let mut tx = tx();
            tx.overrides_mut().remove_target_by_id(100, target);
            assert_eq!(engine.evaluate(&mut tx, &rule), expected, "{target}");
        }
    }

    #[test]
    fn test_detection_only_does_not_intervene() {
        let (engine, log) = engine(RuleEngineMode::DetectionOnly);
        let rule = compile(&rule(&["ARGS"], "@rx union", &["deny"]));
        let mut tx = tx();

        assert!(engine.evaluate(&mut tx, &rule));
        assert!(tx.intervention().is_none());
        assert_eq!(log.final_entries().len(), 1);
        assert!(!log.final_entries()[0].disruptive);
    }

    #[test]
    fn test_capture_and_independent_actions() {
        let (engine, _) = engine(RuleEngineMode::On);
        let rule = compile(&rule(
            &["ARGS:id"],
            "@rx (union)\\s+(select)",
            &["capture", "setvar:tx.found=%{TX.2}", "t:lowercase"],
        ));
        let mut tx = tx();

        assert!(engine.evaluate(&mut tx, &rule));
        assert_eq!(tx.tx().resolve_first("0").as_deref(), Some("union select"));
        assert_eq!(tx.tx().resolve_first("found").as_deref(), Some("select"));
    }

    #[test]
    fn test_unconditional_rule() {
        let (engine, log) = engine(RuleEngineMode::On);
        let rule = compile(&rule(&[], "@unconditionalMatch", &["setvar:tx.score=5"]));
        let mut tx = tx();

        assert!(engine.evaluate(&mut tx, &rule));
        assert_eq!(tx.tx().resolve_first("score").as_deref(), Some("5"));
        assert_eq!(log.final_entries().len(), 1);
    }

    #[test]
    fn test_off_mode_evaluates_nothing() {
        let (engine, _) = engine(RuleEngineMode::Off);
        let rule = compile(&rule(&[], "@unconditionalMatch", &["setvar:tx.score=5"]));
        let mut tx = tx();
        assert!(!engine.evaluate(&mut tx, &rule));
        assert!(tx.tx().resolve_first("score").is_none());
    }
}
