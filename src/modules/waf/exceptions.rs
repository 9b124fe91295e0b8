//! Rule target exceptions
//!
//! Loaded with the rule set, an exception selects rules by tag, message or
//! id and either removes (`!VAR`) or adds (`VAR`) targets of those rules.

use super::config::ExceptionConfig;
use super::error::{WafError, WafResult};
use super::rules::Rule;
use super::transaction::Transaction;
use super::variables::{parse_variable, Variable, VariableSet};
use tracing::warn;

type Targets = Vec<Box<dyn Variable>>;

/// Exception lists by tag, message and id
#[derive(Debug, Default)]
pub struct RuleExceptions {
    by_tag: Vec<(String, Targets)>,
    by_msg: Vec<(String, Targets)>,
    by_id: Vec<(i64, Targets)>,
}

fn parse_targets(targets: &[String]) -> WafResult<Targets> {
    if targets.is_empty() {
        return Err(WafError::InvalidConfig(
            "exception without targets".to_string(),
        ));
    }
    targets.iter().map(|t| parse_variable(t)).collect()
}

impl RuleExceptions {
    /// Create empty lists
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every exception; rejected ones are returned as errors
    pub fn from_config(configs: &[ExceptionConfig]) -> (Self, Vec<WafError>) {
        let mut exceptions = Self::new();
        let mut errors = Vec::new();

        for config in configs {
            if let Err(e) = exceptions.add(config) {
                warn!(error = %e, "Exception rejected");
                errors.push(e);
            }
        }
        (exceptions, errors)
    }

    /// Compile and add one exception
    pub fn add(&mut self, config: &ExceptionConfig) -> WafResult<()> {
        if config.selector_count() != 1 {
            return Err(WafError::InvalidConfig(format!(
                "exception needs exactly one of tag, msg or id, got {}",
                config.selector_count()
            )));
        }

        let targets = parse_targets(&config.targets)?;
        match (&config.tag, &config.msg, config.id) {
            (Some(tag), _, _) => self.by_tag.push((tag.clone(), targets)),
            (_, Some(msg), _) => self.by_msg.push((msg.clone(), targets)),
            (_, _, Some(id)) => self.by_id.push((id, targets)),
            _ => {},
        }
        Ok(())
    }

    /// Add targets for rules carrying `tag`
    pub fn add_by_tag(&mut self, tag: impl Into<String>, targets: &[String]) -> WafResult<()> {
        self.by_tag.push((tag.into(), parse_targets(targets)?));
        Ok(())
    }

    /// Add targets for rules whose expanded message equals `msg`
    pub fn add_by_msg(&mut self, msg: impl Into<String>, targets: &[String]) -> WafResult<()> {
        self.by_msg.push((msg.into(), parse_targets(targets)?));
        Ok(())
    }

    /// Add targets for the rule with `id`
    pub fn add_by_id(&mut self, id: i64, targets: &[String]) -> WafResult<()> {
        self.by_id.push((id, parse_targets(targets)?));
        Ok(())
    }

    /// Exclusion and addition sets that apply to `rule`.
    ///
    /// A `!VAR` target contributes its base variable to the exclusion set.
    pub fn variables_for<'a>(
        &'a self,
        rule: &Rule,
        tx: &Transaction,
    ) -> (VariableSet<'a>, VariableSet<'a>) {
        let mut exclusion = VariableSet::new();
        let mut addition = VariableSet::new();
        if self.is_empty() {
            return (exclusion, addition);
        }

        let message = rule.message(tx);
        let tagged = self
            .by_tag
            .iter()
            .filter(|(tag, _)| rule.has_tag(tag))
            .map(|(_, targets)| targets);
        let by_msg = self
            .by_msg
            .iter()
            .filter(|(msg, _)| message.as_deref() == Some(msg.as_str()))
            .map(|(_, targets)| targets);
        let by_id = self
            .by_id
            .iter()
            .filter(|(id, _)| *id == rule.id())
            .map(|(_, targets)| targets);

        for variable in tagged.chain(by_msg).chain(by_id).flatten() {
            match variable.exclusion_base() {
                Some(base) => exclusion.push(base),
                None => addition.push(variable.as_ref()),
            }
        }
        (exclusion, addition)
    }

    /// Number of exceptions
    pub fn len(&self) -> usize {
        self.by_tag.len() + self.by_msg.len() + self.by_id.len()
    }

    /// Whether no exception is loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::collection::CollectionRegistry;

    fn tx() -> Transaction {
        Transaction::new("t", CollectionRegistry::new())
    }

    fn targets(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_selectors() {
        let mut exceptions = RuleExceptions::new();
        exceptions
            .add_by_tag("attack-sqli", &targets(&["!ARGS:id", "REQUEST_BODY"]))
            .unwrap();
        exceptions.add_by_msg("Bad thing", &targets(&["!ARGS"])).unwrap();
        exceptions.add_by_id(42, &targets(&["QUERY_STRING"])).unwrap();
        assert_eq!(exceptions.len(), 3);

        let tx = tx();
        let rule = Rule::for_test(42).with_tag("attack-sqli");
        let (exclusion, addition) = exceptions.variables_for(&rule, &tx);
        assert_eq!(exclusion.len(), 1);
        assert_eq!(exclusion.iter().next().unwrap().full_name(), "ARGS:id");
        assert_eq!(addition.len(), 2);

        let rule = Rule::for_test(7).with_msg("Bad thing");
        let (exclusion, addition) = exceptions.variables_for(&rule, &tx);
        assert_eq!(exclusion.len(), 1);
        assert!(addition.is_empty());

        let rule = Rule::for_test(7).with_tag("attack");
        let (exclusion, addition) = exceptions.variables_for(&rule, &tx);
        assert!(exclusion.is_empty() && addition.is_empty());
    }

    #[test]
    fn test_from_config_rejects_bad_selectors() {
        let configs = vec![
            ExceptionConfig {
                tag: Some("a".to_string()),
                id: Some(1),
                targets: targets(&["ARGS"]),
                ..Default::default()
            },
            ExceptionConfig {
                targets: targets(&["ARGS"]),
                ..Default::default()
            },
            ExceptionConfig {
                id: Some(1),
                targets: targets(&["NOT_A_VARIABLE"]),
                ..Default::default()
            },
            ExceptionConfig {
                id: Some(1),
                targets: Vec::new(),
                ..Default::default()
            },
            ExceptionConfig {
                id: Some(1),
                targets: targets(&["!REQUEST_HEADERS:User-Agent"]),
                ..Default::default()
            },
        ];
        let (exceptions, errors) = RuleExceptions::from_config(&configs);
        assert_eq!(exceptions.len(), 1);
        assert_eq!(errors.len(), 4);
    }
}
