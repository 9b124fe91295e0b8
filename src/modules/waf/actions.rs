//! Rule actions
//!
//! Metadata actions (`id`, `msg`, `t:`, ...) become [`RuleAttribute`]s and
//! are folded into the rule at load time. Everything else becomes an
//! [`Action`] the engine runs at one of three [`ActionStage`]s.

use super::config::RuleSeverity;
use super::error::{WafError, WafResult};
use super::logging::RuleMessage;
use super::operators::parse_leading_int;
use super::rules::Rule;
use super::transaction::{Intervention, Transaction};
use super::transforms::Transform;
use super::variables::{MacroString, PERSISTENT_COLLECTIONS};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Default status of `deny`, `drop` and `block`
pub const DEFAULT_DENY_STATUS: u16 = 403;

/// Default status of `redirect`
pub const DEFAULT_REDIRECT_STATUS: u16 = 302;

/// When an action runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStage {
    /// On every value that matched, whatever the chain's outcome
    IndependentOfChain,
    /// Once the whole chain matched
    AfterFullMatch,
    /// Once the whole chain matched, and only when the engine intervenes
    Disruptive,
}

/// A runtime action
pub trait Action: Send + Sync + fmt::Debug {
    /// Name as written in rules
    fn name(&self) -> &'static str;

    /// When the action runs
    fn stage(&self) -> ActionStage;

    /// Run the action
    fn execute(&self, tx: &mut Transaction, rule: &Rule, message: &mut RuleMessage);
}

/// Metadata folded into the rule at load time
#[derive(Debug, Clone, PartialEq)]
pub enum RuleAttribute {
    /// `id`
    Id(i64),
    /// `msg`
    Msg(String),
    /// `tag`
    Tag(String),
    /// `severity`
    Severity(RuleSeverity),
    /// `phase`
    Phase(u8),
    /// `ver`
    Ver(String),
    /// `rev`
    Rev(String),
    /// `maturity`
    Maturity(u8),
    /// `accuracy`
    Accuracy(u8),
    /// `chain`
    Chain,
    /// `multiMatch`
    MultiMatch,
    /// `capture`
    Capture,
    /// `t:name`
    Transform(Transform),
}

/// Result of parsing one action entry
#[derive(Debug)]
pub enum ParsedAction {
    /// Rule metadata
    Attribute(RuleAttribute),
    /// Runtime action
    Action(Box<dyn Action>),
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> WafResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| WafError::invalid_parameter(name, value, "expected a number"))
}

fn parse_phase(value: &str) -> WafResult<u8> {
    let phase = match value.trim().to_ascii_lowercase().as_str() {
        "request" => 2,
        "response" => 4,
        "logging" => 5,
        other => parse_number("phase", other)?,
    };
    if !(1..=5).contains(&phase) {
        return Err(WafError::invalid_parameter(
            "phase",
            value,
            "expected a phase between 1 and 5",
        ));
    }
    Ok(phase)
}

/// Parse `name[:value]`; single quotes around the value are stripped
pub fn parse_action(text: &str) -> WafResult<ParsedAction> {
    let text = text.trim();
    let (name, value) = match text.split_once(':') {
        Some((name, value)) => (name.trim(), value.trim()),
        None => (text, ""),
    };
    let value = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value);

    use ParsedAction::{Action as Act, Attribute as Attr};
    let parsed = match name.to_ascii_lowercase().as_str() {
        "id" => Attr(RuleAttribute::Id(parse_number("id", value)?)),
        "msg" => Attr(RuleAttribute::Msg(value.to_string())),
        "tag" => Attr(RuleAttribute::Tag(value.to_string())),
        "severity" => Attr(RuleAttribute::Severity(RuleSeverity::parse(value).ok_or_else(
            || WafError::invalid_parameter("severity", value, "unknown severity"),
        )?)),
        "phase" => Attr(RuleAttribute::Phase(parse_phase(value)?)),
        "ver" => Attr(RuleAttribute::Ver(value.to_string())),
        "rev" => Attr(RuleAttribute::Rev(value.to_string())),
        "maturity" => Attr(RuleAttribute::Maturity(parse_number("maturity", value)?)),
        "accuracy" => Attr(RuleAttribute::Accuracy(parse_number("accuracy", value)?)),
        "chain" => Attr(RuleAttribute::Chain),
        "multimatch" => Attr(RuleAttribute::MultiMatch),
        "capture" => Attr(RuleAttribute::Capture),
        "t" => Attr(RuleAttribute::Transform(Transform::parse(value)?)),
        "setvar" => Act(Box::new(SetVar::parse(value)?)),
        "logdata" => Act(Box::new(LogData(MacroString::parse(value)?))),
        "expirevar" => Act(Box::new(ExpireVar::parse(value)?)),
        "initcol" => Act(Box::new(InitCol::parse(value)?)),
        "setenv" => Act(Box::new(SetEnv(MacroString::parse(value)?))),
        "skip" => Act(Box::new(Skip(parse_number("skip", value)?))),
        "status" => Act(Box::new(Status(parse_number("status", value)?))),
        "ctl" => Act(Box::new(Ctl::parse(value)?)),
        "deny" => Act(Box::new(Disruptive::Deny)),
        "drop" => Act(Box::new(Disruptive::Drop)),
        "block" => Act(Box::new(Disruptive::Block)),
        "pass" => Act(Box::new(Disruptive::Pass)),
        "allow" => Act(Box::new(Disruptive::Allow)),
        "redirect" => Act(Box::new(Disruptive::Redirect(MacroString::parse(value)?))),
        _ => return Err(WafError::InvalidAction(text.to_string())),
    };
    Ok(parsed)
}

fn split_target(name: &str, target: &str) -> WafResult<(String, MacroString)> {
    let Some((collection, key)) = target.split_once('.') else {
        return Err(WafError::invalid_parameter(name, target, "expected collection.key"));
    };
    let collection = collection.trim().to_ascii_uppercase();
    if collection != "TX" && !PERSISTENT_COLLECTIONS.contains(&collection.as_str()) {
        return Err(WafError::invalid_parameter(name, target, "unknown collection"));
    }
    Ok((collection, MacroString::parse(key.trim())?))
}

#[derive(Debug)]
enum SetVarOp {
    Set(MacroString),
    SetToOne,
    Add(MacroString),
    Sub(MacroString),
    Delete,
}

/// `setvar:coll.key=value`, `=+n`, `=-n`, `setvar:!coll.key`
#[derive(Debug)]
pub struct SetVar {
    collection: String,
    key: MacroString,
    op: SetVarOp,
}

impl SetVar {
    /// Parse the action parameter
    pub fn parse(param: &str) -> WafResult<Self> {
        if let Some(target) = param.strip_prefix('!') {
            let (collection, key) = split_target("setvar", target)?;
            return Ok(Self {
                collection,
                key,
                op: SetVarOp::Delete,
            });
        }

        let (target, op) = match param.split_once('=') {
            Some((target, value)) => {
                let op = if let Some(n) = value.strip_prefix('+') {
                    SetVarOp::Add(MacroString::parse(n)?)
                } else if let Some(n) = value.strip_prefix('-') {
                    SetVarOp::Sub(MacroString::parse(n)?)
                } else {
                    SetVarOp::Set(MacroString::parse(value)?)
                };
                (target, op)
            },
            None => (param, SetVarOp::SetToOne),
        };
        let (collection, key) = split_target("setvar", target)?;
        Ok(Self {
            collection,
            key,
            op,
        })
    }
}

impl Action for SetVar {
    fn name(&self) -> &'static str {
        "setvar"
    }

    fn stage(&self) -> ActionStage {
        ActionStage::IndependentOfChain
    }

    fn execute(&self, tx: &mut Transaction, rule: &Rule, _message: &mut RuleMessage) {
        let key = self.key.expand(tx, rule);
        let Some(view) = tx.collection(&self.collection) else {
            warn!(
                rule_id = rule.id(),
                collection = %self.collection,
                "setvar on uninitialized collection"
            );
            return;
        };

        match &self.op {
            SetVarOp::Set(value) => {
                view.store_or_update_first(&key, &value.expand(tx, rule));
            },
            SetVarOp::SetToOne => {
                view.store_or_update_first(&key, "1");
            },
            SetVarOp::Delete => view.del(&key),
            SetVarOp::Add(delta) | SetVarOp::Sub(delta) => {
                let current = view.resolve_first(&key).map_or(0, |v| parse_leading_int(&v));
                let delta = parse_leading_int(&delta.expand(tx, rule));
                let updated = if matches!(self.op, SetVarOp::Add(_)) {
                    current.saturating_add(delta)
                } else {
                    current.saturating_sub(delta)
                };
                view.store_or_update_first(&key, &updated.to_string());
            },
        }
        debug!(rule_id = rule.id(), collection = %self.collection, key = %key, "setvar");
    }
}

/// `logdata:text`, expanded into the match record
#[derive(Debug)]
pub struct LogData(MacroString);

impl Action for LogData {
    fn name(&self) -> &'static str {
        "logdata"
    }

    fn stage(&self) -> ActionStage {
        ActionStage::IndependentOfChain
    }

    fn execute(&self, tx: &mut Transaction, rule: &Rule, message: &mut RuleMessage) {
        message.data = self.0.expand(tx, rule);
    }
}

/// `expirevar:coll.key=seconds`
#[derive(Debug)]
pub struct ExpireVar {
    collection: String,
    key: MacroString,
    ttl: MacroString,
}

impl ExpireVar {
    /// Parse the action parameter
    pub fn parse(param: &str) -> WafResult<Self> {
        let Some((target, ttl)) = param.split_once('=') else {
            return Err(WafError::invalid_parameter(
                "expirevar",
                param,
                "expected coll.key=seconds",
            ));
        };
        let ttl = MacroString::parse(ttl.trim())?;
        if !ttl.contains_macro() {
            parse_number::<u64>("expirevar", ttl.raw())?;
        }
        let (collection, key) = split_target("expirevar", target)?;
        Ok(Self {
            collection,
            key,
            ttl,
        })
    }
}

impl Action for ExpireVar {
    fn name(&self) -> &'static str {
        "expirevar"
    }

    fn stage(&self) -> ActionStage {
        ActionStage::AfterFullMatch
    }

    fn execute(&self, tx: &mut Transaction, rule: &Rule, _message: &mut RuleMessage) {
        let key = self.key.expand(tx, rule);
        let seconds = parse_leading_int(&self.ttl.expand(tx, rule)).max(0).unsigned_abs();
        match tx.collection(&self.collection) {
            Some(view) => view.set_expiry(&key, Duration::from_secs(seconds)),
            None => {
                warn!(
                    rule_id = rule.id(),
                    collection = %self.collection,
                    "expirevar on uninitialized collection"
                );
            },
        }
    }
}

/// `initcol:coll=key`
#[derive(Debug)]
pub struct InitCol {
    collection: String,
    key: MacroString,
}

impl InitCol {
    /// Parse the action parameter
    pub fn parse(param: &str) -> WafResult<Self> {
        let Some((collection, key)) = param.split_once('=') else {
            return Err(WafError::invalid_parameter("initcol", param, "expected collection=key"));
        };
        let collection = collection.trim().to_ascii_uppercase();
        if !PERSISTENT_COLLECTIONS.contains(&collection.as_str()) {
            return Err(WafError::invalid_parameter("initcol", param, "unknown collection"));
        }
        Ok(Self {
            collection,
            key: MacroString::parse(key.trim())?,
        })
    }
}

impl Action for InitCol {
    fn name(&self) -> &'static str {
        "initcol"
    }

    fn stage(&self) -> ActionStage {
        ActionStage::AfterFullMatch
    }

    fn execute(&self, tx: &mut Transaction, rule: &Rule, _message: &mut RuleMessage) {
        let key = self.key.expand(tx, rule);
        tx.init_collection(&self.collection, &key);
    }
}

/// `setenv:name=value`; the whole parameter is expanded before splitting
#[derive(Debug)]
pub struct SetEnv(MacroString);

impl Action for SetEnv {
    fn name(&self) -> &'static str {
        "setenv"
    }

    fn stage(&self) -> ActionStage {
        ActionStage::AfterFullMatch
    }

    fn execute(&self, tx: &mut Transaction, rule: &Rule, _message: &mut RuleMessage) {
        let expanded = self.0.expand(tx, rule);
        match expanded.split_once('=') {
            Some((name, value)) => tx.set_env(name, value),
            None => warn!(rule_id = rule.id(), param = %expanded, "setenv without '='"),
        }
    }
}

/// `skip:n`
#[derive(Debug)]
pub struct Skip(usize);

impl Action for Skip {
    fn name(&self) -> &'static str {
        "skip"
    }

    fn stage(&self) -> ActionStage {
        ActionStage::AfterFullMatch
    }

    fn execute(&self, tx: &mut Transaction, _rule: &Rule, _message: &mut RuleMessage) {
        tx.set_skip(self.0);
    }
}

/// `status:code`
#[derive(Debug)]
pub struct Status(u16);

impl Action for Status {
    fn name(&self) -> &'static str {
        "status"
    }

    fn stage(&self) -> ActionStage {
        ActionStage::AfterFullMatch
    }

    fn execute(&self, tx: &mut Transaction, _rule: &Rule, _message: &mut RuleMessage) {
        tx.set_status(self.0);
    }
}

#[derive(Debug)]
enum CtlOp {
    RemoveById(i64, i64),
    RemoveTargetById(i64, String),
    RemoveTargetByTag(String, String),
}

/// `ctl:ruleRemoveById=..`, `ctl:ruleRemoveTargetById=id;TARGET`,
/// `ctl:ruleRemoveTargetByTag=tag;TARGET`
#[derive(Debug)]
pub struct Ctl(CtlOp);

impl Ctl {
    /// Parse the action parameter
    pub fn parse(param: &str) -> WafResult<Self> {
        let Some((option, value)) = param.split_once('=') else {
            return Err(WafError::invalid_parameter("ctl", param, "expected option=value"));
        };
        let value = value.trim();
        let op = match option.trim().to_ascii_lowercase().as_str() {
            "ruleremovebyid" => match value.split_once('-') {
                Some((start, end)) => {
                    CtlOp::RemoveById(parse_number("ctl", start)?, parse_number("ctl", end)?)
                },
                None => {
                    let id = parse_number("ctl", value)?;
                    CtlOp::RemoveById(id, id)
                },
            },
            "ruleremovetargetbyid" => {
                let (id, target) = value.split_once(';').ok_or_else(|| {
                    WafError::invalid_parameter("ctl", value, "expected id;TARGET")
                })?;
                CtlOp::RemoveTargetById(parse_number("ctl", id)?, target.trim().to_string())
            },
            "ruleremovetargetbytag" => {
                let (tag, target) = value.split_once(';').ok_or_else(|| {
                    WafError::invalid_parameter("ctl", value, "expected tag;TARGET")
                })?;
                CtlOp::RemoveTargetByTag(tag.trim().to_string(), target.trim().to_string())
            },
            _ => return Err(WafError::invalid_parameter("ctl", param, "unsupported option")),
        };
        Ok(Self(op))
    }
}

impl Action for Ctl {
    fn name(&self) -> &'static str {
        "ctl"
    }

    fn stage(&self) -> ActionStage {
        ActionStage::AfterFullMatch
    }

    fn execute(&self, tx: &mut Transaction, _rule: &Rule, _message: &mut RuleMessage) {
        let overrides = tx.overrides_mut();
        match &self.0 {
            CtlOp::RemoveById(start, end) if start == end => overrides.remove_rule_by_id(*start),
            CtlOp::RemoveById(start, end) => overrides.remove_rule_by_id_range(*start, *end),
            CtlOp::RemoveTargetById(id, target) => {
                overrides.remove_target_by_id(*id, target.clone());
            },
            CtlOp::RemoveTargetByTag(tag, target) => {
                overrides.remove_target_by_tag(tag.clone(), target.clone());
            },
        }
    }
}

/// Disruptive actions
#[derive(Debug)]
pub enum Disruptive {
    /// Stop with an error status
    Deny,
    /// Close the connection
    Drop,
    /// Handled as `deny`
    Block,
    /// Keep going
    Pass,
    /// Stop evaluating rules for this transaction
    Allow,
    /// Redirect to a URL
    Redirect(MacroString),
}

impl Action for Disruptive {
    fn name(&self) -> &'static str {
        match self {
            Self::Deny => "deny",
            Self::Drop => "drop",
            Self::Block => "block",
            Self::Pass => "pass",
            Self::Allow => "allow",
            Self::Redirect(_) => "redirect",
        }
    }

    fn stage(&self) -> ActionStage {
        ActionStage::Disruptive
    }

    fn execute(&self, tx: &mut Transaction, rule: &Rule, message: &mut RuleMessage) {
        let (status, url) = match self {
            Self::Pass => return,
            Self::Allow => {
                message.disruptive = true;
                tx.allow();
                return;
            },
            Self::Deny | Self::Drop | Self::Block => {
                (tx.status().unwrap_or(DEFAULT_DENY_STATUS), None)
            },
            Self::Redirect(url) => {
                let status = tx
                    .status()
                    .filter(|s| matches!(s, 301 | 302 | 303 | 307))
                    .unwrap_or(DEFAULT_REDIRECT_STATUS);
                (status, Some(url.expand(tx, rule)))
            },
        };

        message.disruptive = true;
        tx.intervene(Intervention {
            rule_id: message.rule_id,
            action: self.name().to_string(),
            status,
            url,
            message: (!message.message.is_empty()).then(|| message.message.clone()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::collection::{CollectionConfig, CollectionRegistry};
    use std::sync::Arc;

    fn tx() -> Transaction {
        Transaction::new("t", CollectionRegistry::from_config(&CollectionConfig::default()))
    }

    fn run(action: &str, tx: &mut Transaction) -> RuleMessage {
        let rule = Rule::for_test(7);
        let mut message = RuleMessage::new(tx, &rule);
        match parse_action(action).unwrap() {
            ParsedAction::Action(action) => action.execute(tx, &rule, &mut message),
            ParsedAction::Attribute(attr) => panic!("unexpected attribute {attr:?}"),
        }
        message
    }

    fn tx_value(tx: &Transaction, key: &str) -> Option<String> {
        tx.collection("TX").and_then(|v| v.resolve_first(key))
    }

    #[test]
    fn test_parse_attributes() {
        let attr = |s: &str| match parse_action(s).unwrap() {
            ParsedAction::Attribute(a) => a,
            ParsedAction::Action(a) => panic!("unexpected action {}", a.name()),
        };
        assert_eq!(attr("id:942100"), RuleAttribute::Id(942100));
        assert_eq!(attr("msg:'SQL Injection'"), RuleAttribute::Msg("SQL Injection".to_string()));
        assert_eq!(attr("phase:request"), RuleAttribute::Phase(2));
        assert_eq!(attr("severity:CRITICAL"), RuleAttribute::Severity(RuleSeverity::Critical));
        assert_eq!(attr("t:lowercase"), RuleAttribute::Transform(Transform::Lowercase));
        assert_eq!(attr("multiMatch"), RuleAttribute::MultiMatch);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_action("maturity:abc"), Err(WafError::InvalidParameter { .. })));
        assert!(matches!(parse_action("phase:9"), Err(WafError::InvalidParameter { .. })));
        assert!(matches!(parse_action("status:x"), Err(WafError::InvalidParameter { .. })));
        assert!(matches!(parse_action("setvar:nope.key=1"), Err(WafError::InvalidParameter { .. })));
        assert!(matches!(parse_action("frobnicate"), Err(WafError::InvalidAction(_))));
    }

    #[test]
    fn test_setvar_ops() {
        let mut tx = tx();
        run("setvar:tx.score=5", &mut tx);
        assert_eq!(tx_value(&tx, "score").as_deref(), Some("5"));

        run("setvar:tx.score=+3", &mut tx);
        assert_eq!(tx_value(&tx, "score").as_deref(), Some("8"));

        run("setvar:tx.score=-10", &mut tx);
        assert_eq!(tx_value(&tx, "score").as_deref(), Some("-2"));

        run("setvar:tx.flag", &mut tx);
        assert_eq!(tx_value(&tx, "flag").as_deref(), Some("1"));

        run("setvar:!tx.flag", &mut tx);
        assert!(tx_value(&tx, "flag").is_none());

        run("setvar:'tx.rule_%{RULE.id}=hit'", &mut tx);
        assert_eq!(tx_value(&tx, "rule_7").as_deref(), Some("hit"));
    }

    #[test]
    fn test_initcol_and_persistent_setvar() {
        let mut tx = tx().with_client_addr("10.0.0.1".parse().unwrap());
        run("setvar:ip.hits=+1", &mut tx);
        assert!(tx.collection("IP").is_none());

        run("initcol:ip=%{REMOTE_ADDR}", &mut tx);
        run("setvar:ip.hits=+1", &mut tx);
        run("setvar:ip.hits=+1", &mut tx);
        let ip = Arc::clone(tx.collections().get("ip").unwrap());
        assert_eq!(ip.resolve_first("10.0.0.1::hits").as_deref(), Some("2"));

        run("expirevar:ip.hits=0", &mut tx);
        assert!(ip.resolve_first("10.0.0.1::hits").is_none());
    }

    #[test]
    fn test_setenv_logdata_skip_status() {
        let mut tx = tx().with_uri("/a=b");
        run("setenv:path=%{REQUEST_URI}", &mut tx);
        assert_eq!(tx.env().get("path").map(String::as_str), Some("/a=b"));

        let message = run("logdata:'uri %{REQUEST_URI}'", &mut tx);
        assert_eq!(message.data, "uri /a=b");

        run("skip:2", &mut tx);
        assert_eq!(tx.skip(), 2);
        run("status:418", &mut tx);
        assert_eq!(tx.status(), Some(418));
    }

    #[test]
    fn test_ctl() {
        let mut tx = tx();
        run("ctl:ruleRemoveById=100-200", &mut tx);
        run("ctl:ruleRemoveTargetById=300;ARGS:token", &mut tx);
        assert!(tx.overrides().is_rule_removed(150));
        assert!(tx.overrides().is_target_removed(&Rule::for_test(300), "args:token"));
        assert!(!tx.overrides().is_target_removed(&Rule::for_test(301), "ARGS:token"));
    }

    #[test]
    fn test_disruptive() {
        let mut tx = tx();
        let message = run("deny", &mut tx);
        assert!(message.disruptive);
        let intervention = tx.intervention().unwrap();
        assert_eq!(intervention.status, DEFAULT_DENY_STATUS);
        assert_eq!(intervention.rule_id, 7);

        let mut tx = self::tx();
        run("status:200", &mut tx);
        run("redirect:'https://example.com/blocked'", &mut tx);
        let intervention = tx.intervention().unwrap();
        assert_eq!(intervention.status, DEFAULT_REDIRECT_STATUS);
        assert_eq!(intervention.url.as_deref(), Some("https://example.com/blocked"));

        let mut tx = self::tx();
        run("pass", &mut tx);
        assert!(tx.intervention().is_none());
        run("allow", &mut tx);
        assert!(tx.is_allowed());
    }
}
