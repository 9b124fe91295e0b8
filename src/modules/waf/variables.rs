//! Variable references and their resolution
//!
//! A rule names its targets as `[!|&]NAME[:key|:/pattern/]`. Each reference
//! compiles into a [`Variable`] that turns transaction state into a fresh
//! [`ValueList`] owned by the caller.

use super::anchored::KeyNamesProxy;
use super::error::{WafError, WafResult};
use super::exclusions::KeyExclusions;
use super::rules::Rule;
use super::transaction::{SetSource, SingleSource, Transaction};
use super::value::{ValueList, VariableValue};
use chrono::{Datelike, Timelike};
use regex::{Regex, RegexBuilder};
use std::fmt;
use tracing::trace;

/// Shared collections that may be addressed once `initcol` bound them
pub const PERSISTENT_COLLECTIONS: [&str; 5] = ["GLOBAL", "IP", "SESSION", "USER", "RESOURCE"];

/// Something a rule can inspect.
pub trait Variable: Send + Sync + fmt::Debug {
    /// Variable name without key, e.g. `ARGS`
    fn name(&self) -> &str;

    /// Name including the key or pattern, e.g. `ARGS:id`
    fn full_name(&self) -> &str;

    /// Append the values this variable currently resolves to
    fn evaluate(&self, tx: &Transaction, rule: &Rule, out: &mut ValueList);

    /// For `!VAR` references, the variable being excluded
    fn exclusion_base(&self) -> Option<&dyn Variable> {
        None
    }

    /// Key pattern of `VAR:/pattern/` references
    fn key_pattern(&self) -> Option<&Regex> {
        None
    }

    /// Keys this variable omits, when it supports omitting keys
    fn key_exclusions_mut(&mut self) -> Option<&mut KeyExclusions> {
        None
    }
}

/// Which part of a multi-valued variable is selected
#[derive(Debug, Clone)]
pub enum Selector {
    /// Every key
    All,
    /// One key, compared case-insensitively
    Key(String),
    /// Keys matching a pattern
    Pattern(Regex),
}

impl Selector {
    fn parse(key: Option<&str>) -> WafResult<Self> {
        match key {
            None | Some("") => Ok(Self::All),
            Some(k) if k.len() > 1 && k.starts_with('/') && k.ends_with('/') => {
                let pattern = &k[1..k.len() - 1];
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map(Self::Pattern)
                    .map_err(|source| WafError::InvalidPattern {
                        pattern: pattern.to_string(),
                        source,
                    })
            },
            Some(k) => Ok(Self::Key(k.to_string())),
        }
    }

    fn pattern(&self) -> Option<&Regex> {
        match self {
            Self::Pattern(p) => Some(p),
            _ => None,
        }
    }

    fn add_to(&self, exclusions: &mut KeyExclusions) {
        match self {
            Self::All => {},
            Self::Key(k) => exclusions.add_key(k.clone()),
            Self::Pattern(p) => exclusions.add_pattern(p.clone()),
        }
    }
}

fn full_name(name: &str, key: Option<&str>) -> String {
    match key {
        Some(k) if !k.is_empty() => format!("{name}:{k}"),
        _ => name.to_string(),
    }
}

/// A multi-valued transaction variable (`ARGS`, `REQUEST_HEADERS`, ...)
#[derive(Debug)]
pub struct SetVariable {
    name: String,
    full_name: String,
    source: SetSource,
    selector: Selector,
    exclusions: KeyExclusions,
}

impl Variable for SetVariable {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn evaluate(&self, tx: &Transaction, _rule: &Rule, out: &mut ValueList) {
        let set = tx.anchored_set(self.source);
        match &self.selector {
            Selector::All => set.resolve(out, &self.exclusions),
            Selector::Key(key) => set.resolve_key(key, out),
            Selector::Pattern(pattern) => {
                set.resolve_regular_expression(pattern, out, &self.exclusions);
            },
        }
    }

    fn key_pattern(&self) -> Option<&Regex> {
        self.selector.pattern()
    }

    fn key_exclusions_mut(&mut self) -> Option<&mut KeyExclusions> {
        Some(&mut self.exclusions)
    }
}

/// Keys of a multi-valued variable exposed as values (`ARGS_NAMES`, ...)
#[derive(Debug)]
pub struct NamesVariable {
    name: String,
    full_name: String,
    source: Option<SetSource>,
    selector: Selector,
    exclusions: KeyExclusions,
}

impl Variable for NamesVariable {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn evaluate(&self, tx: &Transaction, _rule: &Rule, out: &mut ValueList) {
        let set = match self.source {
            Some(source) => tx.anchored_set(source),
            None => tx.matched_vars_names(),
        };
        let proxy = KeyNamesProxy::new(&self.name, set);
        match &self.selector {
            Selector::All => proxy.resolve(out, &self.exclusions),
            Selector::Key(key) => proxy.resolve_key(key, out),
            Selector::Pattern(pattern) => {
                proxy.resolve_regular_expression(pattern, out, &self.exclusions);
            },
        }
    }

    fn key_pattern(&self) -> Option<&Regex> {
        self.selector.pattern()
    }

    fn key_exclusions_mut(&mut self) -> Option<&mut KeyExclusions> {
        Some(&mut self.exclusions)
    }
}

/// A collection variable (`TX`, `IP`, ...)
#[derive(Debug)]
pub struct CollectionVariable {
    name: String,
    full_name: String,
    selector: Selector,
    exclusions: KeyExclusions,
}

impl Variable for CollectionVariable {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn evaluate(&self, tx: &Transaction, _rule: &Rule, out: &mut ValueList) {
        let Some(view) = tx.collection(&self.name) else {
            trace!(collection = %self.name, "collection not initialized");
            return;
        };
        match &self.selector {
            Selector::All => view.resolve_multi_matches("", out, &self.exclusions),
            Selector::Key(key) => view.resolve_multi_matches(key, out, &self.exclusions),
            Selector::Pattern(pattern) => {
                view.resolve_regular_expression(pattern, out, &self.exclusions);
            },
        }
    }

    fn key_pattern(&self) -> Option<&Regex> {
        self.selector.pattern()
    }

    fn key_exclusions_mut(&mut self) -> Option<&mut KeyExclusions> {
        Some(&mut self.exclusions)
    }
}

/// A single-valued transaction variable (`REQUEST_URI`, `MATCHED_VAR`, ...)
#[derive(Debug)]
pub struct SingleVariable {
    name: String,
    source: SingleSource,
}

impl Variable for SingleVariable {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, tx: &Transaction, _rule: &Rule, out: &mut ValueList) {
        tx.anchored(self.source).evaluate(out);
    }
}

/// `ENV`, read from the snapshot injected into the transaction
#[derive(Debug)]
pub struct EnvVariable {
    full_name: String,
    key: Option<String>,
    exclusions: KeyExclusions,
}

impl Variable for EnvVariable {
    fn name(&self) -> &str {
        "ENV"
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn evaluate(&self, tx: &Transaction, _rule: &Rule, out: &mut ValueList) {
        for (key, value) in tx.env() {
            if self.key.as_deref().is_some_and(|k| k != key) {
                continue;
            }
            if self.exclusions.to_omit(key) {
                trace!(key = %key, "excluding key from ENV");
                continue;
            }
            out.push(VariableValue::new("ENV", key.as_str(), value.as_str()));
        }
    }

    fn key_exclusions_mut(&mut self) -> Option<&mut KeyExclusions> {
        Some(&mut self.exclusions)
    }
}

/// Fields of the transaction timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    /// `TIME`, `HH:MM:SS`
    Time,
    /// `TIME_YEAR`
    Year,
    /// `TIME_MON`, `01`-`12`
    Month,
    /// `TIME_DAY`
    Day,
    /// `TIME_HOUR`
    Hour,
    /// `TIME_MIN`
    Minute,
    /// `TIME_SEC`
    Second,
    /// `TIME_WDAY`, 0 is Sunday
    Weekday,
    /// `TIME_EPOCH`
    Epoch,
}

/// `TIME*` variables, computed in UTC from the transaction timestamp
#[derive(Debug)]
pub struct TimeVariable {
    name: String,
    field: TimeField,
}

impl Variable for TimeVariable {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, tx: &Transaction, _rule: &Rule, out: &mut ValueList) {
        let ts = tx.timestamp();
        let value = match self.field {
            TimeField::Time => ts.format("%H:%M:%S").to_string(),
            TimeField::Year => ts.year().to_string(),
            TimeField::Month => format!("{:02}", ts.month()),
            TimeField::Day => format!("{:02}", ts.day()),
            TimeField::Hour => format!("{:02}", ts.hour()),
            TimeField::Minute => format!("{:02}", ts.minute()),
            TimeField::Second => format!("{:02}", ts.second()),
            TimeField::Weekday => ts.weekday().num_days_from_sunday().to_string(),
            TimeField::Epoch => ts.timestamp().to_string(),
        };
        out.push(VariableValue::keyless(self.name.as_str(), value));
    }
}

/// `RULE:field`, metadata of the rule being evaluated
#[derive(Debug)]
pub struct RuleVariable {
    full_name: String,
    key: Option<String>,
}

impl Variable for RuleVariable {
    fn name(&self) -> &str {
        "RULE"
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn evaluate(&self, _tx: &Transaction, rule: &Rule, out: &mut ValueList) {
        let fields = [
            ("id", Some(rule.id().to_string())),
            ("msg", rule.msg_text().map(str::to_string)),
            ("phase", Some(rule.phase().to_string())),
            ("rev", rule.rev().map(str::to_string)),
            ("ver", rule.ver().map(str::to_string)),
            ("severity", rule.severity().map(|s| s.level().to_string())),
            ("maturity", rule.maturity().map(|m| m.to_string())),
            ("accuracy", rule.accuracy().map(|a| a.to_string())),
        ];
        for (field, value) in fields {
            let Some(value) = value else { continue };
            if self.key.as_deref().is_some_and(|k| !k.eq_ignore_ascii_case(field)) {
                continue;
            }
            out.push(VariableValue::new("RULE", field, value));
        }
    }
}

/// `!VAR`: resolves to nothing, names the variable to exclude
#[derive(Debug)]
pub struct ExclusionVariable {
    full_name: String,
    base: Box<dyn Variable>,
}

impl Variable for ExclusionVariable {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn evaluate(&self, _tx: &Transaction, _rule: &Rule, _out: &mut ValueList) {}

    fn exclusion_base(&self) -> Option<&dyn Variable> {
        Some(self.base.as_ref())
    }
}

/// `&VAR`: one value holding the number of values `VAR` resolves to
#[derive(Debug)]
pub struct CountVariable {
    full_name: String,
    base: Box<dyn Variable>,
}

impl Variable for CountVariable {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn evaluate(&self, tx: &Transaction, rule: &Rule, out: &mut ValueList) {
        let mut counted = ValueList::new();
        self.base.evaluate(tx, rule, &mut counted);
        out.push(VariableValue::keyless(
            self.full_name.as_str(),
            counted.len().to_string(),
        ));
    }

    fn key_exclusions_mut(&mut self) -> Option<&mut KeyExclusions> {
        self.base.key_exclusions_mut()
    }
}

fn split_reference(reference: &str) -> (String, Option<&str>) {
    match reference.split_once(':') {
        Some((name, key)) => (name.trim().to_ascii_uppercase(), Some(key.trim())),
        None => (reference.trim().to_ascii_uppercase(), None),
    }
}

/// Compile one variable reference
pub fn parse_variable(reference: &str) -> WafResult<Box<dyn Variable>> {
    let reference = reference.trim();
    if let Some(rest) = reference.strip_prefix('!') {
        let base = parse_variable(rest)?;
        return Ok(Box::new(ExclusionVariable {
            full_name: base.full_name().to_string(),
            base,
        }));
    }
    if let Some(rest) = reference.strip_prefix('&') {
        let base = parse_variable(rest)?;
        return Ok(Box::new(CountVariable {
            full_name: format!("&{}", base.full_name()),
            base,
        }));
    }

    let (name, key) = split_reference(reference);
    if name.is_empty() {
        return Err(WafError::InvalidVariable(reference.to_string()));
    }
    let full = full_name(&name, key);

    let set_source = match name.as_str() {
        "ARGS" | "ARGS_NAMES" => Some(SetSource::Args),
        "ARGS_GET" | "ARGS_GET_NAMES" => Some(SetSource::ArgsGet),
        "REQUEST_HEADERS" | "REQUEST_HEADERS_NAMES" => Some(SetSource::RequestHeaders),
        "REQUEST_COOKIES" | "REQUEST_COOKIES_NAMES" => Some(SetSource::RequestCookies),
        "MATCHED_VARS" => Some(SetSource::MatchedVars),
        _ => None,
    };

    if name == "MATCHED_VARS_NAMES" || (name.ends_with("_NAMES") && set_source.is_some()) {
        return Ok(Box::new(NamesVariable {
            source: set_source,
            full_name: full,
            selector: Selector::parse(key)?,
            exclusions: KeyExclusions::new(),
            name,
        }));
    }
    if let Some(source) = set_source {
        return Ok(Box::new(SetVariable {
            source,
            full_name: full,
            selector: Selector::parse(key)?,
            exclusions: KeyExclusions::new(),
            name,
        }));
    }
    if name == "TX" || PERSISTENT_COLLECTIONS.contains(&name.as_str()) {
        return Ok(Box::new(CollectionVariable {
            full_name: full,
            selector: Selector::parse(key)?,
            exclusions: KeyExclusions::new(),
            name,
        }));
    }

    let keyed = key.is_some_and(|k| !k.is_empty());
    let single = match name.as_str() {
        "REQUEST_URI" => Some(SingleSource::RequestUri),
        "REQUEST_METHOD" => Some(SingleSource::RequestMethod),
        "QUERY_STRING" => Some(SingleSource::QueryString),
        "REQUEST_BODY" => Some(SingleSource::RequestBody),
        "REMOTE_ADDR" => Some(SingleSource::RemoteAddr),
        "MATCHED_VAR" => Some(SingleSource::MatchedVar),
        "MATCHED_VAR_NAME" => Some(SingleSource::MatchedVarName),
        _ => None,
    };
    let time = match name.as_str() {
        "TIME" => Some(TimeField::Time),
        "TIME_YEAR" => Some(TimeField::Year),
        "TIME_MON" => Some(TimeField::Month),
        "TIME_DAY" => Some(TimeField::Day),
        "TIME_HOUR" => Some(TimeField::Hour),
        "TIME_MIN" => Some(TimeField::Minute),
        "TIME_SEC" => Some(TimeField::Second),
        "TIME_WDAY" => Some(TimeField::Weekday),
        "TIME_EPOCH" => Some(TimeField::Epoch),
        _ => None,
    };

    match (single, time, name.as_str()) {
        (Some(source), _, _) if !keyed => Ok(Box::new(SingleVariable { name, source })),
        (_, Some(field), _) if !keyed => Ok(Box::new(TimeVariable { name, field })),
        (_, _, "ENV") => Ok(Box::new(EnvVariable {
            full_name: full,
            key: key.filter(|k| !k.is_empty()).map(str::to_string),
            exclusions: KeyExclusions::new(),
        })),
        (_, _, "RULE") => Ok(Box::new(RuleVariable {
            full_name: full,
            key: key.filter(|k| !k.is_empty()).map(str::to_string),
        })),
        _ => Err(WafError::InvalidVariable(reference.to_string())),
    }
}

/// Compile the target list of a rule.
///
/// `!VAR:key` entries are folded into the key exclusions of every other
/// `VAR` entry and dropped; a bare `!VAR` removes `VAR` from the list.
pub fn parse_variable_list(references: &[String]) -> WafResult<Vec<Box<dyn Variable>>> {
    let mut variables = Vec::with_capacity(references.len());
    let mut exclusions: Vec<(String, Selector)> = Vec::new();

    for reference in references {
        let trimmed = reference.trim();
        match trimmed.strip_prefix('!') {
            Some(rest) => {
                // validate the reference even though it is not kept
                parse_variable(trimmed)?;
                let (name, key) = split_reference(rest);
                exclusions.push((name, Selector::parse(key)?));
            },
            None => variables.push(parse_variable(trimmed)?),
        }
    }

    for (name, selector) in &exclusions {
        if matches!(selector, Selector::All) {
            variables.retain(|v| !v.name().eq_ignore_ascii_case(name));
            continue;
        }
        for variable in variables
            .iter_mut()
            .filter(|v| v.name().eq_ignore_ascii_case(name))
        {
            if let Some(keys) = variable.key_exclusions_mut() {
                selector.add_to(keys);
            }
        }
    }

    Ok(variables)
}

/// A borrowed set of variables, compared by full name.
#[derive(Debug, Default)]
pub struct VariableSet<'a> {
    variables: Vec<&'a dyn Variable>,
}

impl<'a> VariableSet<'a> {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
        }
    }

    /// Add a variable
    pub fn push(&mut self, variable: &'a dyn Variable) {
        self.variables.push(variable);
    }

    /// Whether a variable with the same full name is present
    pub fn contains(&self, variable: &dyn Variable) -> bool {
        self.variables
            .iter()
            .any(|v| v.full_name().eq_ignore_ascii_case(variable.full_name()))
    }

    /// Whether `value` was produced by one of the variables.
    ///
    /// Pattern variables match on the value's key; the others compare their
    /// full name with `COLLECTION:key`.
    pub fn contains_value(&self, value: &VariableValue) -> bool {
        self.variables.iter().any(|v| match v.key_pattern() {
            Some(pattern) => {
                v.name().eq_ignore_ascii_case(value.collection()) && pattern.is_match(value.key())
            },
            None => v
                .full_name()
                .eq_ignore_ascii_case(value.key_with_collection()),
        })
    }

    /// Iterate over the variables
    pub fn iter(&self) -> impl Iterator<Item = &'a dyn Variable> + '_ {
        self.variables.iter().copied()
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[derive(Debug)]
enum Segment {
    Literal(String),
    Variable(Box<dyn Variable>),
}

/// Text with `%{VARIABLE}` / `%{COLLECTION.key}` references expanded at
/// request time.
#[derive(Debug)]
pub struct MacroString {
    raw: String,
    segments: Vec<Segment>,
}

impl MacroString {
    /// Compile `text`; an unterminated `%{` is kept literally
    pub fn parse(text: &str) -> WafResult<Self> {
        let mut segments = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find("%{") {
            let Some(len) = rest[start + 2..].find('}') else {
                break;
            };
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let reference = rest[start + 2..start + 2 + len].replacen('.', ":", 1);
            segments.push(Segment::Variable(parse_variable(&reference)?));
            rest = &rest[start + 3 + len..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            raw: text.to_string(),
            segments,
        })
    }

    /// Text as written
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether any `%{...}` reference is present
    pub fn contains_macro(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Variable(_)))
    }

    /// Expand every reference to its first value, or to nothing
    pub fn expand(&self, tx: &Transaction, rule: &Rule) -> String {
        let mut expanded = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => expanded.push_str(text),
                Segment::Variable(variable) => {
                    let mut values = ValueList::new();
                    variable.evaluate(tx, rule, &mut values);
                    if let Some(value) = values.first() {
                        expanded.push_str(value.value());
                    }
                },
            }
        }
        expanded
    }
}
