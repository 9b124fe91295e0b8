//! Operators: the test a rule applies to each transformed value

use super::error::{WafError, WafResult};
use super::rules::Rule;
use super::transaction::Transaction;
use super::variables::MacroString;
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use tracing::trace;

/// Maximum number of value characters quoted in a match message
const MESSAGE_VALUE_LIMIT: usize = 200;

/// Outcome of one operator call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorResult {
    /// Whether the value matched
    pub matched: bool,
    /// `(offset, length)` of the matched bytes, when known
    pub span: Option<(usize, usize)>,
    /// Captured groups, `TX:0` first
    pub captures: Vec<String>,
}

impl OperatorResult {
    /// No match
    pub fn no_match() -> Self {
        Self::default()
    }

    /// Match without position information
    pub fn matched() -> Self {
        Self {
            matched: true,
            ..Self::default()
        }
    }

    /// Match at `offset` for `len` bytes
    pub fn matched_at(offset: usize, len: usize) -> Self {
        Self {
            matched: true,
            span: Some((offset, len)),
            captures: Vec::new(),
        }
    }

    /// Builder: attach captures
    #[must_use]
    pub fn with_captures(mut self, captures: Vec<String>) -> Self {
        self.captures = captures;
        self
    }
}

/// A value test.
///
/// Implementations must not mutate shared state; anything to be recorded is
/// returned in the [`OperatorResult`].
pub trait Operator: Send + Sync + fmt::Debug {
    /// Operator name as shown in match messages, e.g. `Rx`
    fn name(&self) -> &'static str;

    /// Parameter as written in the rule
    fn param(&self) -> &str;

    /// Test `input`
    fn evaluate(&self, tx: &Transaction, rule: &Rule, input: &str) -> OperatorResult;

    /// Evidence message for a match on `key`
    fn match_message(&self, key: &str, value: &str) -> String {
        let value: String = value.chars().take(MESSAGE_VALUE_LIMIT).collect();
        format!(
            "Matched \"Operator `{}' with parameter `{}' against variable `{}' (Value: `{}' )",
            self.name(),
            self.param(),
            key,
            value
        )
    }
}

/// An operator as configured on a rule, possibly negated
#[derive(Debug)]
pub struct RuleOperator {
    inner: Box<dyn Operator>,
    negated: bool,
}

impl RuleOperator {
    /// Wrap an operator
    pub fn new(inner: Box<dyn Operator>, negated: bool) -> Self {
        Self { inner, negated }
    }

    /// Parse `[!]@name param`; text without `@` is a regular expression
    pub fn parse(text: &str) -> WafResult<Self> {
        let text = text.trim();
        let (negated, text) = match text.strip_prefix('!') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, text),
        };

        let Some(text) = text.strip_prefix('@') else {
            return Ok(Self::new(Box::new(Rx::new(text)?), negated));
        };
        let (name, param) = match text.split_once(char::is_whitespace) {
            Some((name, param)) => (name, param.trim()),
            None => (text, ""),
        };

        let inner: Box<dyn Operator> = match name.to_ascii_lowercase().as_str() {
            "rx" => Box::new(Rx::new(param)?),
            "pm" => Box::new(Pm::new(param)?),
            "pmfromfile" | "pmf" => Box::new(Pm::from_file(param)?),
            "streq" => Box::new(StringMatch::new(StringMatchKind::StrEq, param)?),
            "contains" => Box::new(StringMatch::new(StringMatchKind::Contains, param)?),
            "beginswith" => Box::new(StringMatch::new(StringMatchKind::BeginsWith, param)?),
            "endswith" => Box::new(StringMatch::new(StringMatchKind::EndsWith, param)?),
            "within" => Box::new(StringMatch::new(StringMatchKind::Within, param)?),
            "eq" => Box::new(NumericCompare::new(NumericKind::Eq, param)?),
            "ge" => Box::new(NumericCompare::new(NumericKind::Ge, param)?),
            "gt" => Box::new(NumericCompare::new(NumericKind::Gt, param)?),
            "le" => Box::new(NumericCompare::new(NumericKind::Le, param)?),
            "lt" => Box::new(NumericCompare::new(NumericKind::Lt, param)?),
            "ipmatch" => Box::new(IpMatch::new(param)?),
            "ipmatchfromfile" | "ipmatchf" => Box::new(IpMatch::from_file(param)?),
            "verifycc" => Box::new(VerifyCc::new(param)?),
            "verifysvnr" => Box::new(VerifySvnr::new(param)?),
            "unconditionalmatch" => Box::new(Unconditional {
                matched: true,
                param: param.to_string(),
            }),
            "nomatch" => Box::new(Unconditional {
                matched: false,
                param: param.to_string(),
            }),
            _ => return Err(WafError::UnknownOperator(name.to_string())),
        };

        Ok(Self::new(inner, negated))
    }

    /// Operator name
    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    /// Operator parameter
    pub fn param(&self) -> &str {
        self.inner.param()
    }

    /// Whether the result is inverted
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Test `input`, applying negation
    pub fn evaluate(&self, tx: &Transaction, rule: &Rule, input: &str) -> OperatorResult {
        let result = self.inner.evaluate(tx, rule, input);
        if !self.negated {
            return result;
        }
        if result.matched {
            OperatorResult::no_match()
        } else {
            OperatorResult::matched()
        }
    }

    /// See [`Operator::match_message`]
    pub fn match_message(&self, key: &str, value: &str) -> String {
        self.inner.match_message(key, value)
    }
}

fn compile(pattern: &str) -> WafResult<Regex> {
    RegexBuilder::new(pattern)
        .dot_matches_new_line(true)
        .multi_line(true)
        .build()
        .map_err(|source| WafError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

fn read_lines(path: &str) -> WafResult<Vec<String>> {
    let content = fs::read_to_string(Path::new(path)).map_err(|source| {
        WafError::MissingResource {
            path: path.into(),
            source,
        }
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// `@rx`
#[derive(Debug)]
pub struct Rx {
    param: String,
    pattern: Regex,
}

impl Rx {
    /// Compile the pattern
    pub fn new(param: &str) -> WafResult<Self> {
        Ok(Self {
            param: param.to_string(),
            pattern: compile(param)?,
        })
    }
}

impl Operator for Rx {
    fn name(&self) -> &'static str {
        "Rx"
    }

    fn param(&self) -> &str {
        &self.param
    }

    fn evaluate(&self, _tx: &Transaction, rule: &Rule, input: &str) -> OperatorResult {
        if !rule.capture() {
            return match self.pattern.find(input) {
                Some(m) => OperatorResult::matched_at(m.start(), m.len()),
                None => OperatorResult::no_match(),
            };
        }

        let Some(caps) = self.pattern.captures(input) else {
            return OperatorResult::no_match();
        };
        let whole = caps.get(0).map_or((0, 0), |m| (m.start(), m.len()));
        let captures = (0..caps.len().min(10))
            .map(|i| caps.get(i).map_or_else(String::new, |m| m.as_str().to_string()))
            .collect();
        OperatorResult::matched_at(whole.0, whole.1).with_captures(captures)
    }
}

/// `@pm` / `@pmFromFile`, case-insensitive phrase match
#[derive(Debug)]
pub struct Pm {
    name: &'static str,
    param: String,
    phrases: Vec<String>,
}

impl Pm {
    /// Phrases separated by whitespace
    pub fn new(param: &str) -> WafResult<Self> {
        let phrases: Vec<String> = param.split_whitespace().map(str::to_ascii_lowercase).collect();
        if phrases.is_empty() {
            return Err(WafError::invalid_parameter("pm", param, "no phrases given"));
        }
        Ok(Self {
            name: "Pm",
            param: param.to_string(),
            phrases,
        })
    }

    /// One phrase per line; `#` starts a comment line
    pub fn from_file(path: &str) -> WafResult<Self> {
        let phrases: Vec<String> = read_lines(path)?
            .into_iter()
            .map(|p| p.to_ascii_lowercase())
            .collect();
        Ok(Self {
            name: "PmFromFile",
            param: path.to_string(),
            phrases,
        })
    }
}

impl Operator for Pm {
    fn name(&self) -> &'static str {
        self.name
    }

    fn param(&self) -> &str {
        &self.param
    }

    fn evaluate(&self, _tx: &Transaction, rule: &Rule, input: &str) -> OperatorResult {
        let haystack = input.to_ascii_lowercase();
        let found = self
            .phrases
            .iter()
            .filter_map(|p| haystack.find(p.as_str()).map(|at| (at, p.len())))
            .min_by_key(|(at, _)| *at);

        match found {
            Some((at, len)) => {
                let result = OperatorResult::matched_at(at, len);
                if rule.capture() {
                    result.with_captures(vec![input[at..at + len].to_string()])
                } else {
                    result
                }
            },
            None => OperatorResult::no_match(),
        }
    }
}

/// Kinds of string comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringMatchKind {
    /// `@streq`
    StrEq,
    /// `@contains`
    Contains,
    /// `@beginsWith`
    BeginsWith,
    /// `@endsWith`
    EndsWith,
    /// `@within`, the input is searched in the parameter
    Within,
}

/// String comparison operators; the parameter may contain macros
#[derive(Debug)]
pub struct StringMatch {
    kind: StringMatchKind,
    param: MacroString,
}

impl StringMatch {
    /// Compile the parameter
    pub fn new(kind: StringMatchKind, param: &str) -> WafResult<Self> {
        Ok(Self {
            kind,
            param: MacroString::parse(param)?,
        })
    }
}

impl Operator for StringMatch {
    fn name(&self) -> &'static str {
        match self.kind {
            StringMatchKind::StrEq => "StrEq",
            StringMatchKind::Contains => "Contains",
            StringMatchKind::BeginsWith => "BeginsWith",
            StringMatchKind::EndsWith => "EndsWith",
            StringMatchKind::Within => "Within",
        }
    }

    fn param(&self) -> &str {
        self.param.raw()
    }

    fn evaluate(&self, tx: &Transaction, rule: &Rule, input: &str) -> OperatorResult {
        let param = self.param.expand(tx, rule);
        let span = match self.kind {
            StringMatchKind::StrEq => (input == param).then_some((0, input.len())),
            StringMatchKind::Contains => input.find(param.as_str()).map(|at| (at, param.len())),
            StringMatchKind::BeginsWith => {
                input.starts_with(param.as_str()).then_some((0, param.len()))
            },
            StringMatchKind::EndsWith => input
                .ends_with(param.as_str())
                .then(|| (input.len() - param.len(), param.len())),
            StringMatchKind::Within => {
                if input.is_empty() {
                    None
                } else {
                    param.find(input).map(|_| (0, input.len()))
                }
            },
        };
        match span {
            Some((at, len)) => OperatorResult::matched_at(at, len),
            None => OperatorResult::no_match(),
        }
    }
}

/// Kinds of numeric comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    /// `@eq`
    Eq,
    /// `@ge`
    Ge,
    /// `@gt`
    Gt,
    /// `@le`
    Le,
    /// `@lt`
    Lt,
}

/// Parse the leading integer of `text` the way `atoi` does: optional
/// leading whitespace and sign, then digits; anything else yields 0.
pub fn parse_leading_int(text: &str) -> i64 {
    let text = text.trim_start();
    let (sign, digits) = match text.as_bytes().first() {
        Some(b'-') => (-1, &text[1..]),
        Some(b'+') => (1, &text[1..]),
        _ => (1, text),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end]
        .bytes()
        .fold(0i64, |acc, b| acc.saturating_mul(10).saturating_add(i64::from(b - b'0')))
        * sign
}

/// Numeric comparison of the input against the parameter
#[derive(Debug)]
pub struct NumericCompare {
    kind: NumericKind,
    param: MacroString,
    literal: Option<i64>,
}

impl NumericCompare {
    /// Compile the parameter; literal parameters must be integers
    pub fn new(kind: NumericKind, param: &str) -> WafResult<Self> {
        let param = MacroString::parse(param)?;
        let literal = if param.contains_macro() {
            None
        } else {
            let raw = param.raw().trim();
            Some(raw.parse::<i64>().map_err(|_| {
                WafError::invalid_parameter(kind_name(kind), raw, "expected an integer")
            })?)
        };
        Ok(Self {
            kind,
            param,
            literal,
        })
    }
}

fn kind_name(kind: NumericKind) -> &'static str {
    match kind {
        NumericKind::Eq => "Eq",
        NumericKind::Ge => "Ge",
        NumericKind::Gt => "Gt",
        NumericKind::Le => "Le",
        NumericKind::Lt => "Lt",
    }
}

impl Operator for NumericCompare {
    fn name(&self) -> &'static str {
        kind_name(self.kind)
    }

    fn param(&self) -> &str {
        self.param.raw()
    }

    fn evaluate(&self, tx: &Transaction, rule: &Rule, input: &str) -> OperatorResult {
        let expected = self
            .literal
            .unwrap_or_else(|| parse_leading_int(&self.param.expand(tx, rule)));
        let actual = parse_leading_int(input);
        let matched = match self.kind {
            NumericKind::Eq => actual == expected,
            NumericKind::Ge => actual >= expected,
            NumericKind::Gt => actual > expected,
            NumericKind::Le => actual <= expected,
            NumericKind::Lt => actual < expected,
        };
        if matched {
            OperatorResult::matched()
        } else {
            OperatorResult::no_match()
        }
    }
}

/// An address with a prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    /// Parse `addr` or `addr/prefix`
    pub fn parse(text: &str) -> Option<Self> {
        let (addr, prefix) = match text.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (text, None),
        };
        let addr: IpAddr = addr.trim().parse().ok()?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix {
            Some(p) => p.trim().parse::<u8>().ok().filter(|p| *p <= max)?,
            None => max,
        };
        Some(Self { addr, prefix_len })
    }

    /// Whether `ip` is inside the network
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (ip, self.addr) {
            (IpAddr::V4(ip), IpAddr::V4(net)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix_len))
                };
                (u32::from(ip) & mask) == (u32::from(net) & mask)
            },
            (IpAddr::V6(ip), IpAddr::V6(net)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix_len))
                };
                (u128::from(ip) & mask) == (u128::from(net) & mask)
            },
            _ => false,
        }
    }
}

/// `@ipMatch` / `@ipMatchFromFile`
#[derive(Debug)]
pub struct IpMatch {
    name: &'static str,
    param: String,
    networks: Vec<IpNetwork>,
}

impl IpMatch {
    /// Comma-separated addresses or networks
    pub fn new(param: &str) -> WafResult<Self> {
        let networks = param
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                IpNetwork::parse(s).ok_or_else(|| {
                    WafError::invalid_parameter("ipMatch", s.trim(), "not an address or network")
                })
            })
            .collect::<WafResult<Vec<_>>>()?;
        if networks.is_empty() {
            return Err(WafError::invalid_parameter("ipMatch", param, "no networks given"));
        }
        Ok(Self {
            name: "IpMatch",
            param: param.to_string(),
            networks,
        })
    }

    /// One address or network per line
    pub fn from_file(path: &str) -> WafResult<Self> {
        let networks = read_lines(path)?
            .iter()
            .map(|s| {
                IpNetwork::parse(s).ok_or_else(|| {
                    WafError::invalid_parameter("ipMatchFromFile", s.as_str(), "not a network")
                })
            })
            .collect::<WafResult<Vec<_>>>()?;
        Ok(Self {
            name: "IpMatchFromFile",
            param: path.to_string(),
            networks,
        })
    }
}

impl Operator for IpMatch {
    fn name(&self) -> &'static str {
        self.name
    }

    fn param(&self) -> &str {
        &self.param
    }

    fn evaluate(&self, _tx: &Transaction, _rule: &Rule, input: &str) -> OperatorResult {
        let Ok(ip) = input.trim().parse::<IpAddr>() else {
            trace!(input, "not an IP address");
            return OperatorResult::no_match();
        };
        if self.networks.iter().any(|n| n.contains(ip)) {
            OperatorResult::matched_at(0, input.len())
        } else {
            OperatorResult::no_match()
        }
    }
}

/// Luhn checksum over the digits of `candidate`
pub fn luhn_verify(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.is_empty() {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Swedish personal identity number check, on exactly ten digits
pub fn svnr_verify(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate
        .chars()
        .filter_map(|c| c.to_digit(10))
        .take(10)
        .collect();
    if digits.len() != 10 {
        return false;
    }
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }
    if digits == [0, 1, 2, 3, 4, 5, 6, 7, 8, 9] || digits == [1, 2, 3, 4, 5, 6, 7, 8, 9, 0] {
        return false;
    }

    let sum = digits[0] * 3
        + digits[1] * 7
        + digits[2] * 9
        + digits[4] * 5
        + digits[5] * 8
        + digits[6] * 4
        + digits[7] * 2
        + digits[8]
        + digits[9] * 6;
    let check = match sum % 11 {
        10 => 0,
        n => n,
    };
    check == digits[3]
}

/// Find the first candidate matching `pattern` at any start offset that
/// passes `verify`.
fn scan_candidates(
    pattern: &Regex,
    input: &str,
    rule: &Rule,
    verify: fn(&str) -> bool,
) -> OperatorResult {
    let mut offset = 0;
    while offset < input.len() {
        let Some(m) = pattern.find_at(input, offset) else {
            break;
        };
        if verify(m.as_str()) {
            trace!(offset = m.start(), "verified candidate");
            let result = OperatorResult::matched_at(m.start(), m.len());
            return if rule.capture() {
                result.with_captures(vec![m.as_str().to_string()])
            } else {
                result
            };
        }
        offset = input[m.start()..]
            .chars()
            .next()
            .map_or(input.len(), |c| m.start() + c.len_utf8());
    }
    OperatorResult::no_match()
}

/// `@verifyCC`
#[derive(Debug)]
pub struct VerifyCc {
    param: String,
    pattern: Regex,
}

impl VerifyCc {
    /// Compile the candidate pattern
    pub fn new(param: &str) -> WafResult<Self> {
        Ok(Self {
            param: param.to_string(),
            pattern: compile(param)?,
        })
    }
}

impl Operator for VerifyCc {
    fn name(&self) -> &'static str {
        "VerifyCC"
    }

    fn param(&self) -> &str {
        &self.param
    }

    fn evaluate(&self, _tx: &Transaction, rule: &Rule, input: &str) -> OperatorResult {
        scan_candidates(&self.pattern, input, rule, luhn_verify)
    }
}

/// `@verifySVNR`
#[derive(Debug)]
pub struct VerifySvnr {
    param: String,
    pattern: Regex,
}

impl VerifySvnr {
    /// Compile the candidate pattern
    pub fn new(param: &str) -> WafResult<Self> {
        Ok(Self {
            param: param.to_string(),
            pattern: compile(param)?,
        })
    }
}

impl Operator for VerifySvnr {
    fn name(&self) -> &'static str {
        "VerifySVNR"
    }

    fn param(&self) -> &str {
        &self.param
    }

    fn evaluate(&self, _tx: &Transaction, rule: &Rule, input: &str) -> OperatorResult {
        scan_candidates(&self.pattern, input, rule, svnr_verify)
    }
}

/// `@unconditionalMatch` / `@noMatch`
#[derive(Debug)]
pub struct Unconditional {
    matched: bool,
    param: String,
}

impl Operator for Unconditional {
    fn name(&self) -> &'static str {
        if self.matched {
            "UnconditionalMatch"
        } else {
            "NoMatch"
        }
    }

    fn param(&self) -> &str {
        &self.param
    }

    fn evaluate(&self, _tx: &Transaction, _rule: &Rule, _input: &str) -> OperatorResult {
        if self.matched {
            OperatorResult::matched()
        } else {
            OperatorResult::no_match()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::collection::{Collection, CollectionRegistry};
    use std::io::Write;

    fn tx() -> Transaction {
        Transaction::new("t", CollectionRegistry::new())
    }

    fn eval(op: &str, input: &str) -> OperatorResult {
        RuleOperator::parse(op)
            .unwrap()
            .evaluate(&tx(), &Rule::for_test(1), input)
    }

    #[test]
    fn test_parse() {
        assert_eq!(RuleOperator::parse("@rx ^a").unwrap().name(), "Rx");
        assert_eq!(RuleOperator::parse("^a").unwrap().param(), "^a");
        assert!(RuleOperator::parse("!@streq x").unwrap().is_negated());
        assert!(matches!(
            RuleOperator::parse("@bogus x"),
            Err(WafError::UnknownOperator(_))
        ));
        assert!(matches!(
            RuleOperator::parse("@rx ("),
            Err(WafError::InvalidPattern { .. })
        ));
        assert!(matches!(
            RuleOperator::parse("@gt abc"),
            Err(WafError::InvalidParameter { .. })
        ));
        assert!(matches!(
            RuleOperator::parse("@pmFromFile /nonexistent/phrases.txt"),
            Err(WafError::MissingResource { .. })
        ));
    }

    #[test]
    fn test_rx_span() {
        let result = eval("@rx (?i)select\\s+from", "id=1 SELECT  from t");
        assert!(result.matched);
        assert_eq!(result.span, Some((5, 12)));
        assert!(result.captures.is_empty());
    }

    #[test]
    fn test_rx_captures_with_capture_flag() {
        let op = RuleOperator::parse("@rx (\\d+)-(\\d+)").unwrap();
        let result = op.evaluate(&tx(), &Rule::for_test(1).with_capture(), "range 10-20");
        assert_eq!(result.captures, vec!["10-20", "10", "20"]);
    }

    #[test]
    fn test_negation() {
        assert!(eval("!@streq GET", "POST").matched);
        assert!(!eval("!@streq GET", "GET").matched);
    }

    #[test]
    fn test_pm() {
        let result = eval("@pm union select", "id=1 UNION all");
        assert!(result.matched);
        assert_eq!(result.span, Some((5, 5)));
        assert!(!eval("@pm union select", "harmless").matched);
    }

    #[test]
    fn test_pm_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# phrases").unwrap();
        writeln!(file, "etc/passwd").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "cmd.exe").unwrap();

        let op = format!("@pmFromFile {}", file.path().display());
        assert!(eval(&op, "../../ETC/PASSWD").matched);
        assert!(!eval(&op, "phrases").matched);
    }

    #[test]
    fn test_string_operators() {
        assert!(eval("@contains admin", "/admin/login").matched);
        assert_eq!(eval("@contains admin", "/admin/login").span, Some((1, 5)));
        assert!(eval("@beginsWith /api", "/api/v1").matched);
        assert!(eval("@endsWith .php", "/index.php").matched);
        assert!(eval("@within GET POST HEAD", "POST").matched);
        assert!(!eval("@within GET POST HEAD", "PUT").matched);
    }

    #[test]
    fn test_string_operator_macro() {
        let tx = tx();
        tx.tx().store("method", "PUT");
        let op = RuleOperator::parse("@streq %{TX.method}").unwrap();
        assert!(op.evaluate(&tx, &Rule::for_test(1), "PUT").matched);
    }

    #[test]
    fn test_numeric() {
        assert!(eval("@gt 5", "10").matched);
        assert!(!eval("@gt 5", "abc").matched);
        assert!(eval("@eq 0", "abc").matched);
        assert!(eval("@le -1", " -3xyz").matched);
        assert_eq!(parse_leading_int("  42abc"), 42);
        assert_eq!(parse_leading_int("+7"), 7);
    }

    #[test]
    fn test_ip_match() {
        assert!(eval("@ipMatch 10.0.0.0/8,192.168.1.1", "10.1.2.3").matched);
        assert!(eval("@ipMatch 10.0.0.0/8,192.168.1.1", "192.168.1.1").matched);
        assert!(!eval("@ipMatch 10.0.0.0/8", "11.0.0.1").matched);
        assert!(eval("@ipMatch ::1/128", "::1").matched);
        assert!(!eval("@ipMatch 10.0.0.0/8", "not-an-ip").matched);
        assert!(RuleOperator::parse("@ipMatch 10.0.0.0/40").is_err());
        assert!(IpNetwork::parse("0.0.0.0/0").unwrap().contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_verify_cc() {
        assert!(luhn_verify("4111 1111 1111 1111"));
        assert!(!luhn_verify("4111 1111 1111 1112"));
        assert!(!luhn_verify(""));

        let result = eval("@verifyCC \\d{13,16}", "card=4111111111111111;");
        assert!(result.matched);
        assert_eq!(result.span, Some((5, 16)));
        assert!(!eval("@verifyCC \\b\\d{16}\\b", "card=4111111111111112").matched);
    }

    #[test]
    fn test_verify_svnr() {
        // weighted sum of the other digits is 209, 209 % 11 == 0
        assert!(svnr_verify("811-0289876"));
        assert!(!svnr_verify("8112289876"));
        assert!(!svnr_verify("1111111111"));
        assert!(!svnr_verify("0123456789"));
        assert!(!svnr_verify("12345"));
    }

    #[test]
    fn test_match_message() {
        let op = RuleOperator::parse("@rx a").unwrap();
        assert_eq!(
            op.match_message("ARGS:q", "abc"),
            "Matched \"Operator `Rx' with parameter `a' against variable `ARGS:q' (Value: `abc' )"
        );
        let long = "x".repeat(500);
        assert!(op.match_message("ARGS:q", &long).len() < 300);
    }
}
