//! Match logging

use super::config::{MatchLogConfig, RuleSeverity};
use super::rules::Rule;
use super::transaction::Transaction;
use std::collections::VecDeque;
use std::fmt;
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Evidence of one rule match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleMessage {
    /// Timestamp (Unix epoch millis)
    pub timestamp: u64,

    /// Transaction id
    pub transaction_id: String,

    /// Client address
    pub client_addr: Option<IpAddr>,

    /// Request URI
    pub uri: Option<String>,

    /// Rule id (of the chain head for final entries)
    pub rule_id: i64,

    /// Rule phase
    pub phase: u8,

    /// Expanded rule message
    pub message: String,

    /// Expanded `logdata`
    pub data: String,

    /// Operator match message
    pub match_message: String,

    /// Evidence reference: origins, operator offsets and transformations
    pub reference: String,

    /// `COLLECTION:key` of the matched value
    pub matched_key: String,

    /// Matched value after transformation
    pub matched_value: String,

    /// Rule tags
    pub tags: Vec<String>,

    /// Rule severity
    pub severity: Option<RuleSeverity>,

    /// Rule version
    pub ver: Option<String>,

    /// Rule revision
    pub rev: Option<String>,

    /// Rule maturity
    pub maturity: Option<u8>,

    /// Rule accuracy
    pub accuracy: Option<u8>,

    /// Whether a disruptive action ran
    pub disruptive: bool,

    /// Whether this is the entry closing a matched chain
    pub is_final: bool,
}

impl RuleMessage {
    /// Start a message for `rule` in `tx`
    pub fn new(tx: &Transaction, rule: &Rule) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        Self {
            timestamp,
            transaction_id: tx.id().to_string(),
            client_addr: tx.client_addr(),
            uri: tx.uri().map(str::to_string),
            rule_id: rule.id(),
            phase: rule.phase(),
            tags: rule.tags().to_vec(),
            severity: rule.severity(),
            ver: rule.ver().map(str::to_string),
            rev: rule.rev().map(str::to_string),
            maturity: rule.maturity(),
            accuracy: rule.accuracy(),
            ..Self::default()
        }
    }

    /// Append one evidence item to the reference
    pub fn push_reference(&mut self, item: &str) {
        if item.is_empty() {
            return;
        }
        if !self.reference.is_empty() {
            self.reference.push(';');
        }
        self.reference.push_str(item);
    }
}

impl fmt::Display for RuleMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.match_message.is_empty() {
            write!(f, "{}. ", self.match_message)?;
        }
        write!(f, "[id \"{}\"]", self.rule_id)?;
        if let Some(rev) = &self.rev {
            write!(f, " [rev \"{rev}\"]")?;
        }
        write!(f, " [msg \"{}\"]", self.message)?;
        write!(f, " [data \"{}\"]", self.data)?;
        if let Some(severity) = self.severity {
            write!(f, " [severity \"{}\"]", severity.level())?;
        }
        if let Some(ver) = &self.ver {
            write!(f, " [ver \"{ver}\"]")?;
        }
        write!(f, " [maturity \"{}\"]", self.maturity.unwrap_or(0))?;
        write!(f, " [accuracy \"{}\"]", self.accuracy.unwrap_or(0))?;
        for tag in &self.tags {
            write!(f, " [tag \"{tag}\"]")?;
        }
        if let Some(uri) = &self.uri {
            write!(f, " [uri \"{uri}\"]")?;
        }
        write!(f, " [unique_id \"{}\"]", self.transaction_id)?;
        write!(f, " [ref \"{}\"]", self.reference)
    }
}

/// Receiver of match records
pub trait MatchLogger: Send + Sync + fmt::Debug {
    /// Record one entry
    fn log(&self, message: &RuleMessage);
}

/// Forwards every entry to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl MatchLogger for TracingLogger {
    fn log(&self, message: &RuleMessage) {
        forward(message);
    }
}

fn forward(message: &RuleMessage) {
    if message.disruptive {
        warn!(
            tx = %message.transaction_id,
            rule_id = message.rule_id,
            is_final = message.is_final,
            "{message}"
        );
    } else {
        info!(
            tx = %message.transaction_id,
            rule_id = message.rule_id,
            is_final = message.is_final,
            "{message}"
        );
    }
}

/// Bounded in-memory match log
#[derive(Debug)]
pub struct MatchLog {
    config: MatchLogConfig,
    entries: RwLock<VecDeque<RuleMessage>>,
}

impl MatchLog {
    /// Create a log with `config`
    pub fn new(config: MatchLogConfig) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(config.max_entries.min(1024))),
            config,
        }
    }

    /// Create with default config
    pub fn default_config() -> Self {
        Self::new(MatchLogConfig::default())
    }

    /// Most recent `count` entries, newest first
    pub fn recent_entries(&self, count: usize) -> Vec<RuleMessage> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().rev().take(count).cloned().collect()
    }

    /// Entries recorded for a rule id
    pub fn entries_for_rule(&self, rule_id: i64) -> Vec<RuleMessage> {
        self.filtered(|e| e.rule_id == rule_id)
    }

    /// Entries closing a matched chain
    pub fn final_entries(&self) -> Vec<RuleMessage> {
        self.filtered(|e| e.is_final)
    }

    /// Entries at least as severe as `severity`
    pub fn entries_by_severity(&self, severity: RuleSeverity) -> Vec<RuleMessage> {
        self.filtered(|e| e.severity.is_some_and(|s| s <= severity))
    }

    /// Entries recorded for a transaction
    pub fn entries_for_transaction(&self, transaction_id: &str) -> Vec<RuleMessage> {
        self.filtered(|e| e.transaction_id == transaction_id)
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of entries kept
    pub fn count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn filtered(&self, f: impl Fn(&RuleMessage) -> bool) -> Vec<RuleMessage> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().filter(|e| f(e)).cloned().collect()
    }
}

impl MatchLogger for MatchLog {
    fn log(&self, message: &RuleMessage) {
        if !self.config.enabled {
            return;
        }
        if self.config.forward_to_tracing {
            forward(message);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.config.max_entries.max(1) {
            entries.pop_front();
        }
        entries.push_back(message.clone());
    }
}
