//! Phase runner

use super::config::RuleEngineMode;
use super::engine::RuleEngine;
use super::error::WafError;
use super::logging::MatchLog;
use super::rules::{RuleSet, PHASE_COUNT};
use super::transaction::{Intervention, Transaction};
use crate::config::EngineConfig;
use crate::modules::collection::CollectionRegistry;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Phases run by [`WafHandler::process_request`]
const REQUEST_PHASES: [u8; 2] = [1, 2];

/// Phases run by [`WafHandler::process_response`]
const RESPONSE_PHASES: [u8; 2] = [3, 4];

/// Logging phase; runs even after an intervention
const LOGGING_PHASE: u8 = 5;

/// Statistics for the WAF handler
#[derive(Debug, Default)]
pub struct WafStats {
    /// Transactions created
    pub transactions: AtomicU64,
    /// Phases processed
    pub phases_processed: AtomicU64,
    /// Rule chains evaluated
    pub rules_evaluated: AtomicU64,
    /// Rule chains that matched
    pub rules_matched: AtomicU64,
    /// Rules skipped by `skip`
    pub rules_skipped: AtomicU64,
    /// Interventions raised
    pub interventions: AtomicU64,
    /// Total phase time in microseconds
    pub total_phase_time_us: AtomicU64,
}

impl WafStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a processed phase
    pub fn record_phase(&self, outcome: &PhaseOutcome, elapsed_us: u64) {
        self.phases_processed.fetch_add(1, Ordering::Relaxed);
        self.rules_evaluated
            .fetch_add(outcome.rules_evaluated, Ordering::Relaxed);
        self.rules_matched
            .fetch_add(outcome.rules_matched, Ordering::Relaxed);
        self.rules_skipped
            .fetch_add(outcome.rules_skipped, Ordering::Relaxed);
        self.total_phase_time_us
            .fetch_add(elapsed_us, Ordering::Relaxed);
        if outcome.intervention.is_some() {
            self.interventions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get average phase time in microseconds
    pub fn avg_phase_time_us(&self) -> u64 {
        let phases = self.phases_processed.load(Ordering::Relaxed);
        if phases == 0 {
            0
        } else {
            self.total_phase_time_us.load(Ordering::Relaxed) / phases
        }
    }

    /// Get intervention rate as percentage of transactions
    pub fn intervention_rate(&self) -> f64 {
        let transactions = self.transactions.load(Ordering::Relaxed);
        if transactions == 0 {
            0.0
        } else {
            (self.interventions.load(Ordering::Relaxed) as f64 / transactions as f64) * 100.0
        }
    }
}

/// Result of running one phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOutcome {
    /// Phase number
    pub phase: u8,
    /// Rule chains evaluated
    pub rules_evaluated: u64,
    /// Rule chains that matched
    pub rules_matched: u64,
    /// Rules skipped by `skip`
    pub rules_skipped: u64,
    /// Intervention raised during this phase
    pub intervention: Option<Intervention>,
}

impl PhaseOutcome {
    fn new(phase: u8) -> Self {
        Self {
            phase,
            ..Self::default()
        }
    }
}

/// Runs rule phases over transactions
#[derive(Debug, Clone)]
pub struct WafHandler {
    name: String,
    mode: RuleEngineMode,
    rules: Arc<RuleSet>,
    engine: RuleEngine,
    collections: CollectionRegistry,
    match_log: Arc<MatchLog>,
    env: Arc<BTreeMap<String, String>>,
    stats: Arc<WafStats>,
}

impl WafHandler {
    /// Create a handler over a compiled rule set
    pub fn new(
        mode: RuleEngineMode,
        rules: RuleSet,
        collections: CollectionRegistry,
        match_log: MatchLog,
    ) -> Self {
        let match_log = Arc::new(match_log);
        let engine = RuleEngine::new(mode)
            .with_exceptions(Arc::clone(rules.exceptions()))
            .with_logger(match_log.clone());

        Self {
            name: "waf".to_string(),
            mode,
            rules: Arc::new(rules),
            engine,
            collections,
            match_log,
            env: Arc::new(BTreeMap::new()),
            stats: Arc::new(WafStats::new()),
        }
    }

    /// Build a handler from configuration.
    ///
    /// Rules and exceptions that fail to compile are returned alongside the
    /// handler, which runs with the rest.
    pub fn from_config(config: &EngineConfig) -> (Self, Vec<WafError>) {
        let load = RuleSet::from_config(&config.waf);
        let collections = CollectionRegistry::from_config(&config.collections);
        let mut handler = Self::new(
            config.engine.mode,
            load.rules,
            collections,
            MatchLog::new(config.waf.match_log.clone()),
        );
        handler.name = config.engine.name.clone();
        if config.engine.capture_process_env {
            handler.env = Arc::new(std::env::vars().collect());
        }

        info!(
            name = %handler.name,
            mode = handler.mode.as_str(),
            rules = handler.rules.len(),
            errors = load.errors.len(),
            "WAF handler ready"
        );
        (handler, load.errors)
    }

    /// Builder: set the `ENV` snapshot handed to new transactions
    #[must_use]
    pub fn with_env<K, V>(mut self, env: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Arc::new(env.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Start a transaction sharing this handler's collections
    pub fn new_transaction(&self, id: impl Into<String>) -> Transaction {
        self.stats.transactions.fetch_add(1, Ordering::Relaxed);
        Transaction::new(id, self.collections.clone())
            .with_env(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Start a transaction with a generated id
    pub fn new_transaction_auto(&self) -> Transaction {
        self.new_transaction(generate_transaction_id())
    }

    /// Run the rules of one phase.
    ///
    /// Stops at the first intervention or `allow`. Pending `skip` counts do
    /// not carry over to the next phase.
    pub fn process_phase(&self, tx: &mut Transaction, phase: u8) -> PhaseOutcome {
        let mut outcome = PhaseOutcome::new(phase);
        if !self.mode.is_enabled() || !(1..=PHASE_COUNT as u8).contains(&phase) {
            return outcome;
        }
        let stopped = tx.is_allowed() || tx.intervention().is_some();
        if stopped && phase != LOGGING_PHASE {
            debug!(tx = %tx.id(), phase, "Transaction already decided, phase skipped");
            return outcome;
        }

        let start = Instant::now();
        for rule in self.rules.rules_for_phase(phase) {
            if tx.consume_skip() {
                debug!(tx = %tx.id(), rule_id = rule.id(), "Rule skipped");
                outcome.rules_skipped += 1;
                continue;
            }

            outcome.rules_evaluated += 1;
            if self.engine.evaluate(tx, rule) {
                outcome.rules_matched += 1;
            }

            if phase != LOGGING_PHASE {
                if let Some(intervention) = tx.intervention() {
                    outcome.intervention = Some(intervention.clone());
                    break;
                }
                if tx.is_allowed() {
                    debug!(tx = %tx.id(), rule_id = rule.id(), "Transaction allowed");
                    break;
                }
            }
        }
        tx.set_skip(0);

        let elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.stats.record_phase(&outcome, elapsed_us);
        outcome
    }

    fn process_phases(&self, tx: &mut Transaction, phases: &[u8]) -> Option<Intervention> {
        for phase in phases {
            if let Some(intervention) = self.process_phase(tx, *phase).intervention {
                return Some(intervention);
            }
        }
        None
    }

    /// Run the request phases (1 and 2)
    pub fn process_request(&self, tx: &mut Transaction) -> Option<Intervention> {
        self.process_phases(tx, &REQUEST_PHASES)
    }

    /// Run the response phases (3 and 4)
    pub fn process_response(&self, tx: &mut Transaction) -> Option<Intervention> {
        self.process_phases(tx, &RESPONSE_PHASES)
    }

    /// Run the logging phase (5)
    pub fn process_logging(&self, tx: &mut Transaction) -> PhaseOutcome {
        self.process_phase(tx, LOGGING_PHASE)
    }

    /// Handler name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine mode
    pub fn mode(&self) -> RuleEngineMode {
        self.mode
    }

    /// Loaded rules
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Shared collections
    pub fn collections(&self) -> &CollectionRegistry {
        &self.collections
    }

    /// In-memory match log
    pub fn match_log(&self) -> &MatchLog {
        &self.match_log
    }

    /// Get statistics
    pub fn stats(&self) -> &WafStats {
        &self.stats
    }
}

fn generate_transaction_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tx-{:x}-{:04x}", timestamp, seq)
}
