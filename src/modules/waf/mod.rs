//! Web Application Firewall Module
//!
//! ModSecurity-style rule engine over a per-request transaction:
//! - Variables resolving request data, shared collections and ambient state
//! - Transformation pipelines and pluggable operators
//! - Rule chains evaluated as conjunctions, with per-value evidence
//! - Target exceptions and per-transaction rule/target removal
//! - Actions staged per chain outcome, disruptive interventions
//! - Phase runner with statistics and a bounded match log

mod actions;
mod anchored;
mod config;
mod engine;
mod error;
mod exceptions;
mod exclusions;
mod handler;
mod logging;
mod operators;
mod rules;
mod transaction;
mod transforms;
mod value;
mod variables;

pub use actions::{
    parse_action, Action, ActionStage, Ctl, Disruptive, ExpireVar, InitCol, LogData,
    ParsedAction, RuleAttribute, SetEnv, SetVar, Skip, Status, DEFAULT_DENY_STATUS,
    DEFAULT_REDIRECT_STATUS,
};
pub use anchored::{AnchoredSetVariable, AnchoredVariable, KeyNamesProxy};
pub use config::{
    ExceptionConfig, MatchLogConfig, RuleConfig, RuleEngineMode, RuleFile, RuleSeverity,
    WafConfig,
};
pub use engine::{ChainStep, RuleEngine};
pub use error::{WafError, WafResult};
pub use exceptions::RuleExceptions;
pub use exclusions::KeyExclusions;
pub use handler::{PhaseOutcome, WafHandler, WafStats};
pub use logging::{MatchLog, MatchLogger, RuleMessage, TracingLogger};
pub use operators::{
    luhn_verify, parse_leading_int, svnr_verify, IpMatch, IpNetwork, NumericCompare, NumericKind,
    Operator, OperatorResult, Pm, RuleOperator, Rx, StringMatch, StringMatchKind, Unconditional,
    VerifyCc, VerifySvnr,
};
pub use rules::{Rule, RuleSet, RuleSetLoad, DEFAULT_PHASE, PHASE_COUNT};
pub use transaction::{
    Intervention, SetSource, SingleSource, Transaction, TransactionOverrides,
};
pub use transforms::{Transform, TransformPipeline, Transformation};
pub use value::{ValueList, VariableOrigin, VariableValue};
pub use variables::{
    parse_variable, parse_variable_list, CollectionVariable, CountVariable, EnvVariable,
    ExclusionVariable, MacroString, NamesVariable, RuleVariable, Selector, SetVariable,
    SingleVariable, TimeField, TimeVariable, Variable, VariableSet, PERSISTENT_COLLECTIONS,
};
