//! # R0N WAF
//!
//! Rule-chain evaluation engine and shared collection store for a
//! ModSecurity-style web application firewall.
//!
//! ## Features
//!
//! - Namespaced, case-insensitive collections with lazy expiry, shared
//!   across concurrent transactions
//! - Per-transaction variables with byte-range evidence
//! - Rule chains with transformations, operators and staged actions
//! - Target exceptions and per-transaction rule/target removal
//! - TOML configuration with validation
//!
//! ## Architecture
//!
//! A [`modules::waf::WafHandler`] owns the compiled rules and the
//! [`modules::collection::CollectionRegistry`]. Each request becomes a
//! [`modules::waf::Transaction`]; the handler runs it through the rule
//! phases and reports an [`modules::waf::Intervention`] when a disruptive
//! rule fires. Evaluation is synchronous; only the collections are shared
//! between threads.

pub mod config;
pub mod modules;
