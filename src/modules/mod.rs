//! # WAF Modules
//!
//! ## Available Modules
//!
//! - [`collection`] - Shared, namespaced, expiring key/value collections
//! - [`waf`] - Variables, operators, actions and the rule-chain engine

pub mod collection;
pub mod waf;
