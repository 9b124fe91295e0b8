//! Per-request state
//!
//! A [`Transaction`] is owned by one thread for its whole life. Everything in
//! it except the shared collections is plain data; the shared collections
//! synchronize internally.

use super::anchored::{AnchoredSetVariable, AnchoredVariable};
use super::rules::Rule;
use super::transforms::Transform;
use crate::modules::collection::{
    CollectionKey, CollectionRegistry, CompartmentView, InMemoryCollection,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::ops::RangeInclusive;
use tracing::{debug, warn};

/// Rule and target removals requested while the transaction runs.
#[derive(Debug, Clone, Default)]
pub struct TransactionOverrides {
    removed_ids: HashSet<i64>,
    removed_ranges: Vec<RangeInclusive<i64>>,
    targets_by_id: Vec<(i64, String)>,
    targets_by_tag: Vec<(String, String)>,
}

impl TransactionOverrides {
    /// Create empty overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the rule with this id
    pub fn remove_rule_by_id(&mut self, id: i64) {
        self.removed_ids.insert(id);
    }

    /// Skip every rule whose id falls in `start..=end`
    pub fn remove_rule_by_id_range(&mut self, start: i64, end: i64) {
        self.removed_ranges.push(start..=end);
    }

    /// Stop the rule with this id from inspecting `target`
    pub fn remove_target_by_id(&mut self, id: i64, target: impl Into<String>) {
        self.targets_by_id.push((id, target.into()));
    }

    /// Stop every rule carrying `tag` from inspecting `target`
    pub fn remove_target_by_tag(&mut self, tag: impl Into<String>, target: impl Into<String>) {
        self.targets_by_tag.push((tag.into(), target.into()));
    }

    /// Whether the rule id was removed, directly or through a range
    pub fn is_rule_removed(&self, id: i64) -> bool {
        self.removed_ids.contains(&id) || self.removed_ranges.iter().any(|r| r.contains(&id))
    }

    /// Whether `target` (a full variable name or `COLLECTION:key`) was removed
    /// for `rule`
    pub fn is_target_removed(&self, rule: &Rule, target: &str) -> bool {
        self.targets_by_id
            .iter()
            .any(|(id, t)| *id == rule.id() && t.eq_ignore_ascii_case(target))
            || self
                .targets_by_tag
                .iter()
                .any(|(tag, t)| rule.has_tag(tag) && t.eq_ignore_ascii_case(target))
    }

    /// Whether nothing was overridden
    pub fn is_empty(&self) -> bool {
        self.removed_ids.is_empty()
            && self.removed_ranges.is_empty()
            && self.targets_by_id.is_empty()
            && self.targets_by_tag.is_empty()
    }
}

/// Outcome of a disruptive action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Intervention {
    /// Rule that intervened
    pub rule_id: i64,
    /// Disruptive action name (`deny`, `drop`, `redirect`, ...)
    pub action: String,
    /// HTTP status to answer with
    pub status: u16,
    /// Redirect target
    pub url: Option<String>,
    /// Rule message at the time of the intervention
    pub message: Option<String>,
}

/// Single-valued anchors of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleSource {
    /// `REQUEST_URI`
    RequestUri,
    /// `REQUEST_METHOD`
    RequestMethod,
    /// `QUERY_STRING`
    QueryString,
    /// `REQUEST_BODY`
    RequestBody,
    /// `REMOTE_ADDR`
    RemoteAddr,
    /// `MATCHED_VAR`
    MatchedVar,
    /// `MATCHED_VAR_NAME`
    MatchedVarName,
}

/// Multi-valued anchors of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetSource {
    /// `ARGS`
    Args,
    /// `ARGS_GET`
    ArgsGet,
    /// `REQUEST_HEADERS`
    RequestHeaders,
    /// `REQUEST_COOKIES`
    RequestCookies,
    /// `MATCHED_VARS`
    MatchedVars,
}

/// State of one HTTP transaction
#[derive(Debug)]
pub struct Transaction {
    id: String,
    client_addr: Option<IpAddr>,
    timestamp: DateTime<Utc>,
    env: BTreeMap<String, String>,

    request_uri: AnchoredVariable,
    request_method: AnchoredVariable,
    query_string: AnchoredVariable,
    request_body: AnchoredVariable,
    remote_addr: AnchoredVariable,
    matched_var: AnchoredVariable,
    matched_var_name: AnchoredVariable,

    args: AnchoredSetVariable,
    args_get: AnchoredSetVariable,
    request_headers: AnchoredSetVariable,
    request_cookies: AnchoredSetVariable,
    matched_vars: AnchoredSetVariable,
    matched_vars_names: AnchoredSetVariable,

    tx: InMemoryCollection,
    collections: CollectionRegistry,
    compartments: HashMap<CollectionKey, String>,

    overrides: TransactionOverrides,
    intervention: Option<Intervention>,
    status: Option<u16>,
    skip: usize,
    body_args: bool,
    allowed: bool,
    header_block_len: usize,
}

impl Transaction {
    /// Create a transaction sharing the collections of `collections`
    pub fn new(id: impl Into<String>, collections: CollectionRegistry) -> Self {
        Self {
            id: id.into(),
            client_addr: None,
            timestamp: Utc::now(),
            env: BTreeMap::new(),
            request_uri: AnchoredVariable::new("REQUEST_URI"),
            request_method: AnchoredVariable::new("REQUEST_METHOD"),
            query_string: AnchoredVariable::new("QUERY_STRING"),
            request_body: AnchoredVariable::new("REQUEST_BODY"),
            remote_addr: AnchoredVariable::new("REMOTE_ADDR"),
            matched_var: AnchoredVariable::new("MATCHED_VAR"),
            matched_var_name: AnchoredVariable::new("MATCHED_VAR_NAME"),
            args: AnchoredSetVariable::new("ARGS"),
            args_get: AnchoredSetVariable::new("ARGS_GET"),
            request_headers: AnchoredSetVariable::new("REQUEST_HEADERS"),
            request_cookies: AnchoredSetVariable::new("REQUEST_COOKIES"),
            matched_vars: AnchoredSetVariable::new("MATCHED_VARS"),
            matched_vars_names: AnchoredSetVariable::new("MATCHED_VARS_NAMES"),
            tx: InMemoryCollection::with_capacity("TX", 64),
            collections,
            compartments: HashMap::new(),
            overrides: TransactionOverrides::new(),
            intervention: None,
            status: None,
            skip: 0,
            body_args: false,
            allowed: false,
            header_block_len: 0,
        }
    }

    /// Builder: set the request method
    #[must_use]
    pub fn with_method(mut self, method: &str) -> Self {
        self.request_method.set(method, 0);
        self
    }

    /// Builder: set the request URI
    #[must_use]
    pub fn with_uri(mut self, uri: &str) -> Self {
        self.request_uri.set(uri, 0);
        self
    }

    /// Builder: set the query string and extract `ARGS`/`ARGS_GET` from it
    ///
    /// Origins point at the raw value bytes inside the query string.
    #[must_use]
    pub fn with_query_string(mut self, query: &str) -> Self {
        self.query_string.set(query, 0);
        for (key, value, offset, len) in parse_pairs(query, '&') {
            self.args.set_with_len(&key, &value, offset, len);
            self.args_get.set_with_len(&key, &value, offset, len);
        }
        self
    }

    /// Builder: add a request header
    ///
    /// Origins point inside the serialized `name: value\n` header block. A
    /// `Cookie` header also fills `REQUEST_COOKIES`.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let offset = self.header_block_len + name.len() + 2;
        self.request_headers.set(name, value, offset);

        if name.eq_ignore_ascii_case("cookie") {
            for (key, cookie, at, len) in parse_pairs(value, ';') {
                self.request_cookies
                    .set_with_len(key.trim_start(), &cookie, offset + at, len);
            }
        }

        self.header_block_len = offset + value.len() + 1;
        self.parse_form_body();
        self
    }

    /// Builder: set the request body
    ///
    /// Form-encoded bodies also fill `ARGS`, with origins inside the body.
    /// The `Content-Type` header may be added before or after the body.
    #[must_use]
    pub fn with_body(mut self, body: &str) -> Self {
        self.request_body.set(body, 0);
        self.body_args = false;
        self.parse_form_body();
        self
    }

    // Runs once both the body and a form content type are known
    fn parse_form_body(&mut self) {
        if self.body_args {
            return;
        }
        let Some(body) = self.request_body.value() else {
            return;
        };
        let form = self
            .request_headers
            .resolve_first("content-type")
            .is_some_and(|ct| {
                ct.trim_start()
                    .to_ascii_lowercase()
                    .starts_with("application/x-www-form-urlencoded")
            });
        if !form {
            return;
        }
        for (key, value, offset, len) in parse_pairs(body, '&') {
            self.args.set_with_len(&key, &value, offset, len);
        }
        self.body_args = true;
    }

    /// Builder: set the client address (`REMOTE_ADDR`)
    #[must_use]
    pub fn with_client_addr(mut self, addr: IpAddr) -> Self {
        self.client_addr = Some(addr);
        self.remote_addr.set(&addr.to_string(), 0);
        self
    }

    /// Builder: inject the environment snapshot seen by `ENV`
    #[must_use]
    pub fn with_env<K, V>(mut self, env: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Builder: fix the time seen by `TIME*` variables
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Transaction id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Client address
    pub fn client_addr(&self) -> Option<IpAddr> {
        self.client_addr
    }

    /// Time seen by `TIME*` variables
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Environment snapshot
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Set an entry of the environment snapshot
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Request URI, if known
    pub fn uri(&self) -> Option<&str> {
        self.request_uri.value()
    }

    /// A single-valued anchor
    pub fn anchored(&self, source: SingleSource) -> &AnchoredVariable {
        match source {
            SingleSource::RequestUri => &self.request_uri,
            SingleSource::RequestMethod => &self.request_method,
            SingleSource::QueryString => &self.query_string,
            SingleSource::RequestBody => &self.request_body,
            SingleSource::RemoteAddr => &self.remote_addr,
            SingleSource::MatchedVar => &self.matched_var,
            SingleSource::MatchedVarName => &self.matched_var_name,
        }
    }

    /// A multi-valued anchor
    pub fn anchored_set(&self, source: SetSource) -> &AnchoredSetVariable {
        match source {
            SetSource::Args => &self.args,
            SetSource::ArgsGet => &self.args_get,
            SetSource::RequestHeaders => &self.request_headers,
            SetSource::RequestCookies => &self.request_cookies,
            SetSource::MatchedVars => &self.matched_vars,
        }
    }

    /// `MATCHED_VARS_NAMES`
    pub fn matched_vars_names(&self) -> &AnchoredSetVariable {
        &self.matched_vars_names
    }

    /// The transaction's own `TX` collection
    pub fn tx(&self) -> &InMemoryCollection {
        &self.tx
    }

    /// Shared collections
    pub fn collections(&self) -> &CollectionRegistry {
        &self.collections
    }

    /// A collection as seen by this transaction
    ///
    /// `TX` is always available. Shared collections are only visible once
    /// `initcol` has chosen their compartment.
    pub fn collection(&self, name: &str) -> Option<CompartmentView<'_>> {
        if name.eq_ignore_ascii_case("TX") {
            return Some(CompartmentView::new(&self.tx, &[]));
        }
        let compartment = self.compartments.get(&CollectionKey::from(name))?;
        let collection = self.collections.get(name)?;
        Some(CompartmentView::new(
            collection.as_ref(),
            &[compartment.as_str()],
        ))
    }

    /// Bind the shared collection `name` to the compartment `key`
    pub fn init_collection(&mut self, name: &str, key: &str) -> bool {
        if !self.collections.contains(name) {
            warn!(tx = %self.id, collection = name, "initcol on unknown collection");
            return false;
        }
        debug!(tx = %self.id, collection = name, key, "collection initialized");
        self.compartments
            .insert(CollectionKey::from(name), key.to_string());
        true
    }

    /// Record a match in the `MATCHED_VAR*` variables
    pub fn update_matched_vars(&mut self, key: &str, value: &str, offset: usize) {
        self.matched_var.set(value, offset);
        self.matched_var_name.set(key, offset);
        self.matched_vars.set(key, value, offset);
        self.matched_vars_names.set(key, key, offset);
    }

    /// Forget every recorded match
    pub fn clean_matched_vars(&mut self) {
        self.matched_var.unset();
        self.matched_var_name.unset();
        self.matched_vars.unset();
        self.matched_vars_names.unset();
    }

    /// Rule and target removals
    pub fn overrides(&self) -> &TransactionOverrides {
        &self.overrides
    }

    /// Mutable rule and target removals
    pub fn overrides_mut(&mut self) -> &mut TransactionOverrides {
        &mut self.overrides
    }

    /// Record an intervention; the first one wins
    pub fn intervene(&mut self, intervention: Intervention) {
        if self.intervention.is_none() {
            debug!(
                tx = %self.id,
                rule_id = intervention.rule_id,
                action = %intervention.action,
                status = intervention.status,
                "intervention"
            );
            self.intervention = Some(intervention);
        }
    }

    /// Current intervention
    pub fn intervention(&self) -> Option<&Intervention> {
        self.intervention.as_ref()
    }

    /// Status set by the `status` action
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Set the status used by the next disruptive action
    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    /// Skip the next `count` rules of the current phase
    pub fn set_skip(&mut self, count: usize) {
        self.skip = count;
    }

    /// Number of rules still to skip
    pub fn skip(&self) -> usize {
        self.skip
    }

    /// Consume one pending skip; returns whether a rule must be skipped
    pub(crate) fn consume_skip(&mut self) -> bool {
        if self.skip == 0 {
            return false;
        }
        self.skip -= 1;
        true
    }

    /// Stop rule processing for the rest of the transaction
    pub fn allow(&mut self) {
        self.allowed = true;
    }

    /// Whether `allow` was applied
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Split `input` into url-decoded `(key, value, value_offset, value_len)`
/// tuples. Offsets and lengths refer to the raw value inside `input`.
fn parse_pairs(input: &str, separator: char) -> Vec<(String, String, usize, usize)> {
    let mut pairs = Vec::new();
    let mut start = 0;
    for part in input.split(separator) {
        let part_start = start;
        start += part.len() + separator.len_utf8();
        if part.trim().is_empty() {
            continue;
        }
        let (key, value, value_start) = match part.find('=') {
            Some(eq) => (&part[..eq], &part[eq + 1..], part_start + eq + 1),
            None => (part, "", part_start + part.len()),
        };
        pairs.push((
            Transform::url_decode(key),
            Transform::url_decode(value),
            value_start,
            value.len(),
        ));
    }
    pairs
}
