//! Collection backend trait and compartment views.

use super::key::nkey;
use crate::modules::waf::{KeyExclusions, ValueList, VariableValue};
use regex::Regex;
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// A named, case-insensitive, multi-valued, expiring key/value store.
///
/// Implementations are shared between concurrent transactions. Reads that
/// observe an expired entry must delete it after the read completes.
pub trait Collection: Send + Sync + fmt::Debug {
    /// Collection name (`IP`, `TX`, ...).
    fn name(&self) -> &str;

    /// Append a new entry for `key`.
    fn store(&self, key: &str, value: &str);

    /// Replace the first entry for `key`, or append one if none exists.
    fn store_or_update_first(&self, key: &str, value: &str) -> bool;

    /// Replace the first entry for `key`. Returns `false` if none exists.
    fn update_first(&self, key: &str, value: &str) -> bool;

    /// Remove every entry for `key`.
    fn del(&self, key: &str);

    /// Expire `key` after `ttl`; creates a value-less entry if needed.
    fn set_expiry(&self, key: &str, ttl: Duration);

    /// First live value stored under `key`.
    fn resolve_first(&self, key: &str) -> Option<String>;

    /// Append every live value stored under `key`.
    fn resolve_single_match(&self, key: &str, out: &mut ValueList);

    /// Prepend every live value under `key`, or every live value in the
    /// collection when `key` is empty, skipping excluded keys.
    fn resolve_multi_matches(&self, key: &str, out: &mut ValueList, exclusions: &KeyExclusions);

    /// Prepend every live value whose key matches `pattern`, skipping
    /// excluded keys.
    fn resolve_regular_expression(
        &self,
        pattern: &Regex,
        out: &mut ValueList,
        exclusions: &KeyExclusions,
    );

    /// Whether any entry exists for `key`, including value-less ones.
    fn contains(&self, key: &str) -> bool;

    /// Borrow the collection scoped to one or more compartments.
    fn compartment(&self, compartments: &[&str]) -> CompartmentView<'_>
    where
        Self: Sized,
    {
        CompartmentView::new(self, compartments)
    }
}

/// A collection seen through a compartment prefix.
///
/// Every key passed in is composed as `compartment::key`; keys reported back
/// have the prefix stripped.
pub struct CompartmentView<'a> {
    collection: &'a dyn Collection,
    prefix: String,
}

impl fmt::Debug for CompartmentView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompartmentView")
            .field("collection", &self.collection.name())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl<'a> CompartmentView<'a> {
    /// Scope `collection` to `compartments`.
    pub fn new(collection: &'a dyn Collection, compartments: &[&str]) -> Self {
        Self {
            collection,
            prefix: nkey(compartments, ""),
        }
    }

    /// The composed prefix, including the trailing separator.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// See [`Collection::store`].
    pub fn store(&self, key: &str, value: &str) {
        self.collection.store(&self.key(key), value);
    }

    /// See [`Collection::store_or_update_first`].
    pub fn store_or_update_first(&self, key: &str, value: &str) -> bool {
        self.collection.store_or_update_first(&self.key(key), value)
    }

    /// See [`Collection::update_first`].
    pub fn update_first(&self, key: &str, value: &str) -> bool {
        self.collection.update_first(&self.key(key), value)
    }

    /// See [`Collection::del`].
    pub fn del(&self, key: &str) {
        self.collection.del(&self.key(key));
    }

    /// See [`Collection::set_expiry`].
    pub fn set_expiry(&self, key: &str, ttl: Duration) {
        self.collection.set_expiry(&self.key(key), ttl);
    }

    /// See [`Collection::resolve_first`].
    pub fn resolve_first(&self, key: &str) -> Option<String> {
        self.collection.resolve_first(&self.key(key))
    }

    /// See [`Collection::contains`].
    pub fn contains(&self, key: &str) -> bool {
        self.collection.contains(&self.key(key))
    }

    /// See [`Collection::resolve_single_match`].
    pub fn resolve_single_match(&self, key: &str, out: &mut ValueList) {
        let mut found = ValueList::new();
        self.collection.resolve_single_match(&self.key(key), &mut found);
        out.extend(found.into_iter().map(|v| self.strip(v)));
    }

    /// See [`Collection::resolve_multi_matches`].
    ///
    /// An empty key lists every live entry inside the compartment.
    pub fn resolve_multi_matches(
        &self,
        key: &str,
        out: &mut ValueList,
        exclusions: &KeyExclusions,
    ) {
        if self.prefix.is_empty() {
            self.collection.resolve_multi_matches(key, out, exclusions);
            return;
        }
        if !key.is_empty() {
            if exclusions.to_omit(key) {
                trace!(collection = self.collection.name(), key, "excluding key from target value");
                return;
            }
            let mut found = ValueList::new();
            self.collection
                .resolve_multi_matches(&self.key(key), &mut found, &KeyExclusions::new());
            self.prepend_stripped(found, out, exclusions, |_| true);
            return;
        }

        let found = self.scan_compartment();
        self.prepend_stripped(found, out, exclusions, |_| true);
    }

    /// See [`Collection::resolve_regular_expression`]; `pattern` is matched
    /// against the key without the compartment prefix.
    pub fn resolve_regular_expression(
        &self,
        pattern: &Regex,
        out: &mut ValueList,
        exclusions: &KeyExclusions,
    ) {
        if self.prefix.is_empty() {
            self.collection
                .resolve_regular_expression(pattern, out, exclusions);
            return;
        }
        let found = self.scan_compartment();
        self.prepend_stripped(found, out, exclusions, |key| pattern.is_match(key));
    }

    // Every live entry under the prefix, keys still composed
    fn scan_compartment(&self) -> ValueList {
        let mut found = ValueList::new();
        let pattern = match Regex::new(&format!("(?i)^{}", regex::escape(&self.prefix))) {
            Ok(pattern) => pattern,
            Err(e) => {
                trace!(prefix = %self.prefix, error = %e, "invalid compartment pattern");
                return found;
            },
        };
        self.collection
            .resolve_regular_expression(&pattern, &mut found, &KeyExclusions::new());
        found
    }

    fn prepend_stripped(
        &self,
        found: ValueList,
        out: &mut ValueList,
        exclusions: &KeyExclusions,
        keep: impl Fn(&str) -> bool,
    ) {
        for value in found {
            let value = self.strip(value);
            if !keep(value.key()) {
                continue;
            }
            if exclusions.to_omit(value.key()) {
                trace!(
                    collection = self.collection.name(),
                    key = value.key(),
                    "excluding key from target value"
                );
                continue;
            }
            out.push_front(value);
        }
    }

    fn strip(&self, value: VariableValue) -> VariableValue {
        let key = value.key();
        if key.len() < self.prefix.len()
            || !key.is_char_boundary(self.prefix.len())
            || !key[..self.prefix.len()].eq_ignore_ascii_case(&self.prefix)
        {
            return value;
        }

        let mut stripped = VariableValue::new(
            value.collection(),
            &key[self.prefix.len()..],
            value.value(),
        );
        for origin in value.origins() {
            stripped.add_origin(origin.length, origin.offset);
        }
        stripped
    }
}
