//! Transaction-local variables.
//!
//! These hold the values extracted from one request (arguments, headers,
//! matched variables). They are owned by a single transaction and need no
//! locking; resolution hands out copies the caller owns.

use super::exclusions::KeyExclusions;
use super::value::{ValueList, VariableValue};
use regex::Regex;
use tracing::trace;

/// A multi-valued, case-insensitive set of values scoped to one transaction.
#[derive(Debug, Clone)]
pub struct AnchoredSetVariable {
    name: String,
    values: Vec<VariableValue>,
}

impl AnchoredSetVariable {
    /// Create an empty set named `name` (`ARGS`, `REQUEST_HEADERS`, ...).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::with_capacity(10),
        }
    }

    /// Name of the set.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append `value` under `key`, originating at `offset` and spanning the
    /// whole value.
    pub fn set(&mut self, key: &str, value: &str, offset: usize) {
        self.set_with_len(key, value, offset, value.len());
    }

    /// Append `value` under `key`, originating at `offset` for `len` bytes.
    pub fn set_with_len(&mut self, key: &str, value: &str, offset: usize, len: usize) {
        self.values
            .push(VariableValue::new(&self.name, key, value).with_origin(len, offset));
    }

    /// Drop every value.
    pub fn unset(&mut self) {
        self.values.clear();
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over the stored values.
    pub fn iter(&self) -> impl Iterator<Item = &VariableValue> {
        self.values.iter()
    }

    /// Prepend a copy of every value whose key is not excluded.
    pub fn resolve(&self, out: &mut ValueList, exclusions: &KeyExclusions) {
        for value in &self.values {
            if exclusions.to_omit(value.key()) {
                trace!(variable = %self.name, key = value.key(), "excluding key from target value");
                continue;
            }
            out.push_front(value.clone());
        }
    }

    /// Append a copy of every value stored under `key`.
    pub fn resolve_key(&self, key: &str, out: &mut ValueList) {
        out.extend(
            self.values
                .iter()
                .filter(|v| v.key().eq_ignore_ascii_case(key))
                .cloned(),
        );
    }

    /// Prepend a copy of every value whose key matches `pattern` and is not
    /// excluded.
    pub fn resolve_regular_expression(
        &self,
        pattern: &Regex,
        out: &mut ValueList,
        exclusions: &KeyExclusions,
    ) {
        for value in self.values.iter().filter(|v| pattern.is_match(v.key())) {
            if exclusions.to_omit(value.key()) {
                trace!(variable = %self.name, key = value.key(), "excluding key from target value");
                continue;
            }
            out.push_front(value.clone());
        }
    }

    /// First value stored under `key`.
    pub fn resolve_first(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.key().eq_ignore_ascii_case(key))
            .map(VariableValue::value)
    }
}

/// A single value scoped to one transaction, e.g. `MATCHED_VAR`.
#[derive(Debug, Clone)]
pub struct AnchoredVariable {
    name: String,
    value: Option<VariableValue>,
}

impl AnchoredVariable {
    /// Create an unset variable.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Name of the variable.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the value.
    pub fn set(&mut self, value: &str, offset: usize) {
        self.value =
            Some(VariableValue::keyless(&self.name, value).with_origin(value.len(), offset));
    }

    /// Clear the value.
    pub fn unset(&mut self) {
        self.value = None;
    }

    /// Current value.
    pub fn value(&self) -> Option<&str> {
        self.value.as_ref().map(VariableValue::value)
    }

    /// Append a copy of the value, if set and not empty.
    pub fn evaluate(&self, out: &mut ValueList) {
        if let Some(value) = self.value.as_ref().filter(|v| !v.value().is_empty()) {
            out.push(value.clone());
        }
    }
}

/// Exposes the keys of an [`AnchoredSetVariable`] as values, e.g. `ARGS_NAMES`.
///
/// Every translated value is `(name, key, key)`; its origins point at the key
/// instead of the value, assuming the key is followed by a one-byte separator.
#[derive(Debug, Clone, Copy)]
pub struct KeyNamesProxy<'a> {
    name: &'a str,
    source: &'a AnchoredSetVariable,
}

impl<'a> KeyNamesProxy<'a> {
    /// Expose the keys of `source` under `name`.
    pub fn new(name: &'a str, source: &'a AnchoredSetVariable) -> Self {
        Self { name, source }
    }

    /// Name of the proxy.
    pub fn name(&self) -> &str {
        self.name
    }

    /// See [`AnchoredSetVariable::resolve`].
    pub fn resolve(&self, out: &mut ValueList, exclusions: &KeyExclusions) {
        let mut found = ValueList::new();
        self.source.resolve(&mut found, exclusions);
        self.translate_into(found, out, true);
    }

    /// See [`AnchoredSetVariable::resolve_key`].
    pub fn resolve_key(&self, key: &str, out: &mut ValueList) {
        let mut found = ValueList::new();
        self.source.resolve_key(key, &mut found);
        self.translate_into(found, out, false);
    }

    /// See [`AnchoredSetVariable::resolve_regular_expression`].
    pub fn resolve_regular_expression(
        &self,
        pattern: &Regex,
        out: &mut ValueList,
        exclusions: &KeyExclusions,
    ) {
        let mut found = ValueList::new();
        self.source
            .resolve_regular_expression(pattern, &mut found, exclusions);
        self.translate_into(found, out, true);
    }

    /// The stored key matching `key`, in its original case.
    pub fn resolve_first(&self, key: &str) -> Option<String> {
        self.source
            .iter()
            .find(|v| v.key().eq_ignore_ascii_case(key))
            .map(|v| v.key().to_string())
    }

    fn translate_into(&self, found: ValueList, out: &mut ValueList, prepend: bool) {
        let mut translated: Vec<VariableValue> =
            found.into_iter().map(|v| self.translate(&v)).collect();
        if prepend {
            // keep the order the source produced
            while let Some(value) = translated.pop() {
                out.push_front(value);
            }
        } else {
            out.extend(translated);
        }
    }

    fn translate(&self, value: &VariableValue) -> VariableValue {
        let key = value.key();
        let mut translated = VariableValue::new(self.name, key, key);
        for origin in value.origins() {
            translated.add_origin(key.len(), origin.offset.saturating_sub(key.len() + 1));
        }
        translated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> AnchoredSetVariable {
        // id=1&name=bob&ID=2
        let mut args = AnchoredSetVariable::new("ARGS");
        args.set("id", "1", 3);
        args.set("name", "bob", 10);
        args.set("ID", "2", 17);
        args
    }

    #[test]
    fn test_set_records_origin() {
        let mut set = AnchoredSetVariable::new("ARGS");
        set.set("q", "abc", 2);
        set.set_with_len("r", "x", 9, 3);

        let values: Vec<_> = set.iter().collect();
        assert_eq!(values[0].origins()[0].to_string(), "v2,3");
        assert_eq!(values[1].origins()[0].to_string(), "v9,3");
        assert_eq!(values[0].key_with_collection(), "ARGS:q");
    }

    #[test]
    fn test_resolve_all_with_exclusions() {
        let mut exclusions = KeyExclusions::new();
        exclusions.add_key("name");

        let mut out = ValueList::new();
        args().resolve(&mut out, &exclusions);

        let values: Vec<_> = out.iter().map(|v| v.value().to_string()).collect();
        assert_eq!(values, vec!["2", "1"]);
    }

    #[test]
    fn test_resolve_key_is_case_insensitive() {
        let mut out = ValueList::new();
        args().resolve_key("Id", &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(args().resolve_first("iD"), Some("1"));
        assert_eq!(args().resolve_first("missing"), None);
    }

    #[test]
    fn test_resolve_regular_expression() {
        let mut exclusions = KeyExclusions::new();
        exclusions.add_key("ID");

        let mut out = ValueList::new();
        args().resolve_regular_expression(&Regex::new("^(?i)[in]").unwrap(), &mut out, &exclusions);
        assert_eq!(out.len(), 1);
        assert_eq!(out.first().map(VariableValue::key), Some("name"));
    }

    #[test]
    fn test_unset_clears() {
        let mut set = args();
        set.unset();
        assert!(set.is_empty());

        let mut out = ValueList::new();
        set.resolve(&mut out, &KeyExclusions::new());
        assert!(out.is_empty());
    }

    #[test]
    fn test_anchored_variable() {
        let mut var = AnchoredVariable::new("MATCHED_VAR");
        let mut out = ValueList::new();
        var.evaluate(&mut out);
        assert!(out.is_empty());

        var.set("attack", 4);
        var.evaluate(&mut out);
        assert_eq!(out.first().map(VariableValue::key_with_collection), Some("MATCHED_VAR"));
        assert_eq!(var.value(), Some("attack"));

        var.unset();
        assert_eq!(var.value(), None);

        let mut out = ValueList::new();
        var.set("", 0);
        var.evaluate(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_key_names_translation() {
        let set = args();
        let names = KeyNamesProxy::new("ARGS_NAMES", &set);

        let mut out = ValueList::new();
        names.resolve_key("name", &mut out);
        let value = out.first().unwrap();
        assert_eq!(value.key_with_collection(), "ARGS_NAMES:name");
        assert_eq!(value.value(), "name");
        // "name" starts at 5 in "id=1&name=bob"
        assert_eq!(value.origins()[0].to_string(), "v5,4");
    }

    #[test]
    fn test_key_names_resolve_keeps_existing_values() {
        let set = args();
        let names = KeyNamesProxy::new("ARGS_NAMES", &set);

        let mut out = ValueList::new();
        out.push(VariableValue::new("TX", "keep", "me"));
        names.resolve(&mut out, &KeyExclusions::new());

        assert_eq!(out.len(), 4);
        assert_eq!(out.iter().last().map(VariableValue::value), Some("me"));
        assert_eq!(names.resolve_first("NAME").as_deref(), Some("name"));
    }
}
