//! Resolved variable values and the byte ranges they came from.

use std::collections::vec_deque::{self, VecDeque};
use std::fmt;

/// Byte range inside an input buffer that produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableOrigin {
    /// Length of the range in bytes.
    pub length: usize,

    /// Offset of the range in bytes.
    pub offset: usize,
}

impl VariableOrigin {
    /// Create a new origin.
    #[must_use]
    pub fn new(length: usize, offset: usize) -> Self {
        Self { length, offset }
    }
}

impl fmt::Display for VariableOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{},{}", self.offset, self.length)
    }
}

/// A single value produced by resolving a variable.
///
/// Values are built once by a resolver and handed to the caller by move.
/// Only the origin list may grow after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableValue {
    collection: String,
    key: String,
    key_with_collection: String,
    value: String,
    origins: Vec<VariableOrigin>,
}

impl VariableValue {
    /// Create a keyed value, e.g. `ARGS:id`.
    pub fn new(
        collection: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let collection = collection.into();
        let key = key.into();
        let key_with_collection = if key.is_empty() {
            collection.clone()
        } else {
            format!("{collection}:{key}")
        };

        Self {
            collection,
            key,
            key_with_collection,
            value: value.into(),
            origins: Vec::new(),
        }
    }

    /// Create a value without a key, e.g. `REQUEST_URI`.
    pub fn keyless(collection: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(collection, String::new(), value)
    }

    /// Builder: attach an origin.
    #[must_use]
    pub fn with_origin(mut self, length: usize, offset: usize) -> Self {
        self.add_origin(length, offset);
        self
    }

    /// Append an origin.
    pub fn add_origin(&mut self, length: usize, offset: usize) {
        self.origins.push(VariableOrigin::new(length, offset));
    }

    /// Name of the collection the value belongs to.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Key inside the collection (empty for single-valued variables).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `COLLECTION:key`, or just `COLLECTION` for keyless values.
    pub fn key_with_collection(&self) -> &str {
        &self.key_with_collection
    }

    /// The value itself.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Origins in the order they were added.
    pub fn origins(&self) -> &[VariableOrigin] {
        &self.origins
    }

    /// Consume the value and return its content.
    pub fn into_value(self) -> String {
        self.value
    }
}

/// Owned list of values produced by one resolution step.
///
/// The list is moved from the resolver to the caller, which drains it.
/// Multi-match resolvers prepend, so the most recently visited entry comes
/// first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueList {
    values: VecDeque<VariableValue>,
}

impl ValueList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty list with room for `capacity` values.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a value.
    pub fn push(&mut self, value: VariableValue) {
        self.values.push_back(value);
    }

    /// Prepend a value.
    pub fn push_front(&mut self, value: VariableValue) {
        self.values.push_front(value);
    }

    /// Move every value of `other` to the end of this list.
    pub fn append(&mut self, other: &mut ValueList) {
        self.values.append(&mut other.values);
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First value, if any.
    #[must_use]
    pub fn first(&self) -> Option<&VariableValue> {
        self.values.front()
    }

    /// Iterate over the values.
    pub fn iter(&self) -> vec_deque::Iter<'_, VariableValue> {
        self.values.iter()
    }

    /// Keep only the values matching `f`.
    pub fn retain(&mut self, f: impl FnMut(&VariableValue) -> bool) {
        self.values.retain(f);
    }

    /// Drop every value.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl IntoIterator for ValueList {
    type Item = VariableValue;
    type IntoIter = vec_deque::IntoIter<VariableValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValueList {
    type Item = &'a VariableValue;
    type IntoIter = vec_deque::Iter<'a, VariableValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

impl FromIterator<VariableValue> for ValueList {
    fn from_iter<I: IntoIterator<Item = VariableValue>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl Extend<VariableValue> for ValueList {
    fn extend<I: IntoIterator<Item = VariableValue>>(&mut self, iter: I) {
        self.values.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_with_collection() {
        let value = VariableValue::new("ARGS", "id", "1");
        assert_eq!(value.key_with_collection(), "ARGS:id");

        let value = VariableValue::keyless("REQUEST_URI", "/index");
        assert_eq!(value.key_with_collection(), "REQUEST_URI");
        assert_eq!(value.key(), "");
    }

    #[test]
    fn test_origins_accumulate() {
        let mut value = VariableValue::new("ARGS", "q", "abc").with_origin(3, 10);
        value.add_origin(2, 20);

        assert_eq!(value.origins().len(), 2);
        assert_eq!(value.origins()[0].to_string(), "v10,3");
        assert_eq!(value.origins()[1].to_string(), "v20,2");
    }

    #[test]
    fn test_value_list_push_front() {
        let mut list = ValueList::new();
        list.push(VariableValue::new("TX", "a", "1"));
        list.push_front(VariableValue::new("TX", "b", "2"));

        let keys: Vec<_> = list.iter().map(|v| v.key().to_string()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(list.first().map(VariableValue::value), Some("2"));
    }

    #[test]
    fn test_value_list_drain_by_move() {
        let list: ValueList = (0..3)
            .map(|i| VariableValue::new("TX", i.to_string(), "v"))
            .collect();

        let drained: Vec<VariableValue> = list.into_iter().collect();
        assert_eq!(drained.len(), 3);
    }
}
