//! Per-process in-memory collection backend.

use super::backend::Collection;
use super::entry::CollectionEntry;
use super::key::CollectionKey;
use crate::modules::waf::{KeyExclusions, ValueList, VariableValue};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::trace;

type EntryMap = HashMap<CollectionKey, Vec<CollectionEntry>>;

/// Default number of keys reserved up front.
pub const DEFAULT_CAPACITY: usize = 1000;

/// In-memory collection shared by every transaction of the process.
///
/// One writer or many readers at a time. Reads collect expired keys while
/// holding the read lock and delete them afterwards under the write lock,
/// re-checking expiry first since another thread may have refreshed them.
#[derive(Debug)]
pub struct InMemoryCollection {
    name: String,
    entries: RwLock<EntryMap>,
}

impl InMemoryCollection {
    /// Create an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_CAPACITY)
    }

    /// Create an empty collection with room for `capacity` keys.
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Number of distinct keys, including value-less and expired ones.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the collection holds no keys.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, EntryMap> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntryMap> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn del_if_expired(&self, key: &CollectionKey) {
        let mut entries = self.write();
        let expired = entries
            .get(key)
            .is_some_and(|bucket| bucket.iter().any(CollectionEntry::is_expired));
        if expired {
            trace!(collection = %self.name, key = %key, "removing expired key");
            entries.remove(key);
        }
    }

    fn purge(&self, expired: Vec<CollectionKey>) {
        for key in &expired {
            self.del_if_expired(key);
        }
    }
}

impl Collection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn store(&self, key: &str, value: &str) {
        self.write()
            .entry(CollectionKey::from(key))
            .or_default()
            .push(CollectionEntry::with_value(value));
    }

    fn store_or_update_first(&self, key: &str, value: &str) -> bool {
        let mut entries = self.write();
        let bucket = entries.entry(CollectionKey::from(key)).or_default();
        match bucket.first_mut() {
            Some(entry) => entry.set_value(value),
            None => bucket.push(CollectionEntry::with_value(value)),
        }
        true
    }

    fn update_first(&self, key: &str, value: &str) -> bool {
        let mut entries = self.write();
        match entries
            .get_mut(&CollectionKey::from(key))
            .and_then(|bucket| bucket.first_mut())
        {
            Some(entry) => {
                entry.set_value(value);
                true
            },
            None => false,
        }
    }

    fn del(&self, key: &str) {
        self.write().remove(&CollectionKey::from(key));
    }

    fn set_expiry(&self, key: &str, ttl: Duration) {
        let mut entries = self.write();
        let bucket = entries.entry(CollectionKey::from(key)).or_default();
        match bucket.first_mut() {
            Some(entry) => entry.set_expiry(ttl),
            None => bucket.push(CollectionEntry::expiring(ttl)),
        }
    }

    fn resolve_first(&self, key: &str) -> Option<String> {
        let mut expired = Vec::new();
        let mut found = None;

        {
            let entries = self.read();
            if let Some((stored, bucket)) = entries.get_key_value(&CollectionKey::from(key)) {
                for entry in bucket {
                    if entry.is_expired() {
                        expired.push(stored.clone());
                    } else if let Some(value) = entry.value() {
                        if found.is_none() {
                            found = Some(value.to_string());
                        }
                    }
                }
            }
        }

        self.purge(expired);
        found
    }

    fn resolve_single_match(&self, key: &str, out: &mut ValueList) {
        let mut expired = Vec::new();

        {
            let entries = self.read();
            if let Some((stored, bucket)) = entries.get_key_value(&CollectionKey::from(key)) {
                for entry in bucket {
                    if entry.is_expired() {
                        expired.push(stored.clone());
                    } else if let Some(value) = entry.value() {
                        out.push(VariableValue::new(&self.name, stored.as_str(), value));
                    }
                }
            }
        }

        self.purge(expired);
    }

    fn resolve_multi_matches(&self, key: &str, out: &mut ValueList, exclusions: &KeyExclusions) {
        let mut expired = Vec::new();

        {
            let entries = self.read();
            if key.is_empty() {
                for (stored, bucket) in entries.iter() {
                    if exclusions.to_omit(stored.as_str()) {
                        trace!(collection = %self.name, key = %stored, "excluding key");
                        continue;
                    }
                    for entry in bucket {
                        if entry.is_expired() {
                            expired.push(stored.clone());
                        } else if let Some(value) = entry.value() {
                            out.push_front(VariableValue::new(&self.name, stored.as_str(), value));
                        }
                    }
                }
            } else if let Some((stored, bucket)) =
                entries.get_key_value(&CollectionKey::from(key))
            {
                if exclusions.to_omit(key) {
                    trace!(collection = %self.name, key, "excluding key");
                } else {
                    for entry in bucket {
                        if entry.is_expired() {
                            expired.push(stored.clone());
                        } else if let Some(value) = entry.value() {
                            out.push_front(VariableValue::new(&self.name, key, value));
                        }
                    }
                }
            }
        }

        self.purge(expired);
    }

    fn resolve_regular_expression(
        &self,
        pattern: &Regex,
        out: &mut ValueList,
        exclusions: &KeyExclusions,
    ) {
        let mut expired = Vec::new();

        {
            let entries = self.read();
            for (stored, bucket) in entries.iter() {
                if !pattern.is_match(stored.as_str()) {
                    continue;
                }
                if exclusions.to_omit(stored.as_str()) {
                    trace!(collection = %self.name, key = %stored, "excluding key");
                    continue;
                }
                for entry in bucket {
                    if entry.is_expired() {
                        expired.push(stored.clone());
                    } else if let Some(value) = entry.value() {
                        out.push_front(VariableValue::new(&self.name, stored.as_str(), value));
                    }
                }
            }
        }

        self.purge(expired);
    }

    fn contains(&self, key: &str) -> bool {
        self.read().contains_key(&CollectionKey::from(key))
    }
}
