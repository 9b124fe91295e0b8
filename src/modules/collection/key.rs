//! Case-insensitive collection keys and compartment composition.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Separator between compartments and the key.
pub const COMPARTMENT_SEPARATOR: &str = "::";

/// A collection key that compares and hashes ASCII case-insensitively but
/// keeps the case it was created with.
#[derive(Debug, Clone)]
pub struct CollectionKey(String);

impl CollectionKey {
    /// Create a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key.
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Whether `other` names the same key.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq for CollectionKey {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.0)
    }
}

impl Eq for CollectionKey {}

impl Hash for CollectionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl From<&str> for CollectionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for CollectionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for CollectionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compose `compartment[::compartment2]::key`.
pub fn nkey(compartments: &[&str], key: &str) -> String {
    let mut composed = String::with_capacity(
        compartments.iter().map(|c| c.len() + 2).sum::<usize>() + key.len(),
    );
    for compartment in compartments {
        composed.push_str(compartment);
        composed.push_str(COMPARTMENT_SEPARATOR);
    }
    composed.push_str(key);
    composed
}
