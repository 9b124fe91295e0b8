//! Collection entries with optional value and expiry.

use std::time::{Duration, Instant};

/// A stored entry.
///
/// An entry may hold only an expiry: the expiry can be set before any value
/// is stored. Such entries are invisible to reads.
#[derive(Debug, Clone, Default)]
pub struct CollectionEntry {
    value: Option<String>,
    expires_at: Option<Instant>,
}

impl CollectionEntry {
    /// Create an entry holding `value` with no expiry.
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            expires_at: None,
        }
    }

    /// Create an entry holding only an expiry.
    #[must_use]
    pub fn expiring(ttl: Duration) -> Self {
        let mut entry = Self::default();
        entry.set_expiry(ttl);
        entry
    }

    /// The stored value.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Whether a value is stored.
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Replace the value, keeping the expiry.
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = Some(value.into());
    }

    /// Expire the entry `ttl` from now.
    ///
    /// A TTL too large to represent means the entry never expires.
    pub fn set_expiry(&mut self, ttl: Duration) {
        self.expires_at = Instant::now().checked_add(ttl);
    }

    /// Whether the expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before expiry.
    pub fn expires_in(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// The value if the entry is live and holds one.
    pub fn live_value(&self) -> Option<&str> {
        if self.is_expired() {
            None
        } else {
            self.value()
        }
    }
}
