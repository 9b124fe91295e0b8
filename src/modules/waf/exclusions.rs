//! Key exclusions applied while resolving multi-valued variables.

use regex::Regex;

/// Keys to drop from a multi-value resolution.
///
/// Exact keys compare ASCII case-insensitively; patterns are searched
/// anywhere in the key.
#[derive(Debug, Clone, Default)]
pub struct KeyExclusions {
    keys: Vec<String>,
    patterns: Vec<Regex>,
}

impl KeyExclusions {
    /// Create an empty exclusion set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude an exact key.
    pub fn add_key(&mut self, key: impl Into<String>) {
        self.keys.push(key.into());
    }

    /// Exclude every key matching `pattern`.
    pub fn add_pattern(&mut self, pattern: Regex) {
        self.patterns.push(pattern);
    }

    /// Whether `key` must be omitted.
    #[must_use]
    pub fn to_omit(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k.eq_ignore_ascii_case(key))
            || self.patterns.iter().any(|p| p.is_match(key))
    }

    /// Whether nothing is excluded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.patterns.is_empty()
    }

    /// Number of exclusion entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len() + self.patterns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_key_is_case_insensitive() {
        let mut exclusions = KeyExclusions::new();
        exclusions.add_key("Session_Id");

        assert!(exclusions.to_omit("session_id"));
        assert!(exclusions.to_omit("SESSION_ID"));
        assert!(!exclusions.to_omit("session"));
    }

    #[test]
    fn test_pattern_exclusion() {
        let mut exclusions = KeyExclusions::new();
        exclusions.add_pattern(Regex::new("^utm_").unwrap());

        assert!(exclusions.to_omit("utm_source"));
        assert!(!exclusions.to_omit("source_utm"));
        assert_eq!(exclusions.len(), 1);
    }

    #[test]
    fn test_empty_omits_nothing() {
        let exclusions = KeyExclusions::new();
        assert!(exclusions.is_empty());
        assert!(!exclusions.to_omit("anything"));
    }
}
