//! Feature Layout - Centralized Feature Definition
//!
//! **CRITICAL: This file controls the feature schema**
//!
//! ## Rules (NEVER break these):
//! 1. Add injection token → increment FEATURE_VERSION
//! 2. Change order → increment FEATURE_VERSION
//! 3. Remove token → increment FEATURE_VERSION
//!
//! The injection-character block is fixed at compile time. The bad-word
//! block depends on the configured word lists, so the full layout is built
//! once at startup and shared behind an `Arc`.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

// ============================================================================
// FEATURE VERSION
// ============================================================================

/// Current feature layout version
/// MUST be incremented when the injection table changes
pub const FEATURE_VERSION: u8 = 1;

// ============================================================================
// INJECTION CHARACTER TABLE (Authoritative source)
// ============================================================================

/// (feature name, substring token) in the exact order they appear in vectors
pub const INJECTION_CHARACTERS: &[(&str, &str)] = &[
    ("single_quote", "'"),
    ("double_quote", "\""),
    ("backtick", "`"),
    ("less_than", "<"),
    ("greater_than", ">"),
    ("left_parenthesis", "("),
    ("right_parenthesis", ")"),
    ("left_bracket", "["),
    ("right_bracket", "]"),
    ("left_brace", "{{"),
    ("right_brace", "}}"),
    ("dash", "-"),
    ("double_dash", "--"),
    ("hash", "#"),
    ("pipe", "|"),
    ("ampersand", "&"),
    ("dollar", "$"),
    ("percent", "%"),
    ("asterisk", "*"),
    ("exclamation_mark", "!"),
    ("equals", "="),
    ("logical_or", "||"),
    ("logical_and", "&&"),
    ("addition_operator", "+"),
    ("multiplication_operator", "*"),
    ("sql_comment_multi_line_open", "/*"),
    ("sql_comment_multi_line_close", "*/"),
    ("file_path_root", "/"),
    ("backslash", "\\"),
    ("colon", ":"),
    ("comma", ","),
    ("period", "."),
    ("caret", "^"),
    ("tilde", "~"),
    ("at_sign", "@"),
    ("carriage_return", "\r"),
    ("newline", "\n"),
    ("null_byte", "\0"),
    ("space", " "),
    ("hexadecimal_prefix", "0x"),
    ("percent_encoded", "%"),
];

/// Number of injection-character features
/// IMPORTANT: Must match INJECTION_CHARACTERS.len()!
pub const INJECTION_FEATURE_COUNT: usize = 41;

/// Flat bad-word feature key (anomaly mode)
pub const BADWORD_KEY: &str = "badword";

/// Prefix of per-category bad-word keys (threat type mode)
pub const BADWORD_CATEGORY_PREFIX: &str = "badword_";

// ============================================================================
// EXTRACTION MODE
// ============================================================================

/// Which model family the vector is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Injection counts + one aggregate `badword` count
    Anomaly,
    /// Injection counts + one `badword_<category>` count per category
    ThreatType,
}

// ============================================================================
// RUNTIME LAYOUT
// ============================================================================

/// Complete, ordered feature schema for one extraction mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub version: u8,
    pub mode: ExtractionMode,
    pub hash: u32,
    names: Vec<String>,
}

impl FeatureLayout {
    /// Flat anomaly layout: injection block + `badword`
    pub fn anomaly() -> Self {
        let mut names = injection_names();
        names.push(BADWORD_KEY.to_string());
        Self::from_names(ExtractionMode::Anomaly, names)
    }

    /// Threat type layout: injection block + one key per category (sorted)
    pub fn threat_type<S: AsRef<str>>(categories: &[S]) -> Self {
        let mut cats: Vec<&str> = categories.iter().map(|c| c.as_ref()).collect();
        cats.sort_unstable();
        cats.dedup();

        let mut names = injection_names();
        names.extend(cats.iter().map(|c| format!("{}{}", BADWORD_CATEGORY_PREFIX, c)));
        Self::from_names(ExtractionMode::ThreatType, names)
    }

    fn from_names(mode: ExtractionMode, names: Vec<String>) -> Self {
        Self {
            version: FEATURE_VERSION,
            mode,
            hash: compute_layout_hash(&names),
            names,
        }
    }

    /// Ordered feature names
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Total number of features
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get feature index by name (O(n) but features are few)
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Check compatibility with persisted/remote data
    pub fn is_compatible(&self, version: u8, hash: u32) -> bool {
        self.version == version && self.hash == hash
    }
}

fn injection_names() -> Vec<String> {
    INJECTION_CHARACTERS.iter().map(|(name, _)| name.to_string()).collect()
}

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// Compute CRC32 hash of a feature layout
/// Used to detect layout mismatches at runtime
pub fn compute_layout_hash(names: &[String]) -> u32 {
    let mut hasher = Hasher::new();

    hasher.update(&[FEATURE_VERSION]);

    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(&[0]); // Separator
    }

    hasher.finalize()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_injection_count() {
        assert_eq!(INJECTION_CHARACTERS.len(), INJECTION_FEATURE_COUNT);
    }

    #[test]
    fn test_injection_names_unique() {
        let mut names = injection_names();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), INJECTION_FEATURE_COUNT);
    }

    #[test]
    fn test_anomaly_layout() {
        let layout = FeatureLayout::anomaly();
        assert_eq!(layout.len(), INJECTION_FEATURE_COUNT + 1);
        assert_eq!(layout.index_of("single_quote"), Some(0));
        assert_eq!(layout.index_of(BADWORD_KEY), Some(INJECTION_FEATURE_COUNT));
        assert_eq!(layout.index_of("nonexistent"), None);
    }

    #[test]
    fn test_threat_layout_sorted_categories() {
        let layout = FeatureLayout::threat_type(&["xss", "sql", "command", "sql"]);
        let tail: Vec<&str> = layout.names()[INJECTION_FEATURE_COUNT..]
            .iter()
            .map(|s| s.as_str())
            .collect();
        assert_eq!(tail, vec!["badword_command", "badword_sql", "badword_xss"]);
    }

    #[test]
    fn test_layout_hash_differs_by_mode() {
        let a = FeatureLayout::anomaly();
        let b = FeatureLayout::threat_type(&["sql"]);
        assert_ne!(a.hash, b.hash);
        assert!(a.is_compatible(FEATURE_VERSION, a.hash));
        assert!(!a.is_compatible(FEATURE_VERSION + 1, a.hash));
    }
}
