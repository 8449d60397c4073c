//! Title normalization shared by the preview resolver and guess judging.
//!
//! Two operations live here:
//! - [`normalize`] builds a comparison key (lowercase ASCII letters and digits only)
//! - [`clean_for_query`] strips version noise ("- 2009 Remaster", "(Live)") from a title
//!
//! CRITICAL: the resolver and the game session both compare keys produced here.
//! A change to either function changes what counts as "the same song".

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Trailing dash suffix: "Rio - 2009 Remaster", "Song – Live".
/// Requires whitespace on both sides so hyphenated words ("Anti-Hero") survive.
pub static DASH_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+[-–—]\s+.*$").unwrap());

/// Any parenthesized or bracketed group: "(Live)", "[2009 Remaster]", "(feat. X)".
pub static BRACKET_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*(?:\([^)]*\)|\[[^\]]*\])").unwrap());

/// Regex to collapse multiple whitespace into single space
pub static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

// ============================================================================
// COMPARISON KEYS
// ============================================================================

/// Canonical comparison key: lowercase, then drop every character that is not
/// an ASCII letter or digit.
///
/// Total and idempotent. Non-Latin titles collapse to an empty or near-empty key;
/// see [`ComparisonStrategy::Transliterate`] for the opt-in alternative.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Removes a trailing " - <anything>" suffix and every bracketed group, then trims.
///
/// Used for the outbound search term and, independently, on every returned
/// candidate title before comparison.
pub fn clean_for_query(title: &str) -> String {
    let without_suffix = DASH_SUFFIX.replace(title, "");
    let without_groups = BRACKET_GROUP.replace_all(&without_suffix, "");
    MULTI_SPACE
        .replace_all(without_groups.trim(), " ")
        .into_owned()
}

pub fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036F}' | '\u{1AB0}'..='\u{1AFF}' |
             '\u{1DC0}'..='\u{1DFF}' | '\u{20D0}'..='\u{20FF}' |
             '\u{FE20}'..='\u{FE2F}')
}

pub fn fold_to_ascii(s: &str) -> String {
    // First strip diacritics via NFKD decomposition
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    // Then transliterate any remaining non-ASCII (Cyrillic, Hebrew, CJK, etc.)
    any_ascii(&stripped).to_lowercase()
}

/// How free text is turned into a comparison key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStrategy {
    /// [`normalize`] as-is. Non-ASCII characters are discarded.
    #[default]
    AsciiStrict,
    /// Fold diacritics and transliterate other scripts before [`normalize`],
    /// so "Beyoncé" keys as "beyonce" and Cyrillic titles keep their letters.
    Transliterate,
}

impl ComparisonStrategy {
    pub fn key(self, text: &str) -> String {
        match self {
            ComparisonStrategy::AsciiStrict => normalize(text),
            ComparisonStrategy::Transliterate => normalize(&fold_to_ascii(text)),
        }
    }
}
