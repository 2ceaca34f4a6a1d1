//! Field comparators.
//!
//! Each comparator maps a pair of same-typed values to a similarity in [0, 1].
//! Dispatch is an exhaustive match on [`FieldValue`]; comparing values of
//! different types is a caller error rather than a zero score.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::config::ComparatorConfig;
use crate::error::ValidationError;
use crate::record::FieldValue;

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").expect("token pattern is valid"))
}

/// Lowercases, trims, strips diacritics and collapses inner whitespace.
#[must_use]
pub fn normalize_text(s: &str) -> String {
    let folded: String = s
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keeps only ASCII digits.
#[must_use]
pub fn phone_digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let score = intersection as f64 / union as f64;
    score
}

/// Synonym table folded the same way address tokens are, so entries loaded
/// from JSON match regardless of case or accents.
fn normalized_synonyms(config: &ComparatorConfig) -> BTreeMap<String, String> {
    config
        .address_synonyms
        .iter()
        .map(|(from, to)| (normalize_text(from), normalize_text(to)))
        .filter(|(from, _)| !from.is_empty())
        .collect()
}

fn address_tokens(s: &str, synonyms: &BTreeMap<String, String>) -> BTreeSet<String> {
    let normalized = normalize_text(s);
    token_regex()
        .find_iter(&normalized)
        .map(|m| {
            let token = m.as_str();
            synonyms
                .get(token)
                .cloned()
                .unwrap_or_else(|| token.to_string())
        })
        .collect()
}

/// Normalized Levenshtein similarity: `1 - distance / max(len_a, len_b)`.
#[must_use]
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    match (a.is_empty(), b.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => strsim::normalized_levenshtein(&a, &b),
    }
}

/// Categorical phone equality on digits. Numbers with no digits never match.
#[must_use]
pub fn phone_similarity(a: &str, b: &str) -> f64 {
    let a = phone_digits(a);
    if a.is_empty() {
        return 0.0;
    }
    if a == phone_digits(b) {
        1.0
    } else {
        0.0
    }
}

/// Linear decay from 1.0 at the same day to 0 just past the tolerance window.
#[must_use]
pub fn date_similarity(a: chrono::NaiveDate, b: chrono::NaiveDate, tolerance_days: u32) -> f64 {
    let days = (a - b).num_days().unsigned_abs();
    if days == 0 {
        return 1.0;
    }
    let window = u64::from(tolerance_days);
    if days > window {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let score = 1.0 - days as f64 / (window + 1) as f64;
    score
}

/// Token-set Jaccard similarity of two addresses.
#[must_use]
pub fn address_similarity(a: &str, b: &str, config: &ComparatorConfig) -> f64 {
    let synonyms = normalized_synonyms(config);
    jaccard(&address_tokens(a, &synonyms), &address_tokens(b, &synonyms))
}

/// Relative closeness of two numbers.
#[must_use]
pub fn numeric_similarity(a: f64, b: f64) -> f64 {
    if !a.is_finite() || !b.is_finite() {
        return 0.0;
    }
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        return 1.0;
    }
    (1.0 - (a - b).abs() / scale).clamp(0.0, 1.0)
}

/// Jaccard similarity of two label sets after text normalization.
#[must_use]
pub fn set_similarity(a: &[String], b: &[String]) -> f64 {
    let norm = |items: &[String]| -> BTreeSet<String> {
        items
            .iter()
            .map(|s| normalize_text(s))
            .filter(|s| !s.is_empty())
            .collect()
    };
    jaccard(&norm(a), &norm(b))
}

/// Compares two values of the same field.
///
/// # Errors
/// `InvalidFieldType` if the two values are of different types.
pub fn compare(
    field: &str,
    a: &FieldValue,
    b: &FieldValue,
    config: &ComparatorConfig,
) -> Result<f64, ValidationError> {
    let score = match (a, b) {
        (FieldValue::String(x), FieldValue::String(y)) => string_similarity(x, y),
        (FieldValue::Phone(x), FieldValue::Phone(y)) => phone_similarity(x, y),
        (FieldValue::Date(x), FieldValue::Date(y)) => {
            date_similarity(*x, *y, config.date_tolerance_days)
        }
        (FieldValue::Address(x), FieldValue::Address(y)) => address_similarity(x, y, config),
        (FieldValue::Numeric(x), FieldValue::Numeric(y)) => numeric_similarity(*x, *y),
        (FieldValue::Set(x), FieldValue::Set(y)) => set_similarity(x, y),
        _ => {
            return Err(ValidationError::InvalidFieldType {
                field: field.to_string(),
                field_type: a.field_type(),
                operation: format!("comparison with a {} value", b.field_type()),
            })
        }
    };
    Ok(score)
}

/// Compares possibly-missing values; a missing side scores 0.
///
/// # Errors
/// `InvalidFieldType` if both values are present but of different types.
pub fn compare_optional(
    field: &str,
    a: Option<&FieldValue>,
    b: Option<&FieldValue>,
    config: &ComparatorConfig,
) -> Result<f64, ValidationError> {
    match (a, b) {
        (Some(a), Some(b)) => compare(field, a, b, config),
        _ => Ok(0.0),
    }
}
