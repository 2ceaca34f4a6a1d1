//! Candidate scoring.
//!
//! Combines weighted per-field similarities into one confidence for a pair of
//! records, plus the human-readable reasons a reviewer sees next to it.
//! Scoring is pure: identical inputs always give identical output, which is
//! what lets an audit answer "why was this flagged".

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::compare::compare;
use crate::config::MatchConfig;
use crate::error::ValidationError;
use crate::record::EntityRecord;

/// Presentation bucket for a confidence value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    /// Below 0.70.
    Unlikely,
    /// 0.70 to 0.79.
    Possible,
    /// 0.80 to 0.89.
    Likely,
    /// 0.90 and above.
    VeryLikely,
}

impl ConfidenceTier {
    /// Buckets a confidence value.
    #[must_use]
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.90 {
            Self::VeryLikely
        } else if confidence >= 0.80 {
            Self::Likely
        } else if confidence >= 0.70 {
            Self::Possible
        } else {
            Self::Unlikely
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlikely => write!(f, "unlikely"),
            Self::Possible => write!(f, "possible"),
            Self::Likely => write!(f, "likely"),
            Self::VeryLikely => write!(f, "very_likely"),
        }
    }
}

/// Per-field contribution to a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldScore {
    pub field: String,
    pub weight: f64,
    pub score: f64,
}

/// Result of scoring one record pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    /// Weighted mean of field scores, in [0, 1].
    pub confidence: f64,

    /// Reasons in field-name order. Non-empty whenever `confidence > 0`.
    pub reasons: Vec<String>,

    /// Every weighted field that was present on both sides.
    pub field_scores: Vec<FieldScore>,
}

impl ScoreOutcome {
    fn empty() -> Self {
        Self {
            confidence: 0.0,
            reasons: Vec::new(),
            field_scores: Vec::new(),
        }
    }

    #[must_use]
    pub fn tier(&self) -> ConfidenceTier {
        ConfidenceTier::from_confidence(self.confidence)
    }
}

fn reason_for(field: &str, score: f64) -> String {
    if score >= 1.0 {
        format!("{field} exact match")
    } else {
        // Truncate so a near miss never displays as 1.00.
        let shown = (score * 100.0 + 1e-9).floor() / 100.0;
        format!("{field} similarity {shown:.2}")
    }
}

/// Scores `a` against `b` using the weighted fields in `config`.
///
/// Fields missing from `config.weights` are ignored entirely. Weighted fields
/// missing on either record do not enter the denominator.
///
/// # Errors
/// `InvalidFieldType` if a weighted field holds values of different types on
/// the two records; `InvalidWeight` for a bad weight.
pub fn score(
    a: &EntityRecord,
    b: &EntityRecord,
    config: &MatchConfig,
) -> Result<ScoreOutcome, ValidationError> {
    let mut max_weight = 0.0f64;
    for (field, &weight) in &config.weights {
        if !weight.is_finite() || weight < 0.0 {
            return Err(ValidationError::InvalidWeight {
                field: field.clone(),
                weight,
            });
        }
        max_weight = max_weight.max(weight);
    }

    let mut weighted_sum = 0.0f64;
    let mut weight_total = 0.0f64;
    let mut field_scores = Vec::new();

    for (field, &weight) in &config.weights {
        let (Some(va), Some(vb)) = (a.field(field), b.field(field)) else {
            continue;
        };
        let s = compare(field, va, vb, &config.comparator)?;
        // Sum relative weights so very large configured weights cannot overflow.
        let relative = if max_weight > 0.0 { weight / max_weight } else { 0.0 };
        weighted_sum += relative * s;
        weight_total += relative;
        field_scores.push(FieldScore {
            field: field.clone(),
            weight,
            score: s,
        });
    }

    if weight_total <= 0.0 {
        return Ok(ScoreOutcome {
            field_scores,
            ..ScoreOutcome::empty()
        });
    }

    let ratio = weighted_sum / weight_total;
    let confidence = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };

    let mut reasons: Vec<String> = field_scores
        .iter()
        .filter(|fs| fs.weight > 0.0 && fs.score >= config.strong_signal_threshold)
        .map(|fs| reason_for(&fs.field, fs.score))
        .collect();

    if reasons.is_empty() && confidence > 0.0 {
        let contributing: Vec<&str> = field_scores
            .iter()
            .filter(|fs| fs.weight > 0.0 && fs.score > 0.0)
            .map(|fs| fs.field.as_str())
            .collect();
        reasons.push(format!("weak similarity across {}", contributing.join(", ")));
    }

    Ok(ScoreOutcome {
        confidence,
        reasons,
        field_scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::FieldValue;

    fn record(fields: &[(&str, FieldValue)]) -> EntityRecord {
        fields
            .iter()
            .fold(EntityRecord::new(), |r, (k, v)| r.with_field(*k, v.clone()))
    }

    fn phone_name_config() -> MatchConfig {
        MatchConfig::default()
            .with_weight("phone", 2.0)
            .with_weight("name", 1.0)
    }

    #[test]
    fn test_phone_and_name_example() {
        let a = record(&[
            ("phone", FieldValue::Phone("555-0123".into())),
            ("name", FieldValue::String("John Smith".into())),
        ]);
        let b = record(&[
            ("phone", FieldValue::Phone("5550123".into())),
            ("name", FieldValue::String("J. Smith".into())),
        ]);

        let outcome = score(&a, &b, &phone_name_config()).unwrap();
        let name = outcome
            .field_scores
            .iter()
            .find(|fs| fs.field == "name")
            .unwrap()
            .score;
        assert!(name < 0.8);
        let expected = (2.0 * 1.0 + name) / 3.0;
        assert!((outcome.confidence - expected).abs() < 1e-9);
        assert!(outcome.confidence > 0.8);
        assert_eq!(outcome.reasons, vec!["phone exact match".to_string()]);
    }

    #[test]
    fn test_unweighted_fields_are_ignored() {
        let a = record(&[
            ("phone", FieldValue::Phone("1".into())),
            ("email", FieldValue::String("a@x.com".into())),
        ]);
        let b = record(&[
            ("phone", FieldValue::Phone("1".into())),
            ("email", FieldValue::String("zzz@q.org".into())),
        ]);
        let config = MatchConfig::default().with_weight("phone", 1.0);
        let outcome = score(&a, &b, &config).unwrap();
        assert!((outcome.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(outcome.field_scores.len(), 1);
    }

    #[test]
    fn test_no_shared_weighted_fields_is_zero() {
        let a = record(&[("phone", FieldValue::Phone("1".into()))]);
        let b = record(&[("name", FieldValue::String("x".into()))]);
        let outcome = score(&a, &b, &phone_name_config()).unwrap();
        assert!(outcome.confidence.abs() < f64::EPSILON);
        assert!(outcome.reasons.is_empty());
    }

    #[test]
    fn test_weak_match_still_has_a_reason() {
        let a = record(&[("name", FieldValue::String("Johnathan".into()))]);
        let b = record(&[("name", FieldValue::String("Jonny".into()))]);
        let config = MatchConfig::default().with_weight("name", 1.0);
        let outcome = score(&a, &b, &config).unwrap();
        assert!(outcome.confidence > 0.0);
        assert!(outcome.confidence < 0.8);
        assert_eq!(outcome.reasons, vec!["weak similarity across name".to_string()]);
    }

    #[test]
    fn test_similarity_reason_format() {
        let a = record(&[("address", FieldValue::Address("1 a b c d".into()))]);
        let b = record(&[("address", FieldValue::Address("1 a b c d e".into()))]);
        let config = MatchConfig::default().with_weight("address", 1.0);
        let outcome = score(&a, &b, &config).unwrap();
        assert_eq!(outcome.reasons, vec!["address similarity 0.83".to_string()]);
    }

    #[test]
    fn test_raised_threshold_demotes_to_weak_reason() {
        let a = record(&[("address", FieldValue::Address("1 a b c d".into()))]);
        let b = record(&[("address", FieldValue::Address("1 a b c d e".into()))]);
        let config = MatchConfig::default()
            .with_weight("address", 1.0)
            .with_strong_signal_threshold(0.95);
        let outcome = score(&a, &b, &config).unwrap();
        assert_eq!(outcome.reasons, vec!["weak similarity across address".to_string()]);
    }

    #[test]
    fn test_lowered_threshold_admits_partial_name() {
        let a = record(&[
            ("phone", FieldValue::Phone("555-0123".into())),
            ("name", FieldValue::String("John Smith".into())),
        ]);
        let b = record(&[
            ("phone", FieldValue::Phone("5550123".into())),
            ("name", FieldValue::String("J. Smith".into())),
        ]);
        let config = phone_name_config().with_strong_signal_threshold(0.5);
        let outcome = score(&a, &b, &config).unwrap();
        assert_eq!(outcome.reasons.len(), 2);
        assert!(outcome.reasons[0].starts_with("name similarity 0."));
        assert_eq!(outcome.reasons[1], "phone exact match");
    }

    #[test]
    fn test_huge_weights_do_not_overflow() {
        let a = record(&[
            ("x", FieldValue::String("same".into())),
            ("y", FieldValue::String("same".into())),
        ]);
        let config = MatchConfig::default()
            .with_weight("x", 1e308)
            .with_weight("y", 1e308);
        let outcome = score(&a, &a.clone(), &config).unwrap();
        assert!((0.0..=1.0).contains(&outcome.confidence));
        assert!((outcome.confidence - 1.0).abs() < 1e-9);
        assert_eq!(outcome.reasons, vec!["x exact match".to_string(), "y exact match".to_string()]);
    }

    #[test]
    fn test_near_miss_is_not_shown_as_one() {
        assert_eq!(reason_for("name", 0.996), "name similarity 0.99");
        assert_eq!(reason_for("name", 1.0), "name exact match");
    }

    #[test]
    fn test_zero_weight_field_does_not_count() {
        let a = record(&[
            ("phone", FieldValue::Phone("1".into())),
            ("name", FieldValue::String("Ann".into())),
        ]);
        let b = a.clone();
        let config = MatchConfig::default()
            .with_weight("phone", 0.0)
            .with_weight("name", 0.0);
        let outcome = score(&a, &b, &config).unwrap();
        assert!(outcome.confidence.abs() < f64::EPSILON);
        assert!(outcome.reasons.is_empty());
    }

    #[test]
    fn test_mixed_types_error() {
        let a = record(&[("phone", FieldValue::Phone("1".into()))]);
        let b = record(&[("phone", FieldValue::Numeric(1.0))]);
        let config = MatchConfig::default().with_weight("phone", 1.0);
        assert!(matches!(
            score(&a, &b, &config),
            Err(ValidationError::InvalidFieldType { .. })
        ));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let a = record(&[
            ("phone", FieldValue::Phone("555-0123".into())),
            ("name", FieldValue::String("John Smith".into())),
        ]);
        let b = record(&[
            ("phone", FieldValue::Phone("5550123".into())),
            ("name", FieldValue::String("Jon Smith".into())),
        ]);
        let config = phone_name_config();
        let first = score(&a, &b, &config).unwrap();
        for _ in 0..10 {
            assert_eq!(score(&a, &b, &config).unwrap(), first);
        }
    }

    #[test]
    fn test_tiers() {
        assert_eq!(ConfidenceTier::from_confidence(0.95), ConfidenceTier::VeryLikely);
        assert_eq!(ConfidenceTier::from_confidence(0.88), ConfidenceTier::Likely);
        assert_eq!(ConfidenceTier::from_confidence(0.75), ConfidenceTier::Possible);
        assert_eq!(ConfidenceTier::from_confidence(0.5), ConfidenceTier::Unlikely);
    }
}
