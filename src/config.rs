//! Matching configuration.
//!
//! Every tunable the engine reads is carried here as an explicit value handed
//! in by the host. There is no process-wide state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compare::normalize_text;
use crate::error::{ReconcileResult, ValidationError};

/// Default minimum confidence for a record to be reported as a candidate.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.70;

/// Default per-field score at which a field is cited as a match reason.
pub const DEFAULT_STRONG_SIGNAL_THRESHOLD: f64 = 0.80;

/// Default date tolerance, in days, for partial date credit.
pub const DEFAULT_DATE_TOLERANCE_DAYS: u32 = 1;

/// Tunables for the field comparators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparatorConfig {
    /// Dates further apart than this score 0. Within the window the score decays
    /// linearly from 1.0 (same day).
    pub date_tolerance_days: u32,

    /// Address token rewrites applied before the token-set comparison,
    /// e.g. `"st" -> "street"`. Keys and values are case- and accent-folded
    /// before matching.
    pub address_synonyms: BTreeMap<String, String>,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            date_tolerance_days: DEFAULT_DATE_TOLERANCE_DAYS,
            address_synonyms: BTreeMap::new(),
        }
    }
}

impl ComparatorConfig {
    /// Registers an address synonym.
    #[must_use]
    pub fn with_address_synonym(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.address_synonyms
            .insert(normalize_text(&from.into()), normalize_text(&to.into()));
        self
    }
}

/// Scoring and filtering configuration for duplicate detection.
///
/// Fields absent from `weights` are not compared at all.
///
/// # Examples
///
/// ```
/// use reconcile::MatchConfig;
///
/// let config = MatchConfig::default()
///     .with_weight("phone", 2.0)
///     .with_weight("name", 1.0)
///     .with_min_confidence(0.75);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Field name to non-negative weight.
    pub weights: BTreeMap<String, f64>,

    /// Minimum confidence for a candidate to be reported.
    pub min_confidence: f64,

    /// Minimum per-field score for the field to appear in match reasons.
    pub strong_signal_threshold: f64,

    /// Comparator tunables.
    pub comparator: ComparatorConfig,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            weights: BTreeMap::new(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            strong_signal_threshold: DEFAULT_STRONG_SIGNAL_THRESHOLD,
            comparator: ComparatorConfig::default(),
        }
    }
}

impl MatchConfig {
    /// Parses a configuration from JSON. Missing keys take their defaults.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for malformed JSON, or the first validation
    /// failure of the decoded values.
    pub fn from_json(json: &str) -> ReconcileResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("invalid match config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_weight(mut self, field: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(field.into(), weight);
        self
    }

    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    #[must_use]
    pub fn with_strong_signal_threshold(mut self, threshold: f64) -> Self {
        self.strong_signal_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_comparator(mut self, comparator: ComparatorConfig) -> Self {
        self.comparator = comparator;
        self
    }

    /// Checks weights and thresholds.
    ///
    /// # Errors
    /// `InvalidWeight` for negative or non-finite weights, `ThresholdOutOfRange`
    /// for thresholds outside [0, 1].
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, &weight) in &self.weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ValidationError::InvalidWeight {
                    field: field.clone(),
                    weight,
                });
            }
        }
        check_unit_interval("min_confidence", self.min_confidence)?;
        check_unit_interval("strong_signal_threshold", self.strong_signal_threshold)?;
        Ok(())
    }
}

fn check_unit_interval(name: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::ThresholdOutOfRange { name, value })
    }
}
