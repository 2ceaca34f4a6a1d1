//! Duplicate finder.
//!
//! A linear scan of a population against one reference record. Population
//! sizes for manual review are small, so no index is kept; callers only see
//! the ranked output, which leaves room for an indexed implementation later.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::MatchConfig;
use crate::error::{MergeError, ReconcileResult, ValidationError};
use crate::record::{EntityRecord, RecordId, RecordStatus};
use crate::scoring::{score, ConfidenceTier};

/// A record flagged as a possible duplicate of a reference record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    /// The compared record.
    pub candidate_id: RecordId,

    /// Weighted confidence in [0, 1].
    pub confidence: f64,

    /// Presentation bucket for `confidence`.
    pub tier: ConfidenceTier,

    /// Human-readable match reasons.
    pub matched_reasons: Vec<String>,
}

/// Finds and ranks candidates for `reference` in `population`.
///
/// The reference itself and every merged record are skipped. A record whose
/// value for a weighted field has a different type than the reference's is
/// skipped with a warning. Candidates are ordered by descending confidence;
/// ties go to the earlier-created record, then to the smaller id.
///
/// # Errors
/// - `AlreadyMerged` if `reference` is itself merged.
/// - Validation errors from the config.
pub fn find_duplicates(
    reference: &EntityRecord,
    population: &[EntityRecord],
    config: &MatchConfig,
) -> ReconcileResult<Vec<DuplicateCandidate>> {
    config.validate()?;

    if let RecordStatus::Merged { merged_into } = reference.status {
        return Err(MergeError::AlreadyMerged {
            record_id: reference.id,
            merged_into,
        }
        .into());
    }

    let mut scored: Vec<(&EntityRecord, DuplicateCandidate)> = Vec::new();
    for record in population {
        if record.id == reference.id {
            continue;
        }
        if let Some(target) = record.merged_into() {
            debug!(record_id = %record.id, merged_into = %target, "skipping merged record");
            continue;
        }

        let outcome = match score(reference, record, config) {
            Ok(outcome) => outcome,
            Err(err @ ValidationError::InvalidFieldType { .. }) => {
                warn!(record_id = %record.id, error = %err, "skipping record with mismatched field type");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if outcome.confidence < config.min_confidence {
            continue;
        }
        let tier = outcome.tier();
        scored.push((
            record,
            DuplicateCandidate {
                candidate_id: record.id,
                confidence: outcome.confidence,
                tier,
                matched_reasons: outcome.reasons,
            },
        ));
    }

    scored.sort_by(|(ra, ca), (rb, cb)| {
        cb.confidence
            .partial_cmp(&ca.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| ra.created_at.cmp(&rb.created_at))
            .then_with(|| ra.id.cmp(&rb.id))
    });

    debug!(
        reference_id = %reference.id,
        population = population.len(),
        candidates = scored.len(),
        "duplicate scan complete"
    );

    Ok(scored.into_iter().map(|(_, c)| c).collect())
}
