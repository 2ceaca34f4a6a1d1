//! Error types for reconcile.
//!
//! All errors are strongly typed using thiserror so callers can pattern match
//! on the exact failure and decide between retrying and aborting without
//! re-deriving state. Nothing in the engine panics on bad input; every failure
//! is one of these values.

use thiserror::Error;

use crate::plan::PlanHash;
use crate::record::{FieldType, RecordId};
use crate::storage::StorageError;

/// Validation errors caused by caller input or configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Field '{field}' of type {field_type} does not support {operation}")]
    InvalidFieldType {
        field: String,
        field_type: FieldType,
        operation: String,
    },

    #[error("Weight for field '{field}' must be finite and non-negative, got {weight}")]
    InvalidWeight {
        field: String,
        weight: f64,
    },

    #[error("{name} value {value} is out of range [0.0, 1.0]")]
    ThresholdOutOfRange {
        name: &'static str,
        value: f64,
    },

    #[error("More than one resolution directive for field '{field}'")]
    DuplicateDirective {
        field: String,
    },

    #[error("Directive targets field '{field}' which neither record has")]
    UnknownDirectiveField {
        field: String,
    },

    #[error("Merge actor cannot be empty")]
    EmptyActor,

    #[error("Record {id} cannot be merged into itself")]
    SelfMerge {
        id: RecordId,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Merge outcomes that stop a plan from being applied.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Plan {plan_hash} for {primary_id} <- {duplicate_id} has unresolved fields: {}", .fields.join(", "))]
    UnresolvedConflict {
        primary_id: RecordId,
        duplicate_id: RecordId,
        fields: Vec<String>,
        plan_hash: PlanHash,
    },

    #[error("Record {record_id} changed since plan {plan_hash} was built: {reason}")]
    StaleRecordState {
        record_id: RecordId,
        plan_hash: PlanHash,
        reason: String,
    },

    #[error("Concurrent modification of record {record_id} (expected version {expected_version}, found {actual_version}) while applying plan {plan_hash}")]
    ConcurrentModification {
        record_id: RecordId,
        plan_hash: PlanHash,
        expected_version: u64,
        actual_version: u64,
    },

    #[error("Record {record_id} is already merged into {merged_into}")]
    AlreadyMerged {
        record_id: RecordId,
        merged_into: RecordId,
    },

    #[error("Record not found: {id}")]
    RecordNotFound {
        id: RecordId,
    },
}

/// Top-level error type for reconcile.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ReconcileError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub const fn is_merge(&self) -> bool {
        matches!(self, Self::Merge(_))
    }

    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if re-fetching, re-planning and retrying may succeed.
    ///
    /// The engine itself never retries; this only informs the caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Merge(e) => matches!(
                e,
                MergeError::StaleRecordState { .. } | MergeError::ConcurrentModification { .. }
            ),
            Self::Storage(e) => matches!(e, StorageError::VersionConflict { .. }),
            Self::Validation(_) | Self::Internal { .. } => false,
        }
    }

    /// Returns true if the error indicates a caller or collaborator bug, such as
    /// a merged record leaking into a population.
    #[must_use]
    pub const fn is_logic_error(&self) -> bool {
        matches!(self, Self::Merge(MergeError::AlreadyMerged { .. }))
    }
}

/// Result type alias for reconcile operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> PlanHash {
        PlanHash::from_bytes([7u8; 32])
    }

    #[test]
    fn test_invalid_field_type_message() {
        let err = ValidationError::InvalidFieldType {
            field: "email".to_string(),
            field_type: FieldType::String,
            operation: "merge-union".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("email"));
        assert!(msg.contains("string"));
        assert!(msg.contains("merge-union"));
    }

    #[test]
    fn test_unresolved_conflict_lists_fields() {
        let err = MergeError::UnresolvedConflict {
            primary_id: RecordId::new(),
            duplicate_id: RecordId::new(),
            fields: vec!["email".to_string(), "phone".to_string()],
            plan_hash: hash(),
        };
        let msg = err.to_string();
        assert!(msg.contains("email, phone"));
        assert!(msg.contains(&hash().to_string()));
    }

    #[test]
    fn test_retryable_classification() {
        let stale: ReconcileError = MergeError::StaleRecordState {
            record_id: RecordId::new(),
            plan_hash: hash(),
            reason: "version drift".to_string(),
        }
        .into();
        assert!(stale.is_merge());
        assert!(stale.is_retryable());

        let concurrent: ReconcileError = MergeError::ConcurrentModification {
            record_id: RecordId::new(),
            plan_hash: hash(),
            expected_version: 1,
            actual_version: 2,
        }
        .into();
        assert!(concurrent.is_retryable());

        let unresolved: ReconcileError = MergeError::UnresolvedConflict {
            primary_id: RecordId::new(),
            duplicate_id: RecordId::new(),
            fields: vec!["email".to_string()],
            plan_hash: hash(),
        }
        .into();
        assert!(!unresolved.is_retryable());

        let validation: ReconcileError = ValidationError::EmptyActor.into();
        assert!(validation.is_validation());
        assert!(!validation.is_retryable());
    }

    #[test]
    fn test_already_merged_is_logic_error() {
        let err: ReconcileError = MergeError::AlreadyMerged {
            record_id: RecordId::new(),
            merged_into: RecordId::new(),
        }
        .into();
        assert!(err.is_logic_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_internal_error() {
        let err = ReconcileError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unexpected state"));
    }
}
