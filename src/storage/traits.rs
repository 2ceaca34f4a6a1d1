//! Abstract storage traits for reconcile.
//!
//! The engine never owns records. Hosts plug their persistence in through
//! [`RecordStore`]; the only write the engine performs is
//! [`RecordStore::compare_and_swap`], which must apply a whole merge or none
//! of it.

use thiserror::Error;

use crate::audit::MergeAuditEvent;
use crate::record::{EntityRecord, RecordId};

/// Maximum `merged_into` hops followed by [`RecordStore::resolve`].
pub const MAX_RESOLVE_HOPS: usize = 128;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Record not found.
    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The stored version differs from the one the writer expected.
    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: RecordId,
        expected: u64,
        actual: u64,
    },

    /// A swap that does not describe a well-formed merge.
    #[error("Invalid merge target: {0}")]
    InvalidMergeTarget(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// The complete set of writes for one merge.
///
/// `primary` and `duplicate` are the post-merge states. The store applies them
/// only if both stored records still carry the expected versions.
#[derive(Debug, Clone)]
pub struct MergeSwap {
    pub primary: EntityRecord,
    pub duplicate: EntityRecord,
    pub expected_primary_version: u64,
    pub expected_duplicate_version: u64,
    pub event: MergeAuditEvent,
}

/// What the store did besides the two records named in the swap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapReceipt {
    /// Records previously merged into the duplicate, now pointing at the primary.
    pub repointed: Vec<RecordId>,
}

/// Storage trait for deduplicated records.
///
/// # Safety Considerations
/// - `compare_and_swap` must be atomic with respect to every other write
/// - Records are never physically removed
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Returns error if ID already exists.
    fn insert(&self, record: EntityRecord) -> Result<(), StorageError>;

    /// Get a record by ID, without following merges.
    fn get(&self, id: RecordId) -> Result<Option<EntityRecord>, StorageError>;

    /// List every record, merged ones included, in insertion order.
    fn list(&self) -> Result<Vec<EntityRecord>, StorageError>;

    /// Replace an active record with an edited copy.
    ///
    /// # Errors
    /// - `RecordNotFound` if the record does not exist
    /// - `BackendError` if the record is merged, the edit changes status, or the
    ///   version does not increase
    fn update(&self, record: EntityRecord) -> Result<(), StorageError>;

    /// Atomically apply a merge: write both records, re-point records that were
    /// merged into the duplicate, and append the audit event.
    ///
    /// # Errors
    /// - `VersionConflict` if either stored version differs from the expected one;
    ///   nothing is written in that case
    /// - `RecordNotFound` if either record is missing
    /// - `InvalidMergeTarget` if the swap does not mark the duplicate as merged
    ///   into the primary
    fn compare_and_swap(&self, swap: MergeSwap) -> Result<SwapReceipt, StorageError>;

    /// All audit events, oldest first.
    fn audit_log(&self) -> Result<Vec<MergeAuditEvent>, StorageError>;

    /// Retrieve the record snapshot for an exact version.
    fn get_at_version(&self, id: RecordId, version: u64) -> Result<Option<EntityRecord>, StorageError>;

    /// List all stored versions for a record (ascending by version).
    fn list_versions(&self, id: RecordId) -> Result<Vec<EntityRecord>, StorageError>;

    /// Follow `merged_into` links from `id` to the surviving active record.
    ///
    /// Returns `Ok(None)` if `id` (or a link target) does not exist.
    fn resolve(&self, id: RecordId) -> Result<Option<EntityRecord>, StorageError> {
        let mut current = id;
        for _ in 0..MAX_RESOLVE_HOPS {
            let Some(record) = self.get(current)? else {
                return Ok(None);
            };
            match record.merged_into() {
                None => return Ok(Some(record)),
                Some(next) if next == current => {
                    return Err(StorageError::BackendError(
                        "record merge map contains a self-cycle".to_string(),
                    ));
                }
                Some(next) => current = next,
            }
        }

        Err(StorageError::BackendError(
            "record merge map resolution exceeded hop limit".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_record_store_object_safe(_: &dyn RecordStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::RecordNotFound(RecordId::new());
        assert!(err.to_string().contains("Record not found"));

        let id = RecordId::new();
        let err = StorageError::VersionConflict {
            id,
            expected: 3,
            actual: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("expected 3"));
    }
}
