//! Merge execution.
//!
//! Each merge moves through `Planned -> Validated -> Applied -> Audited`.
//! Validation happens against freshly read records; application and the audit
//! append are a single [`RecordStore::compare_and_swap`], so callers observe
//! either the whole merge or nothing. Merges are irreversible here: a wrong
//! merge is corrected by a new, explicitly directed edit.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audit::{Actor, MergeAuditEvent};
use crate::error::{MergeError, ReconcileError, ReconcileResult};
use crate::plan::{MergePlan, PlanHash};
use crate::record::{EntityRecord, RecordId, RecordStatus};
use crate::storage::{MergeSwap, RecordStore, StorageError};

/// Stage of a single merge operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeStage {
    /// Plan received, nothing checked yet.
    Planned,
    /// Both records re-read and found unchanged.
    Validated,
    /// Records written.
    Applied,
    /// Audit event appended.
    Audited,
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planned => write!(f, "planned"),
            Self::Validated => write!(f, "validated"),
            Self::Applied => write!(f, "applied"),
            Self::Audited => write!(f, "audited"),
        }
    }
}

/// Applies executable merge plans against a [`RecordStore`].
#[derive(Clone)]
pub struct MergeExecutor {
    store: Arc<dyn RecordStore>,
}

impl fmt::Debug for MergeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeExecutor").finish_non_exhaustive()
    }
}

fn load(store: &dyn RecordStore, id: RecordId) -> ReconcileResult<EntityRecord> {
    store
        .get(id)?
        .ok_or_else(|| MergeError::RecordNotFound { id }.into())
}

fn check_current(
    record: &EntityRecord,
    planned_version: u64,
    plan_hash: PlanHash,
) -> Result<(), MergeError> {
    if !record.is_active() {
        // Someone merged this record after the plan was built.
        return Err(MergeError::ConcurrentModification {
            record_id: record.id,
            plan_hash,
            expected_version: planned_version,
            actual_version: record.version,
        });
    }
    if record.version != planned_version {
        return Err(MergeError::StaleRecordState {
            record_id: record.id,
            plan_hash,
            reason: format!("version {planned_version} -> {}", record.version),
        });
    }
    Ok(())
}

fn validate(
    plan: &MergePlan,
    plan_hash: PlanHash,
    primary: &EntityRecord,
    duplicate: &EntityRecord,
) -> Result<(), MergeError> {
    check_current(primary, plan.primary_version, plan_hash)?;
    check_current(duplicate, plan.duplicate_version, plan_hash)?;

    let current: BTreeSet<&String> = primary.fields.keys().chain(duplicate.fields.keys()).collect();
    let planned: BTreeSet<&String> = plan.resulting_fields.keys().collect();
    if current != planned {
        return Err(MergeError::StaleRecordState {
            record_id: primary.id,
            plan_hash,
            reason: "field set differs from the planned result".to_string(),
        });
    }
    Ok(())
}

impl MergeExecutor {
    /// Creates an executor writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Applies `plan` on behalf of `actor`.
    ///
    /// # Errors
    /// - `UnresolvedConflict` if the plan still has unresolved fields
    /// - `RecordNotFound` if either record is gone
    /// - `StaleRecordState` if either record changed since planning
    /// - `ConcurrentModification` if another merge claimed either record first
    ///
    /// On any error, neither record is changed and no audit event is written.
    pub fn execute(&self, plan: &MergePlan, actor: &Actor) -> ReconcileResult<MergeAuditEvent> {
        let plan_hash = plan.plan_hash()?;
        debug!(%plan_hash, stage = %MergeStage::Planned, "merge requested");

        if !plan.is_executable() {
            return Err(MergeError::UnresolvedConflict {
                primary_id: plan.primary_id,
                duplicate_id: plan.duplicate_id,
                fields: plan.unresolved_fields.iter().cloned().collect(),
                plan_hash,
            }
            .into());
        }

        let primary = load(self.store.as_ref(), plan.primary_id)?;
        let duplicate = load(self.store.as_ref(), plan.duplicate_id)?;

        if let Err(err) = validate(plan, plan_hash, &primary, &duplicate) {
            warn!(%plan_hash, error = %err, "merge rejected during validation");
            return Err(err.into());
        }
        debug!(%plan_hash, stage = %MergeStage::Validated, "merge validated");

        let mut merged_primary = primary.clone();
        merged_primary.fields = plan.resulting_fields.clone();
        merged_primary.touch();

        let mut retired = duplicate.clone();
        retired.status = RecordStatus::Merged {
            merged_into: primary.id,
        };
        retired.touch();

        let event = MergeAuditEvent::for_plan(plan, plan_hash, actor.clone());

        let swap = MergeSwap {
            primary: merged_primary,
            duplicate: retired,
            expected_primary_version: primary.version,
            expected_duplicate_version: duplicate.version,
            event: event.clone(),
        };

        let receipt = self.store.compare_and_swap(swap).map_err(|err| match err {
            StorageError::VersionConflict {
                id,
                expected,
                actual,
            } => {
                warn!(%plan_hash, record_id = %id, expected, actual, "merge lost a concurrent race");
                ReconcileError::from(MergeError::ConcurrentModification {
                    record_id: id,
                    plan_hash,
                    expected_version: expected,
                    actual_version: actual,
                })
            }
            other => ReconcileError::from(other),
        })?;
        debug!(%plan_hash, stage = %MergeStage::Applied, repointed = receipt.repointed.len(), "merge applied");

        info!(
            primary_id = %plan.primary_id,
            duplicate_id = %plan.duplicate_id,
            %plan_hash,
            actor = %actor,
            stage = %MergeStage::Audited,
            "records merged"
        );
        Ok(event)
    }
}
