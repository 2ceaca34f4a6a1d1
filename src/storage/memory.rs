//! In-memory storage backend.
//!
//! Thread-safe implementation of [`RecordStore`] for embedded usage, tests, and
//! as a reference for what a persistent backend must guarantee. A single
//! `RwLock` over the whole state makes `compare_and_swap` trivially atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::Utc;

use crate::audit::MergeAuditEvent;
use crate::record::{EntityRecord, RecordId, RecordStatus};
use crate::storage::traits::{MergeSwap, RecordStore, StorageError, SwapReceipt};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct RecordState {
    by_id: HashMap<RecordId, EntityRecord>,
    order: Vec<RecordId>,
    versions: HashMap<RecordId, BTreeMap<u64, EntityRecord>>,
    audit: Vec<MergeAuditEvent>,
}

fn ensure_version_free(
    state: &RecordState,
    id: RecordId,
    version: u64,
    context: &'static str,
) -> Result<(), StorageError> {
    if state
        .versions
        .get(&id)
        .is_some_and(|versions| versions.contains_key(&version))
    {
        return Err(StorageError::BackendError(format!(
            "duplicate record version ({context}): id={id} version={version}"
        )));
    }
    Ok(())
}

fn record_version(
    state: &mut RecordState,
    record: &EntityRecord,
    context: &'static str,
) -> Result<(), StorageError> {
    ensure_version_free(state, record.id, record.version, context)?;
    state
        .versions
        .entry(record.id)
        .or_default()
        .insert(record.version, record.clone());
    Ok(())
}

fn expect_version(
    state: &RecordState,
    id: RecordId,
    expected: u64,
) -> Result<&EntityRecord, StorageError> {
    let current = state.by_id.get(&id).ok_or(StorageError::RecordNotFound(id))?;
    if current.version != expected {
        return Err(StorageError::VersionConflict {
            id,
            expected,
            actual: current.version,
        });
    }
    Ok(current)
}

fn check_swap_shape(swap: &MergeSwap) -> Result<(), StorageError> {
    let primary_id = swap.primary.id;
    let duplicate_id = swap.duplicate.id;
    if primary_id == duplicate_id {
        return Err(StorageError::InvalidMergeTarget(
            "cannot merge a record into itself".to_string(),
        ));
    }
    if !swap.primary.is_active() {
        return Err(StorageError::InvalidMergeTarget(format!(
            "surviving record {primary_id} must stay active"
        )));
    }
    if swap.duplicate.merged_into() != Some(primary_id) {
        return Err(StorageError::InvalidMergeTarget(format!(
            "duplicate {duplicate_id} must be marked merged into {primary_id}"
        )));
    }
    if swap.event.primary_id != primary_id || swap.event.duplicate_id != duplicate_id {
        return Err(StorageError::InvalidMergeTarget(
            "audit event does not describe this merge".to_string(),
        ));
    }
    Ok(())
}

/// Thread-safe in-memory record store.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    state: RwLock<RecordState>,
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `records`.
    ///
    /// # Errors
    /// Fails on the first duplicate id.
    pub fn with_records(
        records: impl IntoIterator<Item = EntityRecord>,
    ) -> Result<Self, StorageError> {
        let store = Self::new();
        for record in records {
            store.insert(record)?;
        }
        Ok(store)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn insert(&self, record: EntityRecord) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("record.insert"))?;
        if state.by_id.contains_key(&record.id) {
            return Err(StorageError::DuplicateKey(record.id.to_string()));
        }

        record_version(&mut state, &record, "record.insert")?;
        state.order.push(record.id);
        state.by_id.insert(record.id, record);
        Ok(())
    }

    fn get(&self, id: RecordId) -> Result<Option<EntityRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("record.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<EntityRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("record.list"))?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.by_id.get(id).cloned())
            .collect())
    }

    fn update(&self, record: EntityRecord) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("record.update"))?;
        let prev = state
            .by_id
            .get(&record.id)
            .ok_or(StorageError::RecordNotFound(record.id))?;

        if !prev.is_active() {
            return Err(StorageError::BackendError(
                "cannot update a record that has been merged".to_string(),
            ));
        }
        if !record.is_active() {
            return Err(StorageError::BackendError(
                "record status changes only through merges".to_string(),
            ));
        }
        if record.version <= prev.version {
            return Err(StorageError::BackendError(format!(
                "record version must increase on update: id={} prev={} new={}",
                record.id, prev.version, record.version
            )));
        }

        record_version(&mut state, &record, "record.update")?;
        state.by_id.insert(record.id, record);
        Ok(())
    }

    fn compare_and_swap(&self, swap: MergeSwap) -> Result<SwapReceipt, StorageError> {
        check_swap_shape(&swap)?;

        let mut state = self.state.write().map_err(|_| lock_err("record.compare_and_swap"))?;

        // Check everything before writing anything.
        expect_version(&state, swap.primary.id, swap.expected_primary_version)?;
        expect_version(&state, swap.duplicate.id, swap.expected_duplicate_version)?;

        let primary_id = swap.primary.id;
        let duplicate_id = swap.duplicate.id;

        let repointed: Vec<RecordId> = state
            .order
            .iter()
            .copied()
            .filter(|id| {
                state
                    .by_id
                    .get(id)
                    .and_then(EntityRecord::merged_into)
                    == Some(duplicate_id)
            })
            .collect();

        ensure_version_free(&state, primary_id, swap.primary.version, "record.merge.primary")?;
        ensure_version_free(&state, duplicate_id, swap.duplicate.version, "record.merge.duplicate")?;
        for id in &repointed {
            if let Some(record) = state.by_id.get(id) {
                ensure_version_free(&state, *id, record.version + 1, "record.merge.repoint")?;
            }
        }

        record_version(&mut state, &swap.primary, "record.merge.primary")?;
        record_version(&mut state, &swap.duplicate, "record.merge.duplicate")?;
        state.by_id.insert(primary_id, swap.primary);
        state.by_id.insert(duplicate_id, swap.duplicate);

        let now = Utc::now();
        for id in &repointed {
            let Some(mut record) = state.by_id.get(id).cloned() else {
                continue;
            };
            record.status = RecordStatus::Merged {
                merged_into: primary_id,
            };
            record.updated_at = now;
            record.version += 1;
            record_version(&mut state, &record, "record.merge.repoint")?;
            state.by_id.insert(*id, record);
        }

        state.audit.push(swap.event);
        Ok(SwapReceipt { repointed })
    }

    fn audit_log(&self) -> Result<Vec<MergeAuditEvent>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("record.audit_log"))?;
        Ok(state.audit.clone())
    }

    fn get_at_version(&self, id: RecordId, version: u64) -> Result<Option<EntityRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("record.get_at_version"))?;
        Ok(state
            .versions
            .get(&id)
            .and_then(|m| m.get(&version))
            .cloned())
    }

    fn list_versions(&self, id: RecordId) -> Result<Vec<EntityRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("record.list_versions"))?;
        let Some(map) = state.versions.get(&id) else {
            return Ok(Vec::new());
        };
        Ok(map.values().cloned().collect())
    }
}
