//! Host-facing engine.
//!
//! [`ReconcileEngine`] wires a [`RecordStore`], a [`MatchConfig`] and an
//! [`AuditFeed`] together so a host can go from "which records look like this
//! one" to a committed, audited merge with three calls. Every stage stays
//! available as a free function for hosts that hold records themselves.

use std::fmt;
use std::sync::Arc;

use crate::audit::{Actor, AuditFeed, AuditFeedConfig, AuditStream, MergeAuditEvent};
use crate::config::MatchConfig;
use crate::error::{MergeError, ReconcileResult};
use crate::executor::MergeExecutor;
use crate::finder::{find_duplicates, DuplicateCandidate};
use crate::plan::{plan, DirectiveSet, MergePlan};
use crate::record::{EntityRecord, RecordId};
use crate::scoring::{score, ScoreOutcome};
use crate::storage::RecordStore;

/// Deduplication and merge engine over a pluggable record store.
#[derive(Clone)]
pub struct ReconcileEngine {
    store: Arc<dyn RecordStore>,
    config: MatchConfig,
    executor: MergeExecutor,
    feed: Arc<AuditFeed>,
}

impl fmt::Debug for ReconcileEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileEngine")
            .field("config", &self.config)
            .field("subscribers", &self.feed.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl ReconcileEngine {
    /// Create an engine. The configuration is validated up front.
    ///
    /// # Errors
    /// Returns a validation error for bad weights or thresholds.
    pub fn new(store: Arc<dyn RecordStore>, config: MatchConfig) -> ReconcileResult<Self> {
        Self::with_audit_feed(store, config, AuditFeedConfig::default())
    }

    /// Create an engine with a custom audit feed configuration.
    ///
    /// # Errors
    /// Returns a validation error for bad weights or thresholds.
    pub fn with_audit_feed(
        store: Arc<dyn RecordStore>,
        config: MatchConfig,
        feed: AuditFeedConfig,
    ) -> ReconcileResult<Self> {
        config.validate()?;
        Ok(Self {
            executor: MergeExecutor::new(Arc::clone(&store)),
            store,
            config,
            feed: Arc::new(AuditFeed::new(feed)),
        })
    }

    /// Active match configuration.
    #[must_use]
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Underlying record store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Subscribe to merges committed through this engine.
    pub fn subscribe(&self) -> AuditStream {
        self.feed.subscribe()
    }

    /// Feed that receives every committed merge.
    #[must_use]
    pub fn audit_feed(&self) -> &AuditFeed {
        &self.feed
    }

    fn load(&self, id: RecordId) -> ReconcileResult<EntityRecord> {
        self.store
            .get(id)?
            .ok_or_else(|| MergeError::RecordNotFound { id }.into())
    }

    /// Score two stored records against each other.
    ///
    /// # Errors
    /// `RecordNotFound` or a validation error from scoring.
    pub fn score_pair(&self, a: RecordId, b: RecordId) -> ReconcileResult<ScoreOutcome> {
        let a = self.load(a)?;
        let b = self.load(b)?;
        Ok(score(&a, &b, &self.config)?)
    }

    /// Ranked duplicate candidates for a stored record.
    ///
    /// A merged reference is resolved to the record it was merged into first.
    ///
    /// # Errors
    /// `RecordNotFound` if the reference (or its root) is missing.
    pub fn find_duplicates_for(&self, reference: RecordId) -> ReconcileResult<Vec<DuplicateCandidate>> {
        let root = self
            .store
            .resolve(reference)?
            .ok_or(MergeError::RecordNotFound { id: reference })?;
        let population = self.store.list()?;
        find_duplicates(&root, &population, &self.config)
    }

    /// Plan merging `duplicate` into `primary` from their current stored state.
    ///
    /// # Errors
    /// See [`plan`](crate::plan::plan); also `RecordNotFound`.
    pub fn plan_merge(
        &self,
        primary: RecordId,
        duplicate: RecordId,
        directives: &DirectiveSet,
    ) -> ReconcileResult<MergePlan> {
        let primary = self.load(primary)?;
        let duplicate = self.load(duplicate)?;
        plan(&primary, &duplicate, directives, &self.config.comparator)
    }

    /// Execute a plan and notify subscribers.
    ///
    /// # Errors
    /// See [`MergeExecutor::execute`].
    pub fn execute(&self, plan: &MergePlan, actor: &Actor) -> ReconcileResult<MergeAuditEvent> {
        let event = self.executor.execute(plan, actor)?;
        self.feed.publish(&event);
        Ok(event)
    }
}
