//! # reconcile - duplicate detection and merge resolution
//!
//! reconcile finds records that probably describe the same customer and folds
//! them into a single golden record without ever silently losing data.
//!
//! ## Pipeline
//!
//! - **Field comparators** score two values of one field in [0, 1]
//! - **Candidate scorer** combines weighted field scores into a confidence plus
//!   human-readable reasons
//! - **Duplicate finder** ranks a population against a reference record
//! - **Merge planner** turns per-field directives into an inspectable
//!   [`MergePlan`] before anything is written
//! - **Merge executor** applies a plan atomically, retires the duplicate and
//!   appends a [`MergeAuditEvent`]
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use reconcile::{
//!     Actor, DirectiveSet, EntityRecord, FieldValue, InMemoryRecordStore, MatchConfig,
//!     ReconcileEngine, RecordStore,
//! };
//!
//! let a = EntityRecord::new()
//!     .with_field("name", FieldValue::String("John Smith".into()))
//!     .with_field("phone", FieldValue::Phone("555-0123".into()));
//! let b = EntityRecord::new()
//!     .with_field("name", FieldValue::String("John Smith".into()))
//!     .with_field("phone", FieldValue::Phone("5550123".into()));
//!
//! let store = Arc::new(InMemoryRecordStore::with_records([a.clone(), b.clone()])?);
//! let config = MatchConfig::default().with_weight("phone", 2.0).with_weight("name", 1.0);
//! let engine = ReconcileEngine::new(store.clone(), config)?;
//!
//! let candidates = engine.find_duplicates_for(a.id)?;
//! assert_eq!(candidates[0].candidate_id, b.id);
//!
//! let plan = engine.plan_merge(a.id, b.id, &DirectiveSet::empty())?;
//! let event = engine.execute(&plan, &Actor::new("reviewer")?)?;
//! assert_eq!(event.duplicate_id, b.id);
//! assert_eq!(store.get(b.id)?.and_then(|r| r.merged_into()), Some(a.id));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model and configuration
pub mod config;
pub mod error;
pub mod record;

// Matching
pub mod compare;
pub mod finder;
pub mod scoring;

// Merging
pub mod audit;
pub mod executor;
pub mod plan;

// Storage and host facade
pub mod engine;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use audit::{Actor, AuditEventId, AuditFeed, AuditFeedConfig, AuditStream, AuditStreamError, MergeAuditEvent};
pub use compare::{compare, compare_optional};
pub use config::{ComparatorConfig, MatchConfig};
pub use engine::ReconcileEngine;
pub use error::{MergeError, ReconcileError, ReconcileResult, ValidationError};
pub use executor::{MergeExecutor, MergeStage};
pub use finder::{find_duplicates, DuplicateCandidate};
pub use plan::{
	plan, DirectiveSet, DirectiveSetBuilder, FieldChange, FieldOrigin, FieldResolutionDirective,
	MergePlan, PlanHash, ResolutionPolicy,
};
pub use record::{EntityRecord, FieldType, FieldValue, RecordId, RecordStatus};
pub use scoring::{score, ConfidenceTier, FieldScore, ScoreOutcome};
pub use storage::{InMemoryRecordStore, MergeSwap, RecordStore, StorageError, SwapReceipt};
