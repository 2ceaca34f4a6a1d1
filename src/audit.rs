//! Merge audit events.
//!
//! A [`MergeAuditEvent`] is written once per successful merge, in the same
//! atomic step that applies the merge, and is never mutated afterwards.
//! Hosts that want to react to merges (refresh a screen, notify a reviewer)
//! subscribe to an [`AuditFeed`]; delivery there is best-effort and never
//! blocks the merge.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::plan::{MergePlan, PlanHash};
use crate::record::{FieldValue, RecordId};

/// Unique identifier for an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEventId(Uuid);

impl AuditEventId {
    /// Creates a new random event ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AuditEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied identity of whoever requested a merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Actor(String);

impl Actor {
    /// Creates an actor.
    ///
    /// # Errors
    /// `EmptyActor` if `name` is blank.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyActor);
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Actor {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Actor> for String {
    fn from(value: Actor) -> Self {
        value.0
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permanent record of a completed merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeAuditEvent {
    pub id: AuditEventId,
    pub timestamp: DateTime<Utc>,
    pub primary_id: RecordId,
    pub duplicate_id: RecordId,
    /// Snapshot of the primary's fields after the merge.
    pub resulting_fields: BTreeMap<String, FieldValue>,
    pub actor: Actor,
    /// Hash of the plan that was applied.
    pub plan_hash: PlanHash,
}

impl MergeAuditEvent {
    pub(crate) fn for_plan(plan: &MergePlan, plan_hash: PlanHash, actor: Actor) -> Self {
        Self {
            id: AuditEventId::new(),
            timestamp: Utc::now(),
            primary_id: plan.primary_id,
            duplicate_id: plan.duplicate_id,
            resulting_fields: plan.resulting_fields.clone(),
            actor,
            plan_hash,
        }
    }
}

/// Errors when reading from an [`AuditStream`].
#[derive(Debug, Error)]
pub enum AuditStreamError {
    #[error("Audit feed disconnected")]
    Disconnected,

    #[error("No audit event within {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("No audit event pending")]
    Empty,
}

/// Audit feed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFeedConfig {
    /// Per-subscription buffer capacity.
    pub stream_capacity: usize,
}

impl Default for AuditFeedConfig {
    fn default() -> Self {
        Self {
            stream_capacity: 1024,
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: Sender<MergeAuditEvent>,
}

/// Fan-out of committed audit events to in-process subscribers.
#[derive(Debug, Default)]
pub struct AuditFeed {
    cfg: AuditFeedConfig,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    dropped_events: AtomicU64,
}

impl AuditFeed {
    #[must_use]
    pub fn new(cfg: AuditFeedConfig) -> Self {
        Self {
            cfg,
            ..Self::default()
        }
    }

    /// Opens a new subscription. Dropping the stream ends it.
    pub fn subscribe(&self) -> AuditStream {
        let (tx, rx) = bounded(self.cfg.stream_capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(Subscriber { id, tx }),
            Err(poisoned) => poisoned.into_inner().push(Subscriber { id, tx }),
        }
        AuditStream { subscription_id: id, rx }
    }

    /// Non-blocking delivery to every live subscriber.
    pub fn publish(&self, event: &MergeAuditEvent) {
        let mut subs = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                warn!(subscription_id = sub.id, event_id = %event.id, "audit subscriber buffer full; event dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(subs) => subs.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

/// A subscription to committed merge events.
#[derive(Debug)]
pub struct AuditStream {
    subscription_id: u64,
    rx: Receiver<MergeAuditEvent>,
}

impl AuditStream {
    #[must_use]
    pub const fn subscription_id(&self) -> u64 {
        self.subscription_id
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<MergeAuditEvent, AuditStreamError> {
        self.rx.recv().map_err(|_| AuditStreamError::Disconnected)
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<MergeAuditEvent, AuditStreamError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => AuditStreamError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            },
            RecvTimeoutError::Disconnected => AuditStreamError::Disconnected,
        })
    }

    /// Take a pending event without blocking.
    pub fn try_recv(&self) -> Result<MergeAuditEvent, AuditStreamError> {
        self.rx.try_recv().map_err(|err| match err {
            TryRecvError::Empty => AuditStreamError::Empty,
            TryRecvError::Disconnected => AuditStreamError::Disconnected,
        })
    }
}
