//! Merge planning.
//!
//! A [`MergePlan`] is the deterministic, inspectable outcome of merging a
//! duplicate into a primary, computed before anything is mutated. Planning is
//! a pure function of its inputs: the same records and directives always give
//! a byte-identical plan, and therefore the same [`PlanHash`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compare::{compare, normalize_text};
use crate::config::ComparatorConfig;
use crate::error::{MergeError, ReconcileError, ReconcileResult, ValidationError};
use crate::record::{EntityRecord, FieldValue, RecordId, RecordStatus};

/// How to resolve one conflicting field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionPolicy {
    /// Keep the primary record's value.
    KeepPrimary,
    /// Take the duplicate record's value.
    KeepDuplicate,
    /// Union of both sets, primary items first. Set fields only.
    MergeUnion,
}

impl fmt::Display for ResolutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepPrimary => write!(f, "keep-primary"),
            Self::KeepDuplicate => write!(f, "keep-duplicate"),
            Self::MergeUnion => write!(f, "merge-union"),
        }
    }
}

/// Instruction for merging exactly one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldResolutionDirective {
    pub field_name: String,
    pub policy: ResolutionPolicy,
}

impl FieldResolutionDirective {
    #[must_use]
    pub fn new(field_name: impl Into<String>, policy: ResolutionPolicy) -> Self {
        Self {
            field_name: field_name.into(),
            policy,
        }
    }
}

/// A validated set of directives, at most one per field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldResolutionDirective>", into = "Vec<FieldResolutionDirective>")]
pub struct DirectiveSet {
    policies: BTreeMap<String, ResolutionPolicy>,
}

impl DirectiveSet {
    /// An empty directive set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Starts a fluent builder.
    ///
    /// # Example
    /// ```
    /// use reconcile::DirectiveSet;
    ///
    /// let directives = DirectiveSet::builder()
    ///     .keep_primary("email")
    ///     .merge_union("tags")
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(directives.len(), 2);
    /// ```
    #[must_use]
    pub fn builder() -> DirectiveSetBuilder {
        DirectiveSetBuilder::default()
    }

    /// Builds a set from a directive list.
    ///
    /// # Errors
    /// `DuplicateDirective` if two directives name the same field.
    pub fn from_directives(
        directives: impl IntoIterator<Item = FieldResolutionDirective>,
    ) -> Result<Self, ValidationError> {
        let mut policies = BTreeMap::new();
        for d in directives {
            if policies.insert(d.field_name.clone(), d.policy).is_some() {
                return Err(ValidationError::DuplicateDirective {
                    field: d.field_name,
                });
            }
        }
        Ok(Self { policies })
    }

    #[must_use]
    pub fn policy_for(&self, field: &str) -> Option<ResolutionPolicy> {
        self.policies.get(field).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ResolutionPolicy)> {
        self.policies.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl TryFrom<Vec<FieldResolutionDirective>> for DirectiveSet {
    type Error = ValidationError;

    fn try_from(value: Vec<FieldResolutionDirective>) -> Result<Self, Self::Error> {
        Self::from_directives(value)
    }
}

impl From<DirectiveSet> for Vec<FieldResolutionDirective> {
    fn from(value: DirectiveSet) -> Self {
        value
            .policies
            .into_iter()
            .map(|(field_name, policy)| FieldResolutionDirective { field_name, policy })
            .collect()
    }
}

/// Fluent builder for [`DirectiveSet`].
#[derive(Debug, Clone, Default)]
pub struct DirectiveSetBuilder {
    directives: Vec<FieldResolutionDirective>,
}

impl DirectiveSetBuilder {
    #[must_use]
    pub fn directive(mut self, field: impl Into<String>, policy: ResolutionPolicy) -> Self {
        self.directives
            .push(FieldResolutionDirective::new(field, policy));
        self
    }

    #[must_use]
    pub fn keep_primary(self, field: impl Into<String>) -> Self {
        self.directive(field, ResolutionPolicy::KeepPrimary)
    }

    #[must_use]
    pub fn keep_duplicate(self, field: impl Into<String>) -> Self {
        self.directive(field, ResolutionPolicy::KeepDuplicate)
    }

    #[must_use]
    pub fn merge_union(self, field: impl Into<String>) -> Self {
        self.directive(field, ResolutionPolicy::MergeUnion)
    }

    /// Validates and builds the directive set.
    ///
    /// # Errors
    /// `DuplicateDirective` if a field was named twice.
    pub fn build(self) -> Result<DirectiveSet, ValidationError> {
        DirectiveSet::from_directives(self.directives)
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    PrimaryOnly,
    DuplicateOnly,
    /// Both records hold equivalent values; the primary's is kept.
    Equivalent,
    KeptPrimary,
    KeptDuplicate,
    Union,
}

/// One change to the primary record's fields. `previous` is `None` when the
/// field is new to the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub previous: Option<FieldValue>,
    pub resolved: FieldValue,
    pub origin: FieldOrigin,
}

/// Blake3 digest of a plan's canonical JSON encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PlanHash([u8; 32]);

impl PlanHash {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for PlanHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", blake3::Hash::from_bytes(self.0).to_hex())
    }
}

impl TryFrom<String> for PlanHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        blake3::Hash::from_hex(value.trim())
            .map(|h| Self(*h.as_bytes()))
            .map_err(|e| format!("invalid plan hash: {e}"))
    }
}

impl From<PlanHash> for String {
    fn from(value: PlanHash) -> Self {
        value.to_string()
    }
}

/// The planned outcome of merging `duplicate_id` into `primary_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePlan {
    pub primary_id: RecordId,
    pub duplicate_id: RecordId,

    /// Versions the plan was computed against.
    pub primary_version: u64,
    pub duplicate_version: u64,

    /// Field values the primary will hold after the merge.
    pub resulting_fields: BTreeMap<String, FieldValue>,

    /// Conflicting fields with no directive. Disjoint from `resulting_fields`.
    pub unresolved_fields: BTreeSet<String>,

    /// Changes to the primary, in field-name order.
    pub changes: Vec<FieldChange>,
}

impl MergePlan {
    /// A plan is executable once every conflict has a directive.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.unresolved_fields.is_empty()
    }

    /// Hashes the canonical JSON encoding of the plan.
    ///
    /// # Errors
    /// Returns an internal error if the plan cannot be encoded.
    pub fn plan_hash(&self) -> ReconcileResult<PlanHash> {
        let mut hasher = blake3::Hasher::new();
        serde_json::to_writer(&mut hasher, self)
            .map_err(|e| ReconcileError::internal(format!("plan encoding failed: {e}")))?;
        Ok(PlanHash(*hasher.finalize().as_bytes()))
    }

    /// Field names covered by the plan, resolved or not.
    #[must_use]
    pub fn covered_fields(&self) -> BTreeSet<String> {
        self.resulting_fields
            .keys()
            .chain(self.unresolved_fields.iter())
            .cloned()
            .collect()
    }

    /// Reconstructs the primary's field map as it was before the merge by
    /// undoing `changes`. Fields left unresolved are not included.
    #[must_use]
    pub fn previous_primary_fields(&self) -> BTreeMap<String, FieldValue> {
        let mut fields = self.resulting_fields.clone();
        for change in &self.changes {
            match &change.previous {
                Some(prev) => {
                    fields.insert(change.field.clone(), prev.clone());
                }
                None => {
                    fields.remove(&change.field);
                }
            }
        }
        fields
    }
}

fn ensure_active(record: &EntityRecord) -> Result<(), MergeError> {
    match record.status {
        RecordStatus::Active => Ok(()),
        RecordStatus::Merged { merged_into } => Err(MergeError::AlreadyMerged {
            record_id: record.id,
            merged_into,
        }),
    }
}

fn union_sets(primary: &[String], duplicate: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    primary
        .iter()
        .chain(duplicate)
        .filter(|item| seen.insert(normalize_text(item)))
        .cloned()
        .collect()
}

fn check_union_target(field: &str, value: Option<&FieldValue>) -> Result<(), ValidationError> {
    match value {
        Some(v) if !v.field_type().is_set_like() => Err(ValidationError::InvalidFieldType {
            field: field.to_string(),
            field_type: v.field_type(),
            operation: ResolutionPolicy::MergeUnion.to_string(),
        }),
        _ => Ok(()),
    }
}

fn equivalent(field: &str, a: &FieldValue, b: &FieldValue, config: &ComparatorConfig) -> bool {
    if a == b {
        return true;
    }
    // Mixed types are never equivalent; they need a directive like any conflict.
    matches!(compare(field, a, b, config), Ok(score) if score >= 1.0)
}

/// Plans the merge of `duplicate` into `primary`. Neither input is modified.
///
/// # Errors
/// - `SelfMerge` if both records share an id.
/// - `AlreadyMerged` if either record is merged.
/// - `UnknownDirectiveField` for a directive naming a field neither record has.
/// - `InvalidFieldType` for `merge-union` on a non-set field.
pub fn plan(
    primary: &EntityRecord,
    duplicate: &EntityRecord,
    directives: &DirectiveSet,
    comparator: &ComparatorConfig,
) -> ReconcileResult<MergePlan> {
    if primary.id == duplicate.id {
        return Err(ValidationError::SelfMerge { id: primary.id }.into());
    }
    ensure_active(primary)?;
    ensure_active(duplicate)?;

    for (field, policy) in directives.iter() {
        let p = primary.field(field);
        let d = duplicate.field(field);
        if p.is_none() && d.is_none() {
            return Err(ValidationError::UnknownDirectiveField {
                field: field.to_string(),
            }
            .into());
        }
        if policy == ResolutionPolicy::MergeUnion {
            check_union_target(field, p)?;
            check_union_target(field, d)?;
        }
    }

    let names: BTreeSet<&String> = primary.fields.keys().chain(duplicate.fields.keys()).collect();

    let mut resulting_fields = BTreeMap::new();
    let mut unresolved_fields = BTreeSet::new();
    let mut changes = Vec::new();

    for name in names {
        let (value, origin) = match (primary.field(name), duplicate.field(name)) {
            (Some(p), None) => (p.clone(), FieldOrigin::PrimaryOnly),
            (None, Some(d)) => (d.clone(), FieldOrigin::DuplicateOnly),
            (Some(p), Some(d)) if equivalent(name, p, d, comparator) => {
                (p.clone(), FieldOrigin::Equivalent)
            }
            (Some(p), Some(d)) => match directives.policy_for(name) {
                Some(ResolutionPolicy::KeepPrimary) => (p.clone(), FieldOrigin::KeptPrimary),
                Some(ResolutionPolicy::KeepDuplicate) => (d.clone(), FieldOrigin::KeptDuplicate),
                Some(ResolutionPolicy::MergeUnion) => match (p.as_set(), d.as_set()) {
                    (Some(ps), Some(ds)) => (FieldValue::Set(union_sets(ps, ds)), FieldOrigin::Union),
                    _ => {
                        return Err(ReconcileError::internal(format!(
                            "merge-union on non-set field '{name}' passed validation"
                        )))
                    }
                },
                None => {
                    unresolved_fields.insert(name.clone());
                    continue;
                }
            },
            (None, None) => continue,
        };

        let previous = primary.field(name);
        if previous != Some(&value) {
            changes.push(FieldChange {
                field: name.clone(),
                previous: previous.cloned(),
                resolved: value.clone(),
                origin,
            });
        }
        resulting_fields.insert(name.clone(), value);
    }

    debug!(
        primary_id = %primary.id,
        duplicate_id = %duplicate.id,
        resolved = resulting_fields.len(),
        unresolved = unresolved_fields.len(),
        changes = changes.len(),
        "merge planned"
    );

    Ok(MergePlan {
        primary_id: primary.id,
        duplicate_id: duplicate.id,
        primary_version: primary.version,
        duplicate_version: duplicate.version,
        resulting_fields,
        unresolved_fields,
        changes,
    })
}
