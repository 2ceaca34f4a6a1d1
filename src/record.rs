//! Record types and identity.
//!
//! An [`EntityRecord`] is the unit being deduplicated: a stable id, a typed
//! field map, and a lifecycle status. Records are created by the host, edited
//! by the host, and only ever retired (never destroyed) by a merge.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique, immutable record identifier.
///
/// # Examples
///
/// ```
/// use reconcile::RecordId;
///
/// let id = RecordId::new();
/// assert!(!id.is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Creates a new random record ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a record ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns true if this is a nil (all zeros) UUID.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// The declared type of a field, used for comparator dispatch and for
/// checking that a resolution policy applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Free text such as a name or e-mail.
    String,
    /// Telephone number, compared on digits only.
    Phone,
    /// Calendar date without time of day.
    Date,
    /// Postal address, compared as a token set.
    Address,
    /// Numeric quantity.
    Numeric,
    /// Unordered collection of labels (tags, document lists).
    Set,
}

impl FieldType {
    /// Returns true for collection types that support `merge-union`.
    #[must_use]
    pub const fn is_set_like(self) -> bool {
        matches!(self, Self::Set)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Phone => write!(f, "phone"),
            Self::Date => write!(f, "date"),
            Self::Address => write!(f, "address"),
            Self::Numeric => write!(f, "numeric"),
            Self::Set => write!(f, "set"),
        }
    }
}

/// A typed field value.
///
/// Each variant maps to exactly one [`FieldType`], so comparator dispatch is an
/// exhaustive match rather than a lookup by type name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    String(String),
    Phone(String),
    Date(NaiveDate),
    Address(String),
    Numeric(f64),
    Set(Vec<String>),
}

impl FieldValue {
    /// Returns the declared type of this value.
    #[must_use]
    pub const fn field_type(&self) -> FieldType {
        match self {
            Self::String(_) => FieldType::String,
            Self::Phone(_) => FieldType::Phone,
            Self::Date(_) => FieldType::Date,
            Self::Address(_) => FieldType::Address,
            Self::Numeric(_) => FieldType::Numeric,
            Self::Set(_) => FieldType::Set,
        }
    }

    /// Convenience constructor for a set value.
    #[must_use]
    pub fn set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn as_set(&self) -> Option<&[String]> {
        match self {
            Self::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(v) | Self::Phone(v) | Self::Address(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(v) | Self::Address(v) => write!(f, "{v:?}"),
            Self::Phone(v) => write!(f, "phone:{v}"),
            Self::Date(v) => write!(f, "{v}"),
            Self::Numeric(v) => write!(f, "{v}"),
            Self::Set(v) => write!(f, "[{}]", v.join(", ")),
        }
    }
}

/// Lifecycle status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    /// The record has an independent identity.
    Active,
    /// The record was folded into another, surviving record.
    Merged {
        /// The surviving (active) record.
        merged_into: RecordId,
    },
}

impl Default for RecordStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Merged { merged_into } => write!(f, "merged_into({merged_into})"),
        }
    }
}

/// A record subject to deduplication.
///
/// # Examples
///
/// ```
/// use reconcile::{EntityRecord, FieldValue};
///
/// let record = EntityRecord::new()
///     .with_field("name", FieldValue::String("John Smith".into()))
///     .with_field("phone", FieldValue::Phone("555-0123".into()));
/// assert!(record.is_active());
/// assert_eq!(record.fields.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Immutable identifier.
    pub id: RecordId,

    /// Field values keyed by field name.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,

    /// Lifecycle status.
    #[serde(default)]
    pub status: RecordStatus,

    /// When the record was first created; orders ties between candidates.
    pub created_at: DateTime<Utc>,

    /// When the record was last modified.
    pub updated_at: DateTime<Utc>,

    /// Version number (incremented on every change).
    pub version: u64,
}

impl EntityRecord {
    /// Creates a new active record with no fields.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id(RecordId::new())
    }

    /// Creates a new active record with a specific ID.
    #[must_use]
    pub fn with_id(id: RecordId) -> Self {
        let now = Utc::now();
        Self {
            id,
            fields: BTreeMap::new(),
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Builder-style field assignment for freshly created records.
    ///
    /// Unlike [`EntityRecord::set_field`] this does not bump the version.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Overrides the creation timestamp.
    #[must_use]
    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    /// Sets a field, bumping the version if the value changed.
    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        if self.fields.get(&name) != Some(&value) {
            self.fields.insert(name, value);
            self.touch();
        }
    }

    /// Removes a field, bumping the version if it was present.
    pub fn remove_field(&mut self, name: &str) -> Option<FieldValue> {
        let removed = self.fields.remove(name);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status, RecordStatus::Active)
    }

    /// Returns the surviving record's id if this record has been merged.
    #[must_use]
    pub const fn merged_into(&self) -> Option<RecordId> {
        match self.status {
            RecordStatus::Active => None,
            RecordStatus::Merged { merged_into } => Some(merged_into),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

impl Default for EntityRecord {
    fn default() -> Self {
        Self::new()
    }
}
