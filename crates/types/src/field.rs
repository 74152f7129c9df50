//! Field values, kinds, and the runtime type table
//!
//! A [`Message`](crate::Message) maps field names to [`FieldValue`]s. Each
//! message additionally carries a [`TypeTable`] constraining what kind of
//! value a field may hold, and a [`TypePolicy`] deciding what happens when a
//! write does not satisfy the table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Serialize, Serializer};

/// Timestamp pattern used on the wire: milliseconds are always present and
/// the zone is rendered as a `+HHMM`/`-HHMM` offset. Document stores tend to
/// reject second-precision timestamps once a millisecond mapping exists.
const TIMESTAMP_PATTERN: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Formats a timestamp using the canonical wire pattern,
/// e.g. `2015-09-30T12:31:21.000+0000`.
pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.format(TIMESTAMP_PATTERN).to_string()
}

/// The kind of value a field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Str,
    Int,
    Float,
    Bool,
    Timestamp,
    Object,
}

impl FieldKind {
    /// Kind name used in error messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Str => "string",
            FieldKind::Int => "integer",
            FieldKind::Float => "float",
            FieldKind::Bool => "boolean",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Object => "object",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<FixedOffset>),
    /// Opaque structured value, stored as given.
    Object(serde_json::Value),
}

impl FieldValue {
    /// The kind of this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Str(_) => FieldKind::Str,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::Float(_) => FieldKind::Float,
            FieldValue::Bool(_) => FieldKind::Bool,
            FieldValue::Timestamp(_) => FieldKind::Timestamp,
            FieldValue::Object(_) => FieldKind::Object,
        }
    }

    /// Whether this value satisfies a type table entry of the given kind.
    /// Integers widen to floats; no other coercion is performed.
    pub fn is_assignable_to(&self, kind: FieldKind) -> bool {
        self.kind() == kind || (self.kind() == FieldKind::Int && kind == FieldKind::Float)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(v) => f.write_str(v),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Timestamp(v) => f.write_str(&format_timestamp(v)),
            FieldValue::Object(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FieldValue::Str(v) => serializer.serialize_str(v),
            FieldValue::Int(v) => serializer.serialize_i64(*v),
            FieldValue::Float(v) => serializer.serialize_f64(*v),
            FieldValue::Bool(v) => serializer.serialize_bool(*v),
            FieldValue::Timestamp(v) => serializer.serialize_str(&format_timestamp(v)),
            FieldValue::Object(v) => v.serialize(serializer),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<FixedOffset>> for FieldValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value.fixed_offset())
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        FieldValue::Object(value)
    }
}

/// Immutable mapping from field name to the kind of value it may hold.
///
/// Tables are cheap to clone and are shared by every message created from
/// the same source. An empty table constrains nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeTable {
    entries: Arc<BTreeMap<String, FieldKind>>,
}

impl TypeTable {
    /// A table with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a table from `(field, kind)` pairs.
    pub fn of<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldKind)>,
        S: Into<String>,
    {
        TypeTable {
            entries: Arc::new(
                entries
                    .into_iter()
                    .map(|(name, kind)| (name.into(), kind))
                    .collect(),
            ),
        }
    }

    /// Looks up the expected kind for a field, if constrained.
    pub fn kind_of(&self, field: &str) -> Option<FieldKind> {
        self.entries.get(field).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// What happens when a write names an unknown field or carries a value of
/// the wrong kind. The policy is total: every write resolves to exactly one
/// of insert, stringify, drop-with-recorded-error, or a returned error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypePolicy {
    /// Unknown or mismatched values are inserted as given.
    #[default]
    Accept,
    /// Unknown or mismatched values are stored as their textual form.
    Stringify,
    /// Unknown or mismatched values are not stored; a human-readable error
    /// is appended to the reserved error field instead.
    DropWithError,
    /// Unknown or mismatched writes fail with an error.
    Reject,
}

impl TypePolicy {
    /// Policy name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            TypePolicy::Accept => "accept",
            TypePolicy::Stringify => "stringify",
            TypePolicy::DropWithError => "drop_with_error",
            TypePolicy::Reject => "reject",
        }
    }
}

/// Renders a UTC timestamp on the wire pattern. Convenience for callers
/// holding [`DateTime<Utc>`] from a [`Clock`](crate::Clock).
pub fn format_utc_timestamp(timestamp: &DateTime<Utc>) -> String {
    format_timestamp(&timestamp.fixed_offset())
}
