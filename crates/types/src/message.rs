//! The keyed message record
//!
//! A [`Message`] is a mapping from field names to [`FieldValue`]s together
//! with a per-instance [`TypeTable`] and [`TypePolicy`]. The table and
//! policy are fixed at construction; field writes go through value-returning
//! `put`/`remove` operations so a processor never observes another
//! processor's half-applied write.
//!
//! Messages optionally carry an ordered list of [`Destination`]s consumed by
//! the egress stage; messages without any are written to the sink's default
//! destination.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};

use crate::destination::Destination;
use crate::errors::{Result, TypeError};
use crate::field::{FieldKind, FieldValue, TypePolicy, TypeTable};

/// Reserved field collecting human-readable write errors under the
/// [`TypePolicy::DropWithError`] policy. Multiple errors accumulate
/// newline-separated.
pub const ERROR_FIELD: &str = "_typemappingerror";

/// Canonical timestamp field expected by the egress stage.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// A structured log message.
#[derive(Debug, Clone)]
pub struct Message {
    fields: BTreeMap<String, FieldValue>,
    types: TypeTable,
    policy: TypePolicy,
    destinations: Vec<Destination>,
}

impl Message {
    /// An empty message with no type constraints; every write is accepted.
    pub fn untyped() -> Self {
        Self::typed(TypeTable::empty(), TypePolicy::Accept)
    }

    /// An empty message constrained by the given table and policy.
    pub fn typed(types: TypeTable, policy: TypePolicy) -> Self {
        Message {
            fields: BTreeMap::new(),
            types,
            policy,
            destinations: Vec::new(),
        }
    }

    pub fn policy(&self) -> TypePolicy {
        self.policy
    }

    pub fn type_table(&self) -> &TypeTable {
        &self.types
    }

    /// Writes a field, honouring the type table and policy. Only the
    /// [`TypePolicy::Reject`] policy produces an error; the other policies
    /// resolve the write internally.
    pub fn put(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Result<Self> {
        let field = field.into();
        let value = value.into();

        match self.types.kind_of(&field) {
            Some(expected) if value.is_assignable_to(expected) => {
                self.fields.insert(field, value);
            }
            Some(expected) => match self.policy {
                TypePolicy::Accept => {
                    self.fields.insert(field, value);
                }
                TypePolicy::Stringify => {
                    self.fields.insert(field, FieldValue::Str(value.to_string()));
                }
                TypePolicy::DropWithError => {
                    self.append_error(format!(
                        "type mismatch when inserting value {} with type {} under key '{}' \
                         with required type {}",
                        value,
                        value.kind(),
                        field,
                        expected
                    ));
                }
                TypePolicy::Reject => {
                    return Err(TypeError::TypeMismatch {
                        field,
                        expected,
                        actual: value.kind(),
                    });
                }
            },
            None => match self.policy {
                TypePolicy::Accept => {
                    self.fields.insert(field, value);
                }
                TypePolicy::Stringify => {
                    self.fields.insert(field, FieldValue::Str(value.to_string()));
                }
                TypePolicy::DropWithError => {
                    self.append_error(format!(
                        "failed to insert value {value} under key '{field}': no type mapping found"
                    ));
                }
                TypePolicy::Reject => {
                    return Err(TypeError::UnknownField { field });
                }
            },
        }

        Ok(self)
    }

    /// Writes several fields in one go.
    pub fn put_many<I, S, V>(self, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<FieldValue>,
    {
        let mut message = self;
        for (field, value) in entries {
            message = message.put(field, value)?;
        }
        Ok(message)
    }

    /// Removes a field, returning the message without it.
    pub fn remove(mut self, field: &str) -> Self {
        self.fields.remove(field);
        self
    }

    /// Sets the canonical `@timestamp` field.
    pub fn put_timestamp(self, timestamp: DateTime<FixedOffset>) -> Result<Self> {
        self.put(TIMESTAMP_FIELD, timestamp)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Typed read: the string under `field`, or `None` when absent or of a
    /// different kind.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(FieldValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        match self.fields.get(field) {
            Some(FieldValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Typed read as float; integers widen.
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        match self.fields.get(field) {
            Some(FieldValue::Float(v)) => Some(*v),
            Some(FieldValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        match self.fields.get(field) {
            Some(FieldValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_timestamp(&self, field: &str) -> Option<DateTime<FixedOffset>> {
        match self.fields.get(field) {
            Some(FieldValue::Timestamp(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_object(&self, field: &str) -> Option<&serde_json::Value> {
        match self.fields.get(field) {
            Some(FieldValue::Object(v)) => Some(v),
            _ => None,
        }
    }

    /// Strict read: fails when the field is absent or holds a different
    /// kind of value.
    pub fn require_str(&self, field: &str) -> Result<&str> {
        self.get_str(field)
            .ok_or_else(|| self.strict_error(field, FieldKind::Str))
    }

    pub fn require_i64(&self, field: &str) -> Result<i64> {
        self.get_i64(field)
            .ok_or_else(|| self.strict_error(field, FieldKind::Int))
    }

    pub fn require_timestamp(&self, field: &str) -> Result<DateTime<FixedOffset>> {
        self.get_timestamp(field)
            .ok_or_else(|| self.strict_error(field, FieldKind::Timestamp))
    }

    fn strict_error(&self, field: &str, expected: FieldKind) -> TypeError {
        match self.fields.get(field) {
            None => TypeError::NotFound {
                field: field.to_owned(),
            },
            Some(value) => TypeError::TypeMismatch {
                field: field.to_owned(),
                expected,
                actual: value.kind(),
            },
        }
    }

    /// Iterates over all fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Appends a destination. Destinations form an ordered multiset; the
    /// egress stage issues one action per entry.
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    fn append_error(&mut self, error: String) {
        match self.fields.get_mut(ERROR_FIELD) {
            Some(FieldValue::Str(existing)) => {
                existing.push('\n');
                existing.push_str(&error);
            }
            _ => {
                self.fields.insert(ERROR_FIELD.to_owned(), FieldValue::Str(error));
            }
        }
    }
}

/// Equality is structural over (field map, type table, policy) so tests can
/// compare expected and actual messages.
impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields && self.types == other.types && self.policy == other.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn host_table() -> TypeTable {
        TypeTable::of([
            ("host", FieldKind::Str),
            ("count", FieldKind::Int),
            ("ratio", FieldKind::Float),
        ])
    }

    #[test]
    fn test_untyped_accepts_everything() {
        let message = Message::untyped()
            .put("body", "hello")
            .unwrap()
            .put("count", 3i64)
            .unwrap();
        assert_eq!(message.get_str("body"), Some("hello"));
        assert_eq!(message.get_i64("count"), Some(3));
    }

    #[test]
    fn test_typed_put_matching_kind() {
        let message = Message::typed(host_table(), TypePolicy::Reject)
            .put("host", "web-1")
            .unwrap();
        assert_eq!(message.get_str("host"), Some("web-1"));
    }

    #[test]
    fn test_int_widens_into_float_field() {
        let message = Message::typed(host_table(), TypePolicy::Reject)
            .put("ratio", 2i64)
            .unwrap();
        assert_eq!(message.get_f64("ratio"), Some(2.0));
    }

    #[test]
    fn test_reject_policy_errors() {
        let unknown = Message::typed(host_table(), TypePolicy::Reject).put("other", 1i64);
        assert!(matches!(unknown, Err(TypeError::UnknownField { .. })));

        let mismatched = Message::typed(host_table(), TypePolicy::Reject).put("count", "nan");
        assert!(matches!(mismatched, Err(TypeError::TypeMismatch { .. })));
    }

    #[test]
    fn test_drop_policy_records_error() {
        let message = Message::typed(host_table(), TypePolicy::DropWithError)
            .put("other", 1i64)
            .unwrap();
        assert!(!message.contains("other"));
        let error = message.get_str(ERROR_FIELD).unwrap();
        assert!(error.contains("other"));
        assert!(error.contains("no type mapping found"));
    }

    #[test]
    fn test_drop_policy_accumulates_errors() {
        let message = Message::typed(host_table(), TypePolicy::DropWithError)
            .put("a", 1i64)
            .unwrap()
            .put("count", "nan")
            .unwrap();
        let error = message.get_str(ERROR_FIELD).unwrap();
        assert_eq!(error.lines().count(), 2);
    }

    #[test]
    fn test_stringify_policy_stores_textual_form() {
        let message = Message::typed(host_table(), TypePolicy::Stringify)
            .put("count", "nan")
            .unwrap()
            .put("other", 42i64)
            .unwrap();
        assert_eq!(message.get_str("count"), Some("nan"));
        assert_eq!(message.get_str("other"), Some("42"));
    }

    #[test]
    fn test_strict_reads() {
        let message = Message::untyped().put("host", "web-1").unwrap();
        assert_eq!(message.require_str("host").unwrap(), "web-1");
        assert!(matches!(
            message.require_str("missing"),
            Err(TypeError::NotFound { .. })
        ));
        assert!(matches!(
            message.require_i64("host"),
            Err(TypeError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_equality_is_structural() {
        let a = Message::untyped().put("x", 1i64).unwrap();
        let b = Message::untyped().put("x", 1i64).unwrap();
        let c = Message::untyped().put("x", 2i64).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        // A different policy breaks equality even with identical fields.
        let d = Message::typed(TypeTable::empty(), TypePolicy::Reject)
            .put("x", 1i64)
            .unwrap();
        assert_ne!(a, d);
    }

    #[test]
    fn test_remove_and_empty_message() {
        let message = Message::untyped().put("x", 1i64).unwrap().remove("x");
        assert!(message.is_empty());
        assert_eq!(message.len(), 0);
    }

    #[test]
    fn test_destinations_are_ordered_and_repeatable() {
        let a = Destination::daily("a").unwrap();
        let b = Destination::constant("b").unwrap();
        let message = Message::untyped()
            .with_destination(a.clone())
            .with_destination(b.clone())
            .with_destination(a.clone());
        assert_eq!(message.destinations(), &[a.clone(), b, a]);
    }

    #[test]
    fn test_put_timestamp_sets_canonical_field() {
        let ts = Utc
            .with_ymd_and_hms(2015, 9, 30, 12, 31, 21)
            .unwrap()
            .fixed_offset();
        let message = Message::untyped().put_timestamp(ts).unwrap();
        assert_eq!(message.get_timestamp(TIMESTAMP_FIELD), Some(ts));
    }
}
