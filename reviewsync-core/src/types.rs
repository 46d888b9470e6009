//! Domain types for review records.
//!
//! Records arrive from the remote store as loosely-typed JSON field bags.
//! [`Record::from_json`] is the single decode step that turns such a payload
//! into typed [`FieldValue`]s; everything past the boundary works on the
//! typed form only.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque record identity, stable for the lifetime of the remote record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// An uploaded file referenced from a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Typed value of a single record field.
///
/// Serialized untagged so the wire form is the plain JSON value
/// (`"text"`, `42`, `["recA", "recB"]`, `[{"url": …}]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Links(Vec<RecordId>),
    Attachments(Vec<Attachment>),
}

impl FieldValue {
    /// Blank text, empty link lists and empty attachment lists are blank.
    /// Numbers never are.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Number(_) => false,
            FieldValue::Links(ids) => ids.is_empty(),
            FieldValue::Attachments(files) => files.is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Decode one raw JSON value. `null`, booleans, objects and mixed arrays
    /// have no typed counterpart and yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Links(ids) => {
                let joined: Vec<&str> = ids.iter().map(RecordId::as_str).collect();
                write!(f, "[{}]", joined.join(", "))
            }
            FieldValue::Attachments(files) => write!(f, "{} attachment(s)", files.len()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

/// Named field values of a record. Ordered so snapshots serialize stably.
pub type Fields = BTreeMap<String, FieldValue>;

/// A partial write: `Some(value)` sets a field, `None` clears it.
pub type FieldDelta = BTreeMap<String, Option<FieldValue>>;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Immutable snapshot of one remote record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub fields: Fields,
    #[serde(
        rename = "createdTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_time: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
            created_time: None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_text)
    }

    /// Missing fields count as blank.
    pub fn is_blank(&self, name: &str) -> bool {
        self.field(name).map(FieldValue::is_blank).unwrap_or(true)
    }

    /// True when writing `delta` would not change any field of this record.
    ///
    /// Blank and absent compare equal, so clearing an already-empty field is
    /// not a change.
    pub fn satisfies(&self, delta: &FieldDelta) -> bool {
        delta.iter().all(|(name, target)| {
            let current = self.field(name).filter(|v| !v.is_blank());
            let target = target.as_ref().filter(|v| !v.is_blank());
            current == target
        })
    }

    /// Decode a raw remote payload of the form
    /// `{"id": "...", "createdTime": "...", "fields": {...}}`.
    ///
    /// Field values with no typed counterpart are skipped rather than
    /// failing the whole record.
    pub fn from_json(value: &Value) -> Result<Self, DecodeError> {
        let obj = value
            .as_object()
            .ok_or(DecodeError::NotAnObject { what: "record" })?;

        let id = match obj.get("id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => RecordId::from(id),
            _ => return Err(DecodeError::MissingId),
        };

        let created_time = match obj.get("createdTime").and_then(Value::as_str) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|source| DecodeError::Timestamp {
                        id: id.0.clone(),
                        source,
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        let mut fields = Fields::new();
        match obj.get("fields") {
            None | Some(Value::Null) => {}
            Some(Value::Object(raw)) => {
                for (name, raw_value) in raw {
                    match FieldValue::from_json(raw_value) {
                        Some(v) => {
                            fields.insert(name.clone(), v);
                        }
                        None => {
                            tracing::debug!(record = %id, field = %name, "skipping untyped field value");
                        }
                    }
                }
            }
            Some(_) => return Err(DecodeError::NotAnObject { what: "fields" }),
        }

        Ok(Self {
            id,
            fields,
            created_time,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_id_display() {
        assert_eq!(RecordId::from("rec01").to_string(), "rec01");
        assert_eq!(RecordId::from("x"), RecordId::from(String::from("x")));
    }

    #[test]
    fn decode_typed_fields() {
        let raw = json!({
            "id": "recA",
            "createdTime": "2024-05-01T10:00:00.000Z",
            "fields": {
                "Job Name": "Lot 12",
                "Sub Backcharge Amount": 40,
                "Subcontractor to Backcharge": ["recS1", "recS2"],
                "Photos": [{"url": "https://cdn.example/p.jpg", "filename": "p.jpg", "size": 10}]
            }
        });
        let rec = Record::from_json(&raw).expect("decode");
        assert_eq!(rec.id.as_str(), "recA");
        assert!(rec.created_time.is_some());
        assert_eq!(rec.text("Job Name"), Some("Lot 12"));
        assert_eq!(
            rec.field("Sub Backcharge Amount").and_then(FieldValue::as_number),
            Some(40.0)
        );
        assert_eq!(
            rec.field("Subcontractor to Backcharge"),
            Some(&FieldValue::Links(vec!["recS1".into(), "recS2".into()]))
        );
        match rec.field("Photos") {
            Some(FieldValue::Attachments(files)) => {
                assert_eq!(files[0].filename.as_deref(), Some("p.jpg"))
            }
            other => panic!("expected attachments, got {other:?}"),
        }
    }

    #[test]
    fn decode_skips_untyped_values() {
        let raw = json!({"id": "recA", "fields": {"Done": true, "Note": null, "Name": "x"}});
        let rec = Record::from_json(&raw).expect("decode");
        assert_eq!(rec.fields.len(), 1);
        assert_eq!(rec.text("Name"), Some("x"));
    }

    #[test]
    fn decode_rejects_missing_id() {
        let err = Record::from_json(&json!({"fields": {}})).unwrap_err();
        assert!(matches!(err, DecodeError::MissingId), "got: {err}");
        let err = Record::from_json(&json!({"id": "  "})).unwrap_err();
        assert!(matches!(err, DecodeError::MissingId), "got: {err}");
    }

    #[test]
    fn decode_rejects_non_object_fields() {
        let err = Record::from_json(&json!({"id": "recA", "fields": [1, 2]})).unwrap_err();
        assert!(matches!(err, DecodeError::NotAnObject { what: "fields" }));
    }

    #[test]
    fn missing_and_blank_fields_are_blank() {
        let mut fields = Fields::new();
        fields.insert("Empty".into(), FieldValue::Text("   ".into()));
        fields.insert("None".into(), FieldValue::Links(vec![]));
        fields.insert("Zero".into(), FieldValue::Number(0.0));
        let rec = Record::new("recA", fields);
        assert!(rec.is_blank("Empty"));
        assert!(rec.is_blank("None"));
        assert!(rec.is_blank("Missing"));
        assert!(!rec.is_blank("Zero"));
    }

    #[test]
    fn satisfies_treats_blank_as_absent() {
        let mut fields = Fields::new();
        fields.insert("Outcome".into(), FieldValue::from("Approved"));
        let rec = Record::new("recA", fields);

        let mut same = FieldDelta::new();
        same.insert("Outcome".into(), Some(FieldValue::from("Approved")));
        same.insert("Reason".into(), Some(FieldValue::from("")));
        same.insert("Vendor".into(), None);
        assert!(rec.satisfies(&same));

        let mut changed = FieldDelta::new();
        changed.insert("Outcome".into(), Some(FieldValue::from("Denied")));
        assert!(!rec.satisfies(&changed));

        let mut cleared = FieldDelta::new();
        cleared.insert("Outcome".into(), None);
        assert!(!rec.satisfies(&cleared));
    }

    #[test]
    fn record_serde_roundtrip_uses_plain_values() {
        let mut fields = Fields::new();
        fields.insert("Amount".into(), FieldValue::Number(50.0));
        fields.insert("Links".into(), FieldValue::Links(vec!["recB".into()]));
        let rec = Record::new("recA", fields);
        let json = serde_json::to_value(&rec).expect("serialize");
        assert_eq!(json["fields"]["Links"], json!(["recB"]));
        let back: Record = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, rec);
    }
}
