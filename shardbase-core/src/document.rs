// shardbase-core/src/document.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A stored document: a synthesized string id plus arbitrary JSON fields.
///
/// The id is assigned on insert and never changes. It serializes inline with
/// the other fields, so the on-disk form is a plain JSON object with an `id`
/// key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: String, fields: Map<String, Value>) -> Self {
        Document { id, fields }
    }

    /// Synthesize a fresh id (UUID v4, process-locally collision resistant).
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Build a document from a JSON object, assigning a fresh id.
    /// Any `id` supplied by the caller is replaced.
    pub fn with_generated_id(mut fields: Map<String, Value>) -> Self {
        fields.remove("id");
        Document {
            id: Self::generate_id(),
            fields,
        }
    }

    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(map)
    }

    /// Resolve a field, with dot notation for nested objects and numeric
    /// segments for array elements. `id` resolves to the document id.
    pub fn get(&self, path: &str) -> Option<Value> {
        if path.is_empty() {
            return None;
        }
        if path == "id" {
            return Some(Value::String(self.id.clone()));
        }

        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    /// True when the field resolves to a non-null value — the condition for
    /// the field to participate in an index entry.
    pub fn has_value(&self, path: &str) -> bool {
        matches!(self.get(path), Some(v) if !v.is_null())
    }

    /// Shallow-overwrite merge: every change lands at the top level,
    /// replacing any previous value (including with an explicit null).
    /// The id is immutable and silently skipped.
    pub fn apply_changes(&mut self, changes: &Map<String, Value>) {
        for (key, value) in changes {
            if key == "id" {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Document::with_generated_id(obj(json!({"name": "A"})));
        let b = Document::with_generated_id(obj(json!({"name": "B"})));
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 36);
    }

    #[test]
    fn test_caller_supplied_id_is_replaced() {
        let doc = Document::with_generated_id(obj(json!({"id": "forged", "name": "A"})));
        assert_ne!(doc.id, "forged");
        assert!(!doc.fields.contains_key("id"));
    }

    #[test]
    fn test_roundtrip_through_value() {
        let doc = Document::new(
            "doc-1".to_string(),
            obj(json!({"name": "Alice", "age": 30, "tags": ["a", "b"]})),
        );
        let value = doc.to_value();
        assert_eq!(value["id"], "doc-1");

        let restored = Document::from_value(value).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn test_get_dot_path() {
        let doc = Document::new(
            "x".to_string(),
            obj(json!({
                "address": {"city": "Budapest", "zip": 1111},
                "items": [{"name": "first"}, {"name": "second"}]
            })),
        );

        assert_eq!(doc.get("address.city"), Some(json!("Budapest")));
        assert_eq!(doc.get("items.1.name"), Some(json!("second")));
        assert_eq!(doc.get("id"), Some(json!("x")));
        assert_eq!(doc.get("address.missing"), None);
        assert_eq!(doc.get(""), None);
    }

    #[test]
    fn test_has_value_excludes_null() {
        let doc = Document::new(
            "x".to_string(),
            obj(json!({"a": 1, "b": null})),
        );
        assert!(doc.has_value("a"));
        assert!(!doc.has_value("b"));
        assert!(!doc.has_value("c"));
        assert!(doc.has_value("id"));
    }

    #[test]
    fn test_apply_changes_shallow() {
        let mut doc = Document::new(
            "x".to_string(),
            obj(json!({"age": 29, "role": "designer"})),
        );
        doc.apply_changes(&obj(json!({"age": 30, "active": true, "id": "forged"})));

        assert_eq!(doc.get("age"), Some(json!(30)));
        assert_eq!(doc.get("role"), Some(json!("designer")));
        assert_eq!(doc.get("active"), Some(json!(true)));
        assert_eq!(doc.id, "x");
    }

    #[test]
    fn test_apply_changes_null_overwrites() {
        let mut doc = Document::new("x".to_string(), obj(json!({"age": 29})));
        doc.apply_changes(&obj(json!({"age": null})));
        assert_eq!(doc.get("age"), Some(json!(null)));
        assert!(!doc.has_value("age"));
    }
}
