// shardbase-core/src/schema.rs
// Collection schema: field constraints, relations, named index catalog.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::error::{Result, ShardBaseError};

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// A string holding an RFC 3339 timestamp.
    Date,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Date => value
                .as_str()
                .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Date => "date",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
}

/// A declared link from a local field to a document in another collection.
/// Relations drive write-time validation and result population; they never
/// influence indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub collection: String,
    #[serde(default = "default_relation_field")]
    pub field: String,
}

fn default_relation_field() -> String {
    "id".to_string()
}

/// Schema of one collection, persisted verbatim inside `_db_metadata.json`.
///
/// Fields not listed in `fields` are permitted and carry no constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,

    #[serde(default)]
    pub relations: BTreeMap<String, Relation>,

    #[serde(default, rename = "validateRelations")]
    pub validate_relations: bool,

    /// Named indices: each an ordered list of fields, length >= 1.
    #[serde(default)]
    pub indices: BTreeMap<String, Vec<String>>,
}

impl Schema {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| ShardBaseError::Validation(format!("invalid schema: {}", e)))
    }

    /// Structural checks performed once, when the collection is created.
    pub fn validate_declaration(&self) -> Result<()> {
        for (name, fields) in &self.indices {
            if fields.is_empty() {
                return Err(ShardBaseError::Validation(format!(
                    "index '{}' declares no fields",
                    name
                )));
            }
        }
        for (field, relation) in &self.relations {
            if relation.collection.is_empty() {
                return Err(ShardBaseError::Validation(format!(
                    "relation on '{}' has no target collection",
                    field
                )));
            }
        }
        Ok(())
    }

    /// Validate a document against the declared field constraints.
    /// Missing required fields and type mismatches are errors; a null value
    /// counts as missing for required-ness.
    pub fn validate_document(&self, doc: &Document) -> Result<()> {
        for (name, spec) in &self.fields {
            match doc.get(name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(ShardBaseError::Validation(format!(
                            "missing required field '{}'",
                            name
                        )));
                    }
                }
                Some(value) => {
                    if !spec.field_type.matches(&value) {
                        return Err(ShardBaseError::Validation(format!(
                            "field '{}' must be of type {}",
                            name,
                            spec.field_type.as_str()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Single-field index covering `field`, if one is declared.
    pub fn single_field_index(&self, field: &str) -> Option<&str> {
        self.indices
            .iter()
            .find(|(_, fields)| fields.len() == 1 && fields[0] == field)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(fields: Value) -> Document {
        Document::new("t".to_string(), fields.as_object().unwrap().clone())
    }

    fn schema(value: Value) -> Schema {
        Schema::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_full_schema() {
        let s = schema(json!({
            "fields": {
                "name": {"type": "string", "required": true},
                "age": {"type": "number"}
            },
            "relations": {
                "author": {"collection": "users"}
            },
            "validateRelations": true,
            "indices": {
                "age_role": ["age", "role"]
            }
        }));

        assert!(s.fields["name"].required);
        assert!(!s.fields["age"].required);
        assert_eq!(s.relations["author"].field, "id");
        assert!(s.validate_relations);
        assert_eq!(s.indices["age_role"], vec!["age", "role"]);
        s.validate_declaration().unwrap();
    }

    #[test]
    fn test_empty_schema_is_valid() {
        let s = schema(json!({}));
        s.validate_declaration().unwrap();
        s.validate_document(&doc(json!({"anything": 1}))).unwrap();
    }

    #[test]
    fn test_required_field_enforced() {
        let s = schema(json!({
            "fields": {"name": {"type": "string", "required": true}}
        }));

        s.validate_document(&doc(json!({"name": "A"}))).unwrap();
        assert!(s.validate_document(&doc(json!({}))).is_err());
        // Explicit null counts as missing.
        assert!(s.validate_document(&doc(json!({"name": null}))).is_err());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let s = schema(json!({
            "fields": {
                "age": {"type": "number"},
                "tags": {"type": "array"},
                "meta": {"type": "object"},
                "active": {"type": "boolean"}
            }
        }));

        s.validate_document(&doc(json!({
            "age": 29, "tags": [1], "meta": {}, "active": true
        })))
        .unwrap();

        assert!(s.validate_document(&doc(json!({"age": "29"}))).is_err());
        assert!(s.validate_document(&doc(json!({"tags": "nope"}))).is_err());
        assert!(s.validate_document(&doc(json!({"active": 1}))).is_err());
    }

    #[test]
    fn test_date_fields_must_parse() {
        let s = schema(json!({
            "fields": {"created": {"type": "date"}}
        }));

        s.validate_document(&doc(json!({"created": "2024-03-01T12:00:00Z"})))
            .unwrap();
        assert!(s
            .validate_document(&doc(json!({"created": "yesterday"})))
            .is_err());
        assert!(s.validate_document(&doc(json!({"created": 1234}))).is_err());
    }

    #[test]
    fn test_unlisted_fields_pass() {
        let s = schema(json!({
            "fields": {"name": {"type": "string"}}
        }));
        s.validate_document(&doc(json!({"anything": {"deep": [1, 2]}})))
            .unwrap();
    }

    #[test]
    fn test_empty_index_declaration_rejected() {
        let s = schema(json!({"indices": {"bad": []}}));
        assert!(s.validate_declaration().is_err());
    }

    #[test]
    fn test_single_field_index_lookup() {
        let s = schema(json!({
            "indices": {
                "role": ["role"],
                "age_role": ["age", "role"]
            }
        }));
        assert_eq!(s.single_field_index("role"), Some("role"));
        assert_eq!(s.single_field_index("age"), None);
    }
}
