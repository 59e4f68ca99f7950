//! Per-method parameter schemas.
//!
//! A deliberately small subset of JSON Schema: required keys, a primitive
//! type per property, and optional enum membership.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ProtocolError, ProtocolResult};

/// Primitive type tag for a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SchemaType {
    String,
    Number,
    /// A number with no fractional part.
    Integer,
    Boolean,
    Object,
    Array,
    Null,
    /// Unknown type name; accepts any value.
    Other(String),
}

impl SchemaType {
    pub fn as_str(&self) -> &str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::Null => "null",
            SchemaType::Other(name) => name,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
            SchemaType::Null => value.is_null(),
            SchemaType::Other(_) => true,
        }
    }
}

impl From<String> for SchemaType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "string" => SchemaType::String,
            "number" => SchemaType::Number,
            "integer" => SchemaType::Integer,
            "boolean" => SchemaType::Boolean,
            "object" => SchemaType::Object,
            "array" => SchemaType::Array,
            "null" => SchemaType::Null,
            _ => SchemaType::Other(name),
        }
    }
}

impl From<SchemaType> for String {
    fn from(kind: SchemaType) -> Self {
        kind.as_str().to_string()
    }
}

/// Constraints on a single named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: SchemaType,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PropertySchema {
    pub fn of(kind: SchemaType) -> Self {
        Self {
            kind,
            allowed: None,
            description: None,
        }
    }

    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Parameter schema attached to a handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertySchema>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.properties.is_empty()
    }

    /// Validate request params. Absent params are treated as `{}`.
    ///
    /// Required keys are checked before property constraints; the first
    /// violation wins.
    pub fn validate(&self, params: Option<&Value>) -> ProtocolResult<()> {
        let empty = serde_json::Map::new();
        let fields = match params {
            None => &empty,
            Some(Value::Object(map)) => map,
            Some(Value::Array(_)) if self.is_empty() => return Ok(()),
            Some(Value::Array(_)) => {
                return Err(ProtocolError::InvalidParams {
                    message: "Expected named parameters (an object)".to_string(),
                    data: Some(json!({ "expected": "object" })),
                })
            }
            Some(other) => {
                return Err(ProtocolError::InvalidParams {
                    message: format!("Params must be an object, got {other}"),
                    data: Some(json!({ "expected": "object" })),
                })
            }
        };

        for name in &self.required {
            if !fields.contains_key(name) {
                return Err(ProtocolError::InvalidParams {
                    message: format!("Missing required parameter: {name}"),
                    data: Some(json!({ "parameter": name })),
                });
            }
        }

        for (name, property) in &self.properties {
            let Some(value) = fields.get(name) else {
                continue;
            };
            if !property.kind.matches(value) {
                return Err(ProtocolError::InvalidParams {
                    message: format!(
                        "Parameter '{name}' must be of type {}",
                        property.kind.as_str()
                    ),
                    data: Some(json!({ "parameter": name, "expected": property.kind.as_str() })),
                });
            }
            if let Some(allowed) = &property.allowed {
                if !allowed.contains(value) {
                    return Err(ProtocolError::InvalidParams {
                        message: format!("Parameter '{name}' has a value outside its allowed set"),
                        data: Some(json!({ "parameter": name, "allowed": allowed })),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::error_codes::INVALID_PARAMS;

    fn deploy_schema() -> ParamSchema {
        ParamSchema::new()
            .require("siteId")
            .property("siteId", PropertySchema::of(SchemaType::String))
            .property("replicas", PropertySchema::of(SchemaType::Integer))
            .property(
                "environment",
                PropertySchema::of(SchemaType::String).one_of(["staging", "production"]),
            )
    }

    #[test]
    fn test_missing_required_names_parameter() {
        let err = deploy_schema()
            .validate(Some(&json!({"replicas": 2})))
            .unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMS);
        assert_eq!(err.data().unwrap()["parameter"], "siteId");
        assert!(err.to_string().contains("Missing required parameter: siteId"));
    }

    #[test]
    fn test_absent_params_treated_as_empty_object() {
        let err = deploy_schema().validate(None).unwrap_err();
        assert_eq!(err.data().unwrap()["parameter"], "siteId");
        assert!(ParamSchema::new().validate(None).is_ok());
    }

    #[test]
    fn test_type_mismatch_reports_expected() {
        let err = deploy_schema()
            .validate(Some(&json!({"siteId": 42})))
            .unwrap_err();
        let data = err.data().unwrap();
        assert_eq!(data["parameter"], "siteId");
        assert_eq!(data["expected"], "string");
    }

    #[test]
    fn test_integer_accepts_whole_floats_only() {
        let schema = deploy_schema();
        assert!(schema.validate(Some(&json!({"siteId": "s", "replicas": 3}))).is_ok());
        assert!(schema.validate(Some(&json!({"siteId": "s", "replicas": 3.0}))).is_ok());
        let err = schema
            .validate(Some(&json!({"siteId": "s", "replicas": 2.5})))
            .unwrap_err();
        assert_eq!(err.data().unwrap()["expected"], "integer");
    }

    #[test]
    fn test_enum_violation_reports_allowed() {
        let err = deploy_schema()
            .validate(Some(&json!({"siteId": "s", "environment": "qa"})))
            .unwrap_err();
        let data = err.data().unwrap();
        assert_eq!(data["parameter"], "environment");
        assert_eq!(data["allowed"], json!(["staging", "production"]));
    }

    #[test]
    fn test_object_type_rejects_arrays() {
        let schema = ParamSchema::new().property("meta", PropertySchema::of(SchemaType::Object));
        assert!(schema.validate(Some(&json!({"meta": {}}))).is_ok());
        assert!(schema.validate(Some(&json!({"meta": []}))).is_err());
    }

    #[test]
    fn test_unknown_type_accepts_anything() {
        let schema: ParamSchema = serde_json::from_value(json!({
            "properties": {"blob": {"type": "binary"}}
        }))
        .unwrap();
        assert_eq!(
            schema.properties["blob"].kind,
            SchemaType::Other("binary".to_string())
        );
        assert!(schema.validate(Some(&json!({"blob": [1, 2]}))).is_ok());
    }

    #[test]
    fn test_array_params_only_pass_empty_schema() {
        assert!(ParamSchema::new().validate(Some(&json!([1, 2]))).is_ok());
        assert!(deploy_schema().validate(Some(&json!(["s"]))).is_err());
    }

    #[test]
    fn test_schema_deserializes_from_json_shape() {
        let schema: ParamSchema = serde_json::from_value(json!({
            "required": ["siteId"],
            "properties": {
                "siteId": {"type": "string"},
                "replicas": {"type": "integer"},
                "environment": {"type": "string", "enum": ["staging", "production"]}
            }
        }))
        .unwrap();
        assert_eq!(schema, deploy_schema());
    }
}
