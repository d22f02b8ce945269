//! Schema types and structures
//!
//! A [`SchemaDefinition`] is the nested, serialisable form an application
//! writes. Registering it flattens the tree into [`Schema`] nodes that point at
//! their parent by name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type of a single field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Any string, including the empty string
    Text,
    /// Any JSON number
    Number,
    /// A number without a fractional part
    Integer,
    Boolean,
    /// One of the literals in `allowed_values`
    Enum,
    /// A nested record validated against another registered schema
    Reference(String),
}

impl FieldType {
    /// Human readable name used in error messages
    pub fn describe(&self) -> String {
        match self {
            FieldType::Text => "text".to_string(),
            FieldType::Number => "number".to_string(),
            FieldType::Integer => "integer".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Enum => "enum".to_string(),
            FieldType::Reference(schema) => format!("reference to {}", schema),
        }
    }

    /// Whether a literal is of this type. Enum membership and nested
    /// references are checked by the validator, not here.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Text => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Enum => !value.is_null() && !value.is_object() && !value.is_array(),
            FieldType::Reference(_) => value.is_object(),
        }
    }
}

/// A conditional: the field is only meaningful when `field` resolves to `equals`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub field: String,
    pub equals: Value,
}

/// Specification of one field in a schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Dependency>,
}

impl FieldSpec {
    /// Create an optional field of the given type
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            default: None,
            allowed_values: None,
            depends_on: None,
        }
    }

    pub fn text() -> Self {
        Self::new(FieldType::Text)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    /// An enum field accepting exactly the given literals
    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            allowed_values: Some(values.into_iter().map(Into::into).collect()),
            ..Self::new(FieldType::Enum)
        }
    }

    pub fn reference(schema: impl Into<String>) -> Self {
        Self::new(FieldType::Reference(schema.into()))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn depends_on(mut self, field: impl Into<String>, equals: impl Into<Value>) -> Self {
        self.depends_on = Some(Dependency {
            field: field.into(),
            equals: equals.into(),
        });
        self
    }

    /// Check the field definition is self-consistent. Returns the reason when it is not.
    pub(crate) fn check(&self) -> std::result::Result<(), String> {
        match (&self.field_type, &self.allowed_values) {
            (FieldType::Enum, None) => return Err("enum field without allowed_values".to_string()),
            (FieldType::Enum, Some(values)) if values.is_empty() => {
                return Err("enum field with empty allowed_values".to_string())
            }
            (FieldType::Enum, Some(_)) => {}
            (_, Some(_)) => return Err("allowed_values on a non-enum field".to_string()),
            (_, None) => {}
        }

        if let Some(default) = &self.default {
            if matches!(self.field_type, FieldType::Reference(_)) {
                return Err("reference fields cannot carry a default".to_string());
            }
            if !self.field_type.accepts(default) {
                return Err(format!("default {} is not a valid {}", default, self.field_type.describe()));
            }
            if let Some(values) = &self.allowed_values {
                if !values.contains(default) {
                    return Err(format!("default {} is not one of the allowed values", default));
                }
            }
        }

        Ok(())
    }
}

/// Nested schema definition as written by applications:
/// `{ name, properties, childSchemas }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, FieldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_schemas: Vec<SchemaDefinition>,
}

impl SchemaDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: BTreeMap::new(),
            child_schemas: Vec::new(),
        }
    }

    /// Add a field
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.properties.insert(name.into(), spec);
        self
    }

    /// Nest a child schema under this one
    pub fn child(mut self, child: SchemaDefinition) -> Self {
        self.child_schemas.push(child);
        self
    }

    /// Names of this definition and every descendant, depth first
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.name.as_str()];
        for child in &self.child_schemas {
            names.extend(child.names());
        }
        names
    }
}

/// A registered schema node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Unique name of the schema (e.g. "Page", "Product")
    pub name: String,
    /// Fields declared directly on this schema
    pub properties: BTreeMap<String, FieldSpec>,
    /// Name of the declaring ancestor, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Schema {
    pub fn new(name: impl Into<String>, properties: BTreeMap<String, FieldSpec>, parent: Option<String>) -> Self {
        Self {
            name: name.into(),
            properties,
            parent,
        }
    }
}

/// Flattened field set of a schema and all its ancestors
pub type ResolvedFields = BTreeMap<String, FieldSpec>;
