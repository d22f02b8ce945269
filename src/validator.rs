//! Record validation against resolved schemas
//!
//! Validation is a pure structural check: it reads the registry, never
//! mutates it, and returns either the resolved record (inputs plus applied
//! defaults) or the first error found.
//!
//! Fields are checked in name order. Unknown fields are reported before any
//! per-field problem so a typo is never masked by a missing-field error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, SchemaError};
use crate::registry::{dependency_order, SchemaRegistry};
use crate::schema::{FieldSpec, FieldType};

/// A record as supplied at push time, and as returned after validation
pub type Record = Map<String, Value>;

/// What to do with a supplied field whose `depends_on` condition fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyPolicy {
    /// Reject the record with `UnsatisfiedDependency`
    #[default]
    Reject,
    /// Drop the field from the resolved record
    Omit,
}

/// Validates records against schemas held in a registry
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    registry: &'a SchemaRegistry,
    policy: DependencyPolicy,
}

impl<'a> Validator<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self {
            registry,
            policy: DependencyPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DependencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> DependencyPolicy {
        self.policy
    }

    /// Validate `record` against `schema_name`, returning the resolved record
    pub fn validate(&self, schema_name: &str, record: &Record) -> Result<Record> {
        let fields = self.registry.resolve(schema_name)?;

        if let Some(field) = record.keys().find(|k| !fields.contains_key(k.as_str())) {
            return Err(SchemaError::UnknownField {
                schema: schema_name.to_string(),
                field: field.clone(),
            });
        }

        let mut resolved = Record::new();

        // Unconditional fields first, so dependencies can see their resolved values
        for (name, spec) in fields.iter().filter(|(_, s)| s.depends_on.is_none()) {
            self.resolve_field(schema_name, name, spec, record.get(name), &mut resolved)?;
        }

        // Dependent fields in dependency order, so a chain sees resolved values
        for name in dependency_order(schema_name, &fields)? {
            let spec = &fields[name];
            let Some(dependency) = &spec.depends_on else {
                continue;
            };

            if resolved.get(&dependency.field) == Some(&dependency.equals) {
                self.resolve_field(schema_name, name, spec, record.get(name), &mut resolved)?;
                continue;
            }

            // Condition fails: required/default do not apply, a supplied value is a mistake
            if record.contains_key(name) {
                match self.policy {
                    DependencyPolicy::Reject => {
                        return Err(SchemaError::UnsatisfiedDependency {
                            schema: schema_name.to_string(),
                            field: name.to_string(),
                            depends_on: dependency.field.clone(),
                            expected: dependency.equals.clone(),
                        })
                    }
                    DependencyPolicy::Omit => {
                        debug!(schema = schema_name, field = name, "dropping field with unsatisfied dependency");
                    }
                }
            }
        }

        Ok(resolved)
    }

    fn resolve_field(
        &self,
        schema: &str,
        name: &str,
        spec: &FieldSpec,
        value: Option<&Value>,
        resolved: &mut Record,
    ) -> Result<()> {
        let Some(value) = value else {
            if let Some(default) = &spec.default {
                resolved.insert(name.to_string(), default.clone());
            } else if spec.required {
                return Err(SchemaError::MissingRequiredField {
                    schema: schema.to_string(),
                    field: name.to_string(),
                });
            }
            return Ok(());
        };

        let checked = match &spec.field_type {
            FieldType::Enum => {
                let allowed = spec.allowed_values.as_deref().unwrap_or_default();
                if !allowed.contains(value) {
                    return Err(SchemaError::InvalidEnumValue {
                        schema: schema.to_string(),
                        field: name.to_string(),
                        value: value.clone(),
                    });
                }
                value.clone()
            }
            FieldType::Reference(target) => match value {
                Value::Object(nested) => Value::Object(self.validate(target, nested)?),
                _ => return Err(type_error(schema, name, spec, value)),
            },
            field_type if field_type.accepts(value) => value.clone(),
            _ => return Err(type_error(schema, name, spec, value)),
        };

        resolved.insert(name.to_string(), checked);
        Ok(())
    }
}

fn type_error(schema: &str, field: &str, spec: &FieldSpec, value: &Value) -> SchemaError {
    SchemaError::InvalidFieldType {
        schema: schema.to_string(),
        field: field.to_string(),
        expected: spec.field_type.describe(),
        value: value.clone(),
    }
}
