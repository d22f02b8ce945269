//! Error types for the analytics data layer

use std::fmt;

use thiserror::Error;

/// Result type for schema and validation operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Registry-time and validation-time errors.
///
/// These are programmer errors: they propagate synchronously to the caller of
/// `add_schema` / `push` and are never swallowed.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema already registered: {name}")]
    DuplicateSchema { name: String },

    #[error("Cyclic schema inheritance: {}", cycle.join(" -> "))]
    CyclicSchema { cycle: Vec<String> },

    #[error("Unknown schema: {name}{}", suggestion.as_ref().map(|s| format!(" (did you mean '{}'?)", s)).unwrap_or_default())]
    UnknownSchema {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Missing required field '{field}' for schema {schema}")]
    MissingRequiredField { schema: String, field: String },

    #[error("Invalid value {value} for enum field '{field}' in schema {schema}")]
    InvalidEnumValue {
        schema: String,
        field: String,
        value: serde_json::Value,
    },

    #[error("Field '{field}' in schema {schema} requires '{depends_on}' to equal {expected}")]
    UnsatisfiedDependency {
        schema: String,
        field: String,
        depends_on: String,
        expected: serde_json::Value,
    },

    #[error("Unknown field '{field}' for schema {schema}")]
    UnknownField { schema: String, field: String },

    #[error("Field '{field}' in schema {schema} expected {expected}, got {value}")]
    InvalidFieldType {
        schema: String,
        field: String,
        expected: String,
        value: serde_json::Value,
    },

    #[error("Invalid schema definition {name}: {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SchemaError {
    /// The offending field, for validation-time errors
    pub fn field(&self) -> Option<&str> {
        match self {
            SchemaError::MissingRequiredField { field, .. }
            | SchemaError::InvalidEnumValue { field, .. }
            | SchemaError::UnsatisfiedDependency { field, .. }
            | SchemaError::UnknownField { field, .. }
            | SchemaError::InvalidFieldType { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Whether this error was raised while validating a record
    pub fn is_validation_error(&self) -> bool {
        self.field().is_some()
    }
}

/// Listener phase within the dispatch pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerPhase {
    Pre,
    Post,
    StateDiff,
}

impl fmt::Display for ListenerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerPhase::Pre => write!(f, "pre-dispatch"),
            ListenerPhase::Post => write!(f, "post-dispatch"),
            ListenerPhase::StateDiff => write!(f, "state-diff"),
        }
    }
}

/// An error raised inside a listener body.
///
/// Caught and reported by the pipeline, never rethrown across listener boundaries.
#[derive(Error, Debug)]
#[error("{phase} listener failed for action {action_type}: {source}")]
pub struct ListenerError {
    pub action_type: String,
    pub phase: ListenerPhase,
    #[source]
    pub source: anyhow::Error,
}

/// An error raised by an adapter while forwarding a record
#[derive(Error, Debug)]
#[error("Adapter {adapter} failed: {message}")]
pub struct AdapterError {
    pub adapter: String,
    pub message: String,
}

impl AdapterError {
    pub fn new(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            adapter: adapter.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_name_the_field() {
        let err = SchemaError::MissingRequiredField {
            schema: "Product".to_string(),
            field: "productId".to_string(),
        };
        assert_eq!(err.field(), Some("productId"));
        assert!(err.is_validation_error());
        assert!(err.to_string().contains("productId"));
        assert!(err.to_string().contains("Product"));
    }

    #[test]
    fn test_unknown_schema_suggestion_in_message() {
        let err = SchemaError::UnknownSchema {
            name: "Prodct".to_string(),
            suggestion: Some("Product".to_string()),
        };
        assert_eq!(err.to_string(), "Unknown schema: Prodct (did you mean 'Product'?)");
        assert!(!err.is_validation_error());
    }

    #[test]
    fn test_cycle_message() {
        let err = SchemaError::CyclicSchema {
            cycle: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(err.to_string(), "Cyclic schema inheritance: A -> B -> A");
    }
}
