//! Data Layer
//!
//! The single sink applications push analytics records into. Every push is
//! gated through the [`Validator`]; only resolved records reach adapters, in
//! registration order. Adapter failures (errors or panics) are logged per
//! adapter and never reach the pushing code.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AnalyticsConfig;
use crate::error::{AdapterError, Result};
use crate::registry::SchemaRegistry;
use crate::validator::{DependencyPolicy, Record, Validator};

/// A forwarder from resolved records to an external analytics service.
///
/// `push` is fire-and-forget from the data layer's point of view: adapters
/// doing I/O should hand the record off and return.
pub trait Adapter {
    /// Name used in logs
    fn name(&self) -> &str;

    fn push(&self, event: &str, record: &Record) -> std::result::Result<(), AdapterError>;
}

/// A successful push, kept in the optional history buffer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushedEvent {
    pub event: String,
    pub schema: String,
    pub record: Record,
    pub pushed_at: DateTime<Utc>,
}

/// The validating, adapter fan-out sink
pub struct DataLayer {
    registry: SchemaRegistry,
    adapters: Vec<Box<dyn Adapter>>,
    policy: DependencyPolicy,
    history_capacity: usize,
    history: RefCell<VecDeque<PushedEvent>>,
}

impl DataLayer {
    /// Create a data layer over a populated registry
    pub fn new(registry: SchemaRegistry) -> Self {
        Self {
            registry,
            adapters: Vec::new(),
            policy: DependencyPolicy::default(),
            history_capacity: 0,
            history: RefCell::new(VecDeque::new()),
        }
    }

    /// Create a data layer using the validation and history settings from `config`
    pub fn from_config(registry: SchemaRegistry, config: &AnalyticsConfig) -> Self {
        Self::new(registry)
            .with_dependency_policy(config.validation.dependency_policy)
            .with_history(config.data_layer.history_capacity)
    }

    pub fn with_dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Keep the last `capacity` successful pushes for debugging (0 disables)
    pub fn with_history(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self.history = RefCell::new(VecDeque::with_capacity(capacity));
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Mutable access for the initialisation phase
    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.registry
    }

    /// Append an adapter. It only sees pushes made after this call.
    pub fn add_adapter(&mut self, adapter: impl Adapter + 'static) {
        debug!(adapter = adapter.name(), position = self.adapters.len(), "adapter added");
        self.adapters.push(Box::new(adapter));
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// Validate without forwarding
    pub fn validate(&self, schema: &str, record: &Record) -> Result<Record> {
        Validator::new(&self.registry)
            .with_policy(self.policy)
            .validate(schema, record)
    }

    /// Validate `record` against `schema` and forward it to every adapter.
    ///
    /// Validation errors abort the push before any adapter runs.
    pub fn push(&self, event: &str, schema: &str, record: &Record) -> Result<Record> {
        let resolved = self.validate(schema, record)?;

        for adapter in &self.adapters {
            match panic::catch_unwind(AssertUnwindSafe(|| adapter.push(event, &resolved))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(adapter = adapter.name(), event, error = %err, "adapter push failed");
                }
                Err(payload) => {
                    warn!(
                        adapter = adapter.name(),
                        event,
                        panic = %panic_message(payload.as_ref()),
                        "adapter panicked during push"
                    );
                }
            }
        }

        if self.history_capacity > 0 {
            let mut history = self.history.borrow_mut();
            if history.len() == self.history_capacity {
                history.pop_front();
            }
            history.push_back(PushedEvent {
                event: event.to_string(),
                schema: schema.to_string(),
                record: resolved.clone(),
                pushed_at: Utc::now(),
            });
        }

        Ok(resolved)
    }

    /// Snapshot of the history buffer, oldest first
    pub fn history(&self) -> Vec<PushedEvent> {
        self.history.borrow().iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.history.borrow_mut().clear();
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Adapter that keeps every push in memory.
///
/// Clones share the same buffer, so a test can hand one clone to the data
/// layer and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    name: String,
    pushes: Rc<RefCell<Vec<(String, Record)>>>,
}

impl MemoryAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pushes: Rc::default(),
        }
    }

    /// Every `(event, record)` received so far
    pub fn pushes(&self) -> Vec<(String, Record)> {
        self.pushes.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.pushes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pushes.borrow().is_empty()
    }
}

impl Adapter for MemoryAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, event: &str, record: &Record) -> std::result::Result<(), AdapterError> {
        self.pushes
            .borrow_mut()
            .push((event.to_string(), record.clone()));
        Ok(())
    }
}

/// Adapter that logs each record through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAdapter;

impl Adapter for TracingAdapter {
    fn name(&self) -> &str {
        "tracing"
    }

    fn push(&self, event: &str, record: &Record) -> std::result::Result<(), AdapterError> {
        let body = serde_json::to_string(record).map_err(|e| AdapterError::new(self.name(), e.to_string()))?;
        info!(target: "familiar_analytics::adapter", event, record = %body, "analytics event");
        Ok(())
    }
}

/// Adapter built from a closure
pub struct FnAdapter<F> {
    name: String,
    push: F,
}

impl<F> FnAdapter<F>
where
    F: Fn(&str, &Record) -> std::result::Result<(), AdapterError>,
{
    pub fn new(name: impl Into<String>, push: F) -> Self {
        Self {
            name: name.into(),
            push,
        }
    }
}

impl<F> Adapter for FnAdapter<F>
where
    F: Fn(&str, &Record) -> std::result::Result<(), AdapterError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, event: &str, record: &Record) -> std::result::Result<(), AdapterError> {
        (self.push)(event, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldSpec, SchemaDefinition};
    use serde_json::json;

    fn layer() -> DataLayer {
        let mut registry = SchemaRegistry::new();
        registry
            .add_schema(SchemaDefinition::new("Click").field("target", FieldSpec::text().required()))
            .unwrap();
        DataLayer::new(registry)
    }

    fn click(target: &str) -> Record {
        json!({ "target": target }).as_object().cloned().unwrap()
    }

    #[test]
    fn test_history_is_bounded() {
        let layer = layer().with_history(2);
        for target in ["a", "b", "c"] {
            layer.push("Click", "Click", &click(target)).unwrap();
        }

        let history = layer.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].record["target"], json!("b"));
        assert_eq!(history[1].record["target"], json!("c"));

        layer.clear_history();
        assert!(layer.history().is_empty());
    }

    #[test]
    fn test_history_disabled_by_default() {
        let layer = layer();
        layer.push("Click", "Click", &click("a")).unwrap();
        assert!(layer.history().is_empty());
    }

    #[test]
    fn test_panicking_adapter_is_isolated() {
        let mut layer = layer();
        layer.add_adapter(FnAdapter::new("boom", |_: &str, _: &Record| -> std::result::Result<(), AdapterError> {
            panic!("vendor script missing")
        }));
        let memory = MemoryAdapter::new("memory");
        layer.add_adapter(memory.clone());

        assert!(layer.push("Click", "Click", &click("a")).is_ok());
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_tracing_adapter_accepts_records() {
        assert!(TracingAdapter.push("Click", &click("a")).is_ok());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
