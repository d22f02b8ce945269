//! Familiar Analytics
//!
//! A vendor-neutral analytics data layer: application events become
//! schema-checked records before they leave the application, and the place in
//! the view where an event happened travels with it.
//!
//! ## Components
//!
//! - **Schema Registry**: named schemas composed by parent/child inheritance
//! - **Validator**: required/default/enum/dependency checks against resolved schemas
//! - **Data Layer**: validating sink that fans records out to adapters
//! - **Dispatch Pipeline**: pre/post listeners and state-diff observers around a store
//! - **Location Tracker**: component tagging that stamps actions with a view path
//!
//! ## Data flow
//!
//! ```text
//! callback fires ──► location stamped ──► pre-listeners ──► store mutates
//!                                                                │
//!        adapters ◄── DataLayer::push ◄── post-listeners ◄───────┤
//!                                          state listeners ◄─────┘
//! ```

pub mod config;
pub mod data_layer;
pub mod dispatch;
pub mod error;
pub mod location;
pub mod registry;
pub mod schema;
pub mod telemetry;
pub mod validator;

pub use config::AnalyticsConfig;
pub use data_layer::{Adapter, DataLayer, FnAdapter, MemoryAdapter, PushedEvent, TracingAdapter};
pub use dispatch::{
    Action, Dispatch, DispatchPhase, DispatchPipeline, DispatchReport, MatchKeys, ReducerStore, Store,
};
pub use error::{AdapterError, ListenerError, ListenerPhase, Result, SchemaError};
pub use location::{
    bind_callback, component_fn, tag_location, ActionCallback, BindLocation, Component, LocationContext,
    LocationNode, LocationPath, Tagged, TaggedProps, LOCATION_SEPARATOR,
};
pub use registry::SchemaRegistry;
pub use schema::{Dependency, FieldSpec, FieldType, Schema, SchemaDefinition};
pub use validator::{DependencyPolicy, Record, Validator};
