//! Multi-tenant alerting rule engine.
//!
//! This crate provides:
//! - YAML-based rule definition with serde deserialization
//! - Filesystem rule store with hot-reload via `notify` watcher
//! - Per-rule evaluation tasks with skip-if-busy scheduling
//! - Debounced alert state machine (Inactive → Pending → Firing)
//! - A manager that reconciles tasks against the store and shuts the
//!   whole set down gracefully
//!
//! The telemetry backend and notification transport are capability traits
//! ([`TelemetryReader`], re-exported [`vigil_notify::AlertTransport`]);
//! everything else is owned here.

pub mod cache;
pub mod error;
pub mod eval;
pub mod loader;
pub mod manager;
pub mod reader;
pub mod schema;
pub mod state;
pub mod store;
pub mod task;
pub mod validation;

pub use cache::{NoopCache, QueryResultCache, ResultCache};
pub use error::{Result, RuleError};
pub use eval::{EvalOutcome, Evaluator};
pub use loader::FileRuleStore;
pub use manager::{Manager, ManagerOptions, RuleStatus};
pub use reader::{LabeledSeries, QueryError, TelemetryReader, TimeRange};
pub use schema::{CompareOp, QuerySpec, Rule, Severity};
pub use state::{AlertState, InstanceStatus, StateTracker};
pub use store::{MemoryRuleStore, RuleStore, StoreError};
