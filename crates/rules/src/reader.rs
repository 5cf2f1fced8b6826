//! Telemetry reader contract.
//!
//! The query engine is externally owned. The rule manager only requires
//! that a reader executes a query over a time range and returns labeled
//! series, distinguishing transient failures (retry at the next tick) from
//! permanently invalid queries (the rule stops and surfaces the error).

use std::time::Duration;

use chrono::{DateTime, Utc};

use vigil_core::Labels;

use crate::schema::QuerySpec;

/// Half-open evaluation window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or(Duration::ZERO)
    }
}

/// One series in a query result, reduced to the value the rule compares.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSeries {
    pub labels: Labels,
    pub value: f64,
}

/// Errors from the telemetry backend.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Backend hiccup; retried at the next natural tick.
    #[error("transient query failure: {0}")]
    Transient(String),

    /// The query itself is invalid; evaluating it again cannot succeed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The query exceeded its deadline.
    #[error("query exceeded deadline of {0:?}")]
    Timeout(Duration),
}

impl QueryError {
    /// Whether the next tick could plausibly succeed without a rule change.
    pub fn is_transient(&self) -> bool {
        !matches!(self, QueryError::InvalidQuery(_))
    }
}

/// Executes telemetry queries on behalf of rule evaluations.
///
/// Implementations must tolerate cancellation (the future may be dropped
/// at shutdown) and should respect the deadline the evaluator imposes.
#[async_trait::async_trait]
pub trait TelemetryReader: Send + Sync {
    async fn query(
        &self,
        tenant: &str,
        spec: &QuerySpec,
        range: TimeRange,
    ) -> Result<Vec<LabeledSeries>, QueryError>;
}
