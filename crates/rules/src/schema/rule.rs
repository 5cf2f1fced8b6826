//! The [`Rule`] type and its component pieces.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vigil_core::duration::serde_duration;

/// A persisted alerting rule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Stable rule identity, unique per tenant.
    pub id: String,
    /// Owning tenant.
    pub tenant: String,
    /// Human-readable name, used in notifications.
    pub name: String,
    /// Telemetry query this rule evaluates.
    pub query: QuerySpec,
    /// Comparison applied to each series value.
    pub compare: CompareOp,
    /// Threshold on the right-hand side of the comparison.
    pub threshold: f64,
    /// Evaluation cadence.
    #[serde(with = "serde_duration")]
    pub interval: Duration,
    /// Length of the evaluated time window.
    #[serde(with = "serde_duration")]
    pub window: Duration,
    /// Minimum continuous-true time before Pending becomes Firing.
    /// Zero fires on the first breached evaluation.
    #[serde(rename = "for", with = "serde_duration", default)]
    pub for_duration: Duration,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Notification routing target name.
    #[serde(default)]
    pub target: String,
    /// Definition version; any edit bumps it and restarts the task.
    #[serde(default = "default_version")]
    pub version: u64,
    /// Per-rule override of the process-wide ingestion-lag offset.
    #[serde(default, with = "serde_duration::option", skip_serializing_if = "Option::is_none")]
    pub eval_delay: Option<Duration>,
    #[serde(default)]
    pub severity: Severity,
    /// Free-form annotations forwarded on notifications (runbook links etc.).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_version() -> u64 {
    1
}

impl Rule {
    /// Ingestion-lag offset for this rule, falling back to the process-wide
    /// default.
    pub fn effective_eval_delay(&self, default: Duration) -> Duration {
        self.eval_delay.unwrap_or(default)
    }
}

/// Opaque telemetry query specification.
///
/// The expression language belongs to the backend; the rule manager only
/// carries it through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub expr: String,
    /// Optional backend-specific scope hint (datasource, cluster, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl QuerySpec {
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            scope: None,
        }
    }
}

/// Comparison operator between an observed value and the rule threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Above,
    Below,
    AtOrAbove,
    AtOrBelow,
    Equal,
    NotEqual,
}

impl CompareOp {
    /// Whether `value <op> threshold` holds.
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::Above => value > threshold,
            CompareOp::Below => value < threshold,
            CompareOp::AtOrAbove => value >= threshold,
            CompareOp::AtOrBelow => value <= threshold,
            // Exact comparison, matching what the query backend returns for
            // discrete-valued series (up/down, counts).
            CompareOp::Equal => value == threshold,
            CompareOp::NotEqual => value != threshold,
        }
    }
}

/// Notification severity attached to payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}
