//! Transport trait definition and shared notification types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use vigil_core::Labels;

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport rejected batch ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl DeliveryError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::Config(_))
    }
}

/// Lifecycle event a payload describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEvent {
    Firing,
    Resolved,
}

/// One alert instance, rendered for delivery.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub rule_id: String,
    pub rule_name: String,
    pub tenant: String,
    /// Routing target name the receiving system uses to pick a channel.
    pub target: String,
    pub event: AlertEvent,
    /// Rule severity, lowercase ("info", "warning", "critical").
    pub severity: String,
    pub labels: Labels,
    /// Free-form rule annotations (runbook links etc.), passed through.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
    /// Last observed value for the series.
    pub value: f64,
    /// When the condition first became true, if the instance is active.
    pub active_since: Option<DateTime<Utc>>,
    /// Evaluation timestamp that produced this payload.
    pub at: DateTime<Utc>,
}

/// Trait for notification transport implementations.
///
/// A transport delivers one batch per call; all payloads in a batch belong
/// to the same rule and tick. Implementations must be safe to call
/// concurrently.
#[async_trait::async_trait]
pub trait AlertTransport: Send + Sync {
    /// Deliver a batch of payloads for one tenant.
    async fn deliver(&self, tenant: &str, payloads: &[AlertPayload]) -> Result<(), DeliveryError>;

    /// Human-readable name for this transport (e.g., "webhook", "log").
    fn name(&self) -> &str;
}
