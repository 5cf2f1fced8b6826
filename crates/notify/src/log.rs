//! Tracing-only transport for local runs and tests.

use crate::traits::{AlertPayload, AlertTransport, DeliveryError};

/// Writes every payload to the log instead of an external system.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait::async_trait]
impl AlertTransport for LogTransport {
    async fn deliver(&self, tenant: &str, payloads: &[AlertPayload]) -> Result<(), DeliveryError> {
        for p in payloads {
            tracing::info!(
                tenant,
                rule_id = %p.rule_id,
                rule = %p.rule_name,
                event = ?p.event,
                severity = %p.severity,
                labels = %p.labels,
                value = p.value,
                "alert"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
