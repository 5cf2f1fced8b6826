//! HTTP webhook transport.
//!
//! Delivers payload batches as a JSON array to a configured endpoint.
//! `${VAR_NAME}` references in the URL and header values are resolved from
//! the environment at construction time, so secrets stay out of rule files.

use std::collections::HashMap;

use crate::traits::{AlertPayload, AlertTransport, DeliveryError};

/// Delivers alert batches as JSON over HTTP POST.
#[derive(Debug)]
pub struct WebhookTransport {
    /// Target URL (env vars already resolved).
    url: String,
    /// Custom headers sent on every request.
    headers: HashMap<String, String>,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl WebhookTransport {
    /// Create a webhook transport.
    ///
    /// Missing env vars referenced in `url` or header values produce a
    /// [`DeliveryError::Config`] here rather than at delivery time.
    pub fn new(url: String, headers: HashMap<String, String>) -> Result<Self, DeliveryError> {
        let url = resolve_env_vars(&url)?;
        let mut resolved = HashMap::with_capacity(headers.len());
        for (name, value) in headers {
            resolved.insert(name, resolve_env_vars(&value)?);
        }
        Ok(Self {
            url,
            headers: resolved,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait::async_trait]
impl AlertTransport for WebhookTransport {
    async fn deliver(&self, tenant: &str, payloads: &[AlertPayload]) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("X-Vigil-Tenant", tenant)
            .json(payloads);

        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(url = %self.url, %status, "webhook returned non-2xx status");
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(
            url = %self.url,
            count = payloads.len(),
            "webhook batch delivered"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Resolve `${VAR_NAME}` patterns using `std::env::var`.
fn resolve_env_vars(input: &str) -> Result<String, DeliveryError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let end = tail.find('}').ok_or_else(|| {
            DeliveryError::Config(format!("unclosed env var reference in: {input}"))
        })?;
        let name = &tail[..end];
        let value = std::env::var(name)
            .map_err(|_| DeliveryError::Config(format!("env var not found: {name}")))?;
        out.push_str(&value);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
