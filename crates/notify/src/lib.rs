//! Notification side of the Vigil alerting platform.
//!
//! This crate provides:
//! - The [`AlertTransport`] contract an external delivery system implements
//! - The [`NotifierBridge`]: edge-triggered dedup, per-rule batching,
//!   repeat-interval re-sends, and retried asynchronous delivery
//! - Built-in transports: HTTP webhook and a tracing-only logger

pub mod bridge;
pub mod log;
pub mod traits;
pub mod webhook;

pub use bridge::{BridgeOptions, InstanceEvent, NotifierBridge, RuleNotification};
pub use log::LogTransport;
pub use traits::{AlertEvent, AlertPayload, AlertTransport, DeliveryError};
pub use webhook::WebhookTransport;
