//! Turns state-machine transitions into deduplicated notifications.
//!
//! The bridge sits between rule tasks and the external transport. Tasks
//! hand it one [`RuleNotification`] per tick; delivery runs on its own
//! worker so a slow or failing transport never blocks evaluation. Payloads
//! are produced on transition edges only — a sustained-Firing instance is
//! re-sent when the repeat interval has elapsed, to survive downstream
//! notification-system restarts.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vigil_core::{Fingerprint, Labels};

use crate::traits::{AlertEvent, AlertPayload, AlertTransport};

/// One alert instance as seen at a single evaluation tick.
#[derive(Debug, Clone)]
pub struct InstanceEvent {
    pub fingerprint: Fingerprint,
    pub labels: Labels,
    pub value: f64,
    pub active_since: Option<DateTime<Utc>>,
}

/// Everything one rule produced in one evaluation tick.
#[derive(Debug, Clone)]
pub struct RuleNotification {
    pub rule_id: String,
    pub rule_name: String,
    pub tenant: String,
    pub target: String,
    /// Rule severity, lowercase.
    pub severity: String,
    /// Rule annotations passed through to payloads.
    pub annotations: HashMap<String, String>,
    /// Instances that crossed into Firing this tick.
    pub fired: Vec<InstanceEvent>,
    /// Instances that crossed back to Inactive this tick.
    pub resolved: Vec<InstanceEvent>,
    /// Instances still Firing with no transition (repeat candidates).
    pub still_firing: Vec<InstanceEvent>,
    pub at: DateTime<Utc>,
}

impl RuleNotification {
    /// Whether the tick carries nothing deliverable even as a repeat.
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty() && self.resolved.is_empty() && self.still_firing.is_empty()
    }
}

/// Tunables for the bridge worker.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Bounded queue depth between tasks and the delivery worker.
    pub queue_depth: usize,
    /// Minimum spacing between re-sends of a sustained-Firing instance.
    pub repeat_interval: Duration,
    /// Delivery attempts per batch before giving up.
    pub attempts: u32,
    /// Base backoff between attempts; doubles each retry.
    pub backoff: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            repeat_interval: Duration::from_secs(4 * 3_600),
            attempts: 5,
            backoff: Duration::from_millis(500),
        }
    }
}

enum Msg {
    Tick(RuleNotification),
    Shutdown,
}

/// Handle for enqueueing tick results and inspecting delivery health.
///
/// Cloning is cheap; all clones feed the same worker.
#[derive(Clone)]
pub struct NotifierBridge {
    tx: mpsc::Sender<Msg>,
    last_errors: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl NotifierBridge {
    /// Spawn the delivery worker and return the handle plus its join
    /// handle. Call [`shutdown`](Self::shutdown) to let the worker drain
    /// and exit.
    pub fn spawn(
        transport: Arc<dyn AlertTransport>,
        options: BridgeOptions,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(options.queue_depth);
        let last_errors: Arc<RwLock<HashMap<(String, String), String>>> = Arc::default();

        let worker = DeliveryWorker {
            transport,
            options,
            last_errors: Arc::clone(&last_errors),
            last_sent: HashMap::new(),
        };
        let handle = tokio::spawn(worker.run(rx));

        (Self { tx, last_errors }, handle)
    }

    /// Hand a tick's transitions to the delivery worker.
    ///
    /// Never blocks: on a full queue the notification is dropped with a
    /// warning. The evaluation path must not stall on delivery.
    pub fn enqueue(&self, notification: RuleNotification) {
        if notification.is_empty() {
            return;
        }
        match self.tx.try_send(Msg::Tick(notification)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(Msg::Tick(n))) => {
                warn!(rule_id = %n.rule_id, "notification queue full, dropping tick");
            }
            Err(mpsc::error::TrySendError::Closed(Msg::Tick(n))) => {
                warn!(rule_id = %n.rule_id, "notification worker gone, dropping tick");
            }
            Err(_) => {}
        }
    }

    /// Last delivery failure for a rule, if its most recent batch failed.
    /// Rule ids are only unique within a tenant, so lookups carry both.
    pub fn last_delivery_error(&self, tenant: &str, rule_id: &str) -> Option<String> {
        self.last_errors
            .read()
            .expect("last_errors lock poisoned")
            .get(&(tenant.to_string(), rule_id.to_string()))
            .cloned()
    }

    /// Drop bookkeeping for a removed rule.
    pub fn forget_rule(&self, tenant: &str, rule_id: &str) {
        self.last_errors
            .write()
            .expect("last_errors lock poisoned")
            .remove(&(tenant.to_string(), rule_id.to_string()));
    }

    /// Ask the worker to exit after draining everything enqueued before
    /// this call. Await the join handle returned by [`spawn`](Self::spawn)
    /// to observe completion.
    pub async fn shutdown(&self) {
        // FIFO: ticks enqueued earlier are handled before the marker.
        let _ = self.tx.send(Msg::Shutdown).await;
    }
}

struct DeliveryWorker {
    transport: Arc<dyn AlertTransport>,
    options: BridgeOptions,
    last_errors: Arc<RwLock<HashMap<(String, String), String>>>,
    /// (tenant, rule id, fingerprint) → when that instance was last
    /// delivered as firing. Drives repeat-interval suppression.
    last_sent: HashMap<(String, String, Fingerprint), Instant>,
}

impl DeliveryWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Msg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Tick(notification) => self.handle(notification).await,
                Msg::Shutdown => break,
            }
        }
        debug!("notifier bridge worker exiting");
    }

    async fn handle(&mut self, n: RuleNotification) {
        let payloads = self.build_batch(&n);
        if payloads.is_empty() {
            return;
        }

        match self.deliver_with_retry(&n, &payloads).await {
            Ok(()) => {
                let now = Instant::now();
                for p in &payloads {
                    let key = (n.tenant.clone(), n.rule_id.clone(), p.labels.fingerprint());
                    match p.event {
                        AlertEvent::Firing => {
                            self.last_sent.insert(key, now);
                        }
                        AlertEvent::Resolved => {
                            self.last_sent.remove(&key);
                        }
                    }
                }
                self.last_errors
                    .write()
                    .expect("last_errors lock poisoned")
                    .remove(&(n.tenant.clone(), n.rule_id.clone()));
                info!(
                    rule_id = %n.rule_id,
                    count = payloads.len(),
                    transport = self.transport.name(),
                    "notification batch delivered"
                );
            }
            Err(err) => {
                warn!(
                    rule_id = %n.rule_id,
                    error = %err,
                    "notification batch failed after {} attempts",
                    self.options.attempts
                );
                self.last_errors
                    .write()
                    .expect("last_errors lock poisoned")
                    .insert((n.tenant.clone(), n.rule_id.clone()), err);
            }
        }
    }

    /// Build one deduplicated batch for the tick: all edges, plus any
    /// still-firing instance whose repeat interval has elapsed.
    fn build_batch(&mut self, n: &RuleNotification) -> Vec<AlertPayload> {
        let mut payloads = Vec::new();

        for ev in &n.fired {
            payloads.push(self.payload(n, ev, AlertEvent::Firing));
        }
        for ev in &n.resolved {
            payloads.push(self.payload(n, ev, AlertEvent::Resolved));
        }
        for ev in &n.still_firing {
            let key = (n.tenant.clone(), n.rule_id.clone(), ev.fingerprint);
            let due = match self.last_sent.get(&key) {
                Some(sent) => sent.elapsed() >= self.options.repeat_interval,
                // Never delivered (e.g. worker restarted): send now.
                None => true,
            };
            if due {
                debug!(rule_id = %n.rule_id, fingerprint = %ev.fingerprint, "repeat notification due");
                payloads.push(self.payload(n, ev, AlertEvent::Firing));
            }
        }

        payloads
    }

    fn payload(&self, n: &RuleNotification, ev: &InstanceEvent, event: AlertEvent) -> AlertPayload {
        AlertPayload {
            rule_id: n.rule_id.clone(),
            rule_name: n.rule_name.clone(),
            tenant: n.tenant.clone(),
            target: n.target.clone(),
            event,
            severity: n.severity.clone(),
            labels: ev.labels.clone(),
            annotations: n.annotations.clone(),
            value: ev.value,
            active_since: ev.active_since,
            at: n.at,
        }
    }

    async fn deliver_with_retry(
        &self,
        n: &RuleNotification,
        payloads: &[AlertPayload],
    ) -> Result<(), String> {
        let mut backoff = self.options.backoff;
        let mut last_err = String::new();

        for attempt in 1..=self.options.attempts.max(1) {
            match self.transport.deliver(&n.tenant, payloads).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    last_err = err.to_string();
                    if !err.is_retryable() {
                        return Err(last_err);
                    }
                    if attempt < self.options.attempts {
                        debug!(
                            rule_id = %n.rule_id,
                            attempt,
                            error = %last_err,
                            "delivery failed, backing off {:?}",
                            backoff
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        Err(last_err)
    }
}
