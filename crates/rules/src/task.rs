//! One rule's recurring evaluation loop.
//!
//! Each enabled rule runs as an independent tokio task driving a fixed
//! interval ticker. Evaluations for one rule are strictly sequential by
//! construction: the loop body awaits the whole cycle before asking the
//! ticker again, and missed ticks are skipped (never queued), which keeps
//! state transitions applied in order.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use vigil_core::ManagerConfig;
use vigil_notify::{InstanceEvent, NotifierBridge, RuleNotification};

use crate::eval::Evaluator;
use crate::schema::Rule;
use crate::state::{AlertInstance, InstanceStatus, StateTracker, Transition, TransitionKind};

/// Health of one rule task, shared with the manager for status display.
#[derive(Debug, Clone, Default)]
pub struct RuleHealth {
    pub last_eval: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub no_data: bool,
    /// Set when the task stopped itself (invalid query); the rule needs an
    /// edit before it can be scheduled again.
    pub halted: bool,
}

/// Manager-side handle to a live rule task.
pub struct TaskHandle {
    pub rule_id: String,
    pub tenant: String,
    pub version: u64,
    health: Arc<RwLock<RuleHealth>>,
    tracker: Arc<Mutex<StateTracker>>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn health(&self) -> RuleHealth {
        self.health.read().expect("health lock poisoned").clone()
    }

    pub fn instances(&self) -> Vec<InstanceStatus> {
        self.tracker
            .lock()
            .expect("tracker lock poisoned")
            .snapshot()
    }

    /// Ask the task to stop; it exits at its next suspension point.
    pub fn signal_stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for the task to finish, aborting it past `grace`.
    ///
    /// Returns `false` when the task had to be aborted.
    pub async fn join(mut self, grace: std::time::Duration) -> bool {
        match tokio::time::timeout(grace, &mut self.join).await {
            Ok(_) => true,
            Err(_) => {
                warn!(rule_id = %self.rule_id, "task exceeded grace period, aborting");
                self.join.abort();
                false
            }
        }
    }
}

/// Spawn the evaluation loop for one rule.
pub fn spawn(
    rule: Rule,
    evaluator: Arc<Evaluator>,
    bridge: NotifierBridge,
    config: &ManagerConfig,
) -> TaskHandle {
    let health = Arc::new(RwLock::new(RuleHealth::default()));
    let tracker = Arc::new(Mutex::new(StateTracker::new(
        rule.for_duration,
        config.retention_misses,
    )));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = TaskWorker {
        rule: rule.clone(),
        evaluator,
        bridge,
        health: Arc::clone(&health),
        tracker: Arc::clone(&tracker),
        failure_threshold: config.failure_threshold,
    };
    let join = tokio::spawn(worker.run(shutdown_rx));

    info!(rule_id = %rule.id, version = rule.version, interval = ?rule.interval, "rule task started");

    TaskHandle {
        rule_id: rule.id,
        tenant: rule.tenant,
        version: rule.version,
        health,
        tracker,
        shutdown: shutdown_tx,
        join,
    }
}

struct TaskWorker {
    rule: Rule,
    evaluator: Arc<Evaluator>,
    bridge: NotifierBridge,
    health: Arc<RwLock<RuleHealth>>,
    tracker: Arc<Mutex<StateTracker>>,
    failure_threshold: u32,
}

impl TaskWorker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.rule.interval);
        // A tick landing mid-evaluation is dropped, not queued.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let started = Instant::now();
            let keep_going = tokio::select! {
                // Dropping the cycle future cancels the in-flight backend
                // call; no state is mutated after the shutdown signal.
                result = self.run_cycle() => result,
                _ = shutdown.changed() => {
                    debug!(rule_id = %self.rule.id, "abandoning in-flight evaluation");
                    break;
                }
            };
            if !keep_going {
                break;
            }

            let elapsed = started.elapsed();
            if elapsed > self.rule.interval {
                warn!(
                    rule_id = %self.rule.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    interval_ms = self.rule.interval.as_millis() as u64,
                    "evaluation overran the interval, next tick was skipped"
                );
            }
        }

        debug!(rule_id = %self.rule.id, "rule task exiting");
    }

    /// One tick. Returns `false` when the task should stop permanently.
    async fn run_cycle(&self) -> bool {
        let now = Utc::now();

        match self.evaluator.evaluate(&self.rule, now).await {
            Ok(outcome) => {
                debug!(
                    rule_id = %self.rule.id,
                    series = outcome.series.len(),
                    breached = outcome.breached_count(),
                    cache_hit = outcome.cache_hit,
                    "evaluation complete"
                );
                let (transitions, still_firing) = {
                    let mut tracker = self.tracker.lock().expect("tracker lock poisoned");
                    let transitions = tracker.observe(now, &outcome.series);
                    let fired_now: Vec<_> = transitions
                        .iter()
                        .filter(|t| t.kind == TransitionKind::Fired)
                        .map(|t| t.fingerprint)
                        .collect();
                    let still: Vec<InstanceEvent> = tracker
                        .firing()
                        .into_iter()
                        .filter(|i| !fired_now.contains(&i.fingerprint))
                        .map(instance_event)
                        .collect();
                    (transitions, still)
                };

                {
                    let mut health = self.health.write().expect("health lock poisoned");
                    health.last_eval = Some(now);
                    health.last_error = None;
                    health.consecutive_failures = 0;
                    health.no_data = false;
                }

                self.bridge.enqueue(self.notification(now, &transitions, still_firing));
                true
            }
            Err(err) if err.is_transient() => {
                let failures = {
                    let mut health = self.health.write().expect("health lock poisoned");
                    health.consecutive_failures += 1;
                    health.last_error = Some(err.to_string());
                    health.consecutive_failures
                };
                warn!(
                    rule_id = %self.rule.id,
                    failures,
                    error = %err,
                    "query failed, retrying at next tick"
                );
                if failures >= self.failure_threshold {
                    // Visible but non-firing: instances keep their states
                    // and gain the NoData flag.
                    self.tracker
                        .lock()
                        .expect("tracker lock poisoned")
                        .mark_no_data();
                    self.health.write().expect("health lock poisoned").no_data = true;
                }
                true
            }
            Err(err) => {
                error!(
                    rule_id = %self.rule.id,
                    error = %err,
                    "query permanently invalid, stopping rule task"
                );
                let mut health = self.health.write().expect("health lock poisoned");
                health.last_error = Some(err.to_string());
                health.halted = true;
                false
            }
        }
    }

    fn notification(
        &self,
        now: DateTime<Utc>,
        transitions: &[Transition],
        still_firing: Vec<InstanceEvent>,
    ) -> RuleNotification {
        let pick = |kind: TransitionKind| {
            transitions
                .iter()
                .filter(|t| t.kind == kind)
                .map(|t| InstanceEvent {
                    fingerprint: t.fingerprint,
                    labels: t.labels.clone(),
                    value: t.value,
                    active_since: t.active_since,
                })
                .collect::<Vec<_>>()
        };

        RuleNotification {
            rule_id: self.rule.id.clone(),
            rule_name: self.rule.name.clone(),
            tenant: self.rule.tenant.clone(),
            target: self.rule.target.clone(),
            severity: self.rule.severity.as_str().to_string(),
            annotations: self.rule.annotations.clone(),
            fired: pick(TransitionKind::Fired),
            resolved: pick(TransitionKind::Resolved),
            still_firing,
            at: now,
        }
    }
}

fn instance_event(instance: &AlertInstance) -> InstanceEvent {
    InstanceEvent {
        fingerprint: instance.fingerprint,
        labels: instance.labels.clone(),
        value: instance.last_value,
        active_since: instance.active_since,
    }
}
