//! The rule manager: owns the set of live rule tasks and keeps it
//! converged with the store.
//!
//! The manager periodically reconciles against the [`RuleStore`]; edits
//! can also nudge it immediately via [`Manager::notify_rule_change`].
//! Rule ids are only unique within a tenant, so everything here keys by
//! `(tenant, id)` and diffs on version: an unknown key starts a task, a
//! missing key stops one, and a version bump stops the old task and
//! waits for it before starting the replacement, so at most one task per
//! `(tenant, id)` is ever live.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{watch, Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vigil_core::ManagerConfig;
use vigil_notify::{AlertTransport, BridgeOptions, NotifierBridge};

use crate::cache::{NoopCache, ResultCache};
use crate::error::RuleError;
use crate::eval::{EvalOutcome, Evaluator};
use crate::reader::TelemetryReader;
use crate::schema::Rule;
use crate::state::InstanceStatus;
use crate::store::RuleStore;
use crate::task::{self, RuleHealth, TaskHandle};
use crate::validation::validate;

/// Everything a manager needs to run.
pub struct ManagerOptions {
    pub store: Arc<dyn RuleStore>,
    pub reader: Arc<dyn TelemetryReader>,
    pub cache: Arc<dyn ResultCache>,
    pub transport: Arc<dyn AlertTransport>,
    pub config: ManagerConfig,
}

/// Point-in-time status of one scheduled rule.
#[derive(Debug, Clone)]
pub struct RuleStatus {
    pub rule_id: String,
    pub tenant: String,
    pub version: u64,
    pub health: RuleHealth,
    pub instances: Vec<InstanceStatus>,
    pub last_delivery_error: Option<String>,
}

/// `(tenant, rule id)`, the unit of scheduling.
type RuleKey = (String, String);

/// A rule the last reconcile refused to schedule.
#[derive(Debug, Clone)]
struct SkippedRule {
    version: u64,
    error: String,
}

/// Owns active rules, their evaluation tasks, and the notifier bridge.
pub struct Manager {
    config: ManagerConfig,
    store: Arc<dyn RuleStore>,
    reader: Arc<dyn TelemetryReader>,
    gate: Arc<Semaphore>,
    evaluator: Arc<Evaluator>,
    bridge: NotifierBridge,
    bridge_worker: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<HashMap<RuleKey, TaskHandle>>,
    /// Rules present in the store but failing validation, kept so the
    /// status surface can report why they are not running.
    skipped: Mutex<HashMap<RuleKey, SkippedRule>>,
    /// Serializes reconciliation passes; the `tasks` lock alone is released
    /// while old tasks drain.
    reconcile_lock: Mutex<()>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    poll_worker: Mutex<Option<JoinHandle<()>>>,
}

impl Manager {
    pub fn new(options: ManagerOptions) -> Arc<Self> {
        let ManagerOptions {
            store,
            reader,
            cache,
            transport,
            config,
        } = options;

        let gate = Arc::new(Semaphore::new(config.gate_size));
        let evaluator = Arc::new(Evaluator::new(
            Arc::clone(&reader),
            cache,
            Arc::clone(&gate),
            &config,
        ));
        let bridge_options = BridgeOptions {
            repeat_interval: config.repeat_interval,
            attempts: config.delivery_attempts,
            backoff: config.delivery_backoff,
            ..BridgeOptions::default()
        };
        let (bridge, bridge_worker) = NotifierBridge::spawn(transport, bridge_options);
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            config,
            store,
            reader,
            gate,
            evaluator,
            bridge,
            bridge_worker: Mutex::new(Some(bridge_worker)),
            tasks: Mutex::new(HashMap::new()),
            skipped: Mutex::new(HashMap::new()),
            reconcile_lock: Mutex::new(()),
            wake: Notify::new(),
            shutdown,
            poll_worker: Mutex::new(None),
        })
    }

    /// Start the reconciliation loop. The first pass runs immediately, so
    /// rules already in the store are scheduled before this returns control
    /// to the caller's runtime.
    pub async fn start(self: &Arc<Self>) {
        self.config.log_summary();
        self.reconcile().await;

        let manager = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(manager.config.poll_interval) => {}
                    _ = manager.wake.notified() => {
                        debug!("rule change signalled, reconciling early");
                    }
                    _ = shutdown.changed() => break,
                }
                manager.reconcile().await;
            }
        });
        *self.poll_worker.lock().await = Some(handle);
        info!("rule manager started");
    }

    /// Nudge the manager to reconcile now instead of at the next poll.
    pub fn notify_rule_change(&self) {
        self.wake.notify_one();
    }

    /// Converge live tasks with the store.
    ///
    /// Store errors never tear down healthy tasks: a failed tenant listing
    /// leaves that tenant's tasks exactly as they were.
    pub async fn reconcile(&self) {
        let _guard = self.reconcile_lock.lock().await;
        if *self.shutdown.borrow() {
            return;
        }

        let tenants = match self.store.tenants().await {
            Ok(tenants) => tenants,
            Err(err) => {
                warn!(error = %err, "rule store unavailable, keeping current schedule");
                return;
            }
        };

        let mut desired: HashMap<RuleKey, Rule> = HashMap::new();
        let mut skipped_now: HashMap<RuleKey, SkippedRule> = HashMap::new();
        let mut failed_tenants: HashSet<String> = HashSet::new();
        for tenant in tenants {
            match self.store.list(&tenant).await {
                Ok(rules) => {
                    for rule in rules {
                        if !rule.enabled {
                            continue;
                        }
                        let key = (tenant.clone(), rule.id.clone());
                        if let Err(err) = validate(&rule, &self.config) {
                            warn!(rule_id = %rule.id, %tenant, error = %err, "invalid rule skipped");
                            skipped_now.insert(
                                key,
                                SkippedRule {
                                    version: rule.version,
                                    error: err.to_string(),
                                },
                            );
                            continue;
                        }
                        desired.insert(key, rule);
                    }
                }
                Err(err) => {
                    warn!(%tenant, error = %err, "tenant listing failed, keeping its tasks");
                    failed_tenants.insert(tenant);
                }
            }
        }

        {
            // Rebuild the skip roster from this pass, carrying over only
            // entries for tenants we could not list.
            let mut skipped = self.skipped.lock().await;
            skipped.retain(|(tenant, _), _| failed_tenants.contains(tenant));
            skipped.extend(skipped_now);
        }

        let mut to_stop = Vec::new();
        {
            let mut tasks = self.tasks.lock().await;
            let stale: Vec<RuleKey> = tasks
                .iter()
                .filter(|(key, handle)| {
                    if failed_tenants.contains(&handle.tenant) {
                        return false;
                    }
                    match desired.get(*key) {
                        None => true,
                        Some(rule) => rule.version != handle.version,
                    }
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                if let Some(handle) = tasks.remove(&key) {
                    to_stop.push(handle);
                }
            }
        }

        // Drain removed/superseded tasks before their replacements start,
        // outside the tasks lock so status queries stay responsive.
        for handle in &to_stop {
            handle.signal_stop();
        }
        let mut stopped = 0usize;
        for handle in to_stop {
            let tenant = handle.tenant.clone();
            let rule_id = handle.rule_id.clone();
            handle.join(self.config.grace_period).await;
            self.bridge.forget_rule(&tenant, &rule_id);
            stopped += 1;
        }

        let mut started = 0usize;
        {
            let mut tasks = self.tasks.lock().await;
            for (key, rule) in desired {
                if tasks.contains_key(&key) {
                    continue;
                }
                let handle = task::spawn(
                    rule,
                    Arc::clone(&self.evaluator),
                    self.bridge.clone(),
                    &self.config,
                );
                tasks.insert(key, handle);
                started += 1;
            }
        }

        if started > 0 || stopped > 0 {
            info!(started, stopped, "reconciliation applied");
        }
    }

    /// Validate a candidate rule and run one evaluation cycle against live
    /// data, without scheduling it or touching the result cache.
    pub async fn test_rule(&self, rule: &Rule) -> Result<EvalOutcome, RuleError> {
        validate(rule, &self.config)?;
        let evaluator = Evaluator::new(
            Arc::clone(&self.reader),
            Arc::new(NoopCache),
            Arc::clone(&self.gate),
            &self.config,
        );
        Ok(evaluator.evaluate(rule, Utc::now()).await?)
    }

    /// Status of one rule. A scheduled rule reports its live task; a rule
    /// skipped at reconcile for failing validation reports the validation
    /// error in `health.last_error`. `None` means the manager knows
    /// nothing about this `(tenant, id)`.
    pub async fn rule_status(&self, tenant: &str, rule_id: &str) -> Option<RuleStatus> {
        let key = (tenant.to_string(), rule_id.to_string());
        if let Some(handle) = self.tasks.lock().await.get(&key) {
            return Some(self.running_status(handle));
        }
        self.skipped
            .lock()
            .await
            .get(&key)
            .map(|skip| Self::skipped_status(tenant, rule_id, skip))
    }

    /// Status of every known rule, scheduled or skipped, ordered by
    /// `(tenant, rule id)`.
    pub async fn statuses(&self) -> Vec<RuleStatus> {
        let mut statuses: Vec<RuleStatus> = {
            let tasks = self.tasks.lock().await;
            tasks.values().map(|h| self.running_status(h)).collect()
        };
        {
            let skipped = self.skipped.lock().await;
            for ((tenant, rule_id), skip) in skipped.iter() {
                statuses.push(Self::skipped_status(tenant, rule_id, skip));
            }
        }
        statuses.sort_by(|a, b| (&a.tenant, &a.rule_id).cmp(&(&b.tenant, &b.rule_id)));
        statuses
    }

    fn running_status(&self, handle: &TaskHandle) -> RuleStatus {
        RuleStatus {
            rule_id: handle.rule_id.clone(),
            tenant: handle.tenant.clone(),
            version: handle.version,
            health: handle.health(),
            instances: handle.instances(),
            last_delivery_error: self
                .bridge
                .last_delivery_error(&handle.tenant, &handle.rule_id),
        }
    }

    fn skipped_status(tenant: &str, rule_id: &str, skip: &SkippedRule) -> RuleStatus {
        RuleStatus {
            rule_id: rule_id.to_string(),
            tenant: tenant.to_string(),
            version: skip.version,
            health: RuleHealth {
                last_error: Some(skip.error.clone()),
                ..RuleHealth::default()
            },
            instances: Vec::new(),
            last_delivery_error: None,
        }
    }

    /// Number of live rule tasks.
    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Graceful shutdown: stop reconciling, signal every task, wait up to
    /// the grace period for them to finish, abort stragglers, then drain
    /// the notifier bridge. Idempotent.
    pub async fn stop(&self) {
        info!("rule manager stopping");
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.poll_worker.lock().await.take() {
            if let Err(err) = handle.await {
                error!(error = %err, "reconcile loop panicked");
            }
        }

        let handles: Vec<TaskHandle> = {
            // Serialize with any in-flight reconcile so nothing respawns
            // after the drain.
            let _guard = self.reconcile_lock.lock().await;
            let mut tasks = self.tasks.lock().await;
            tasks.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.signal_stop();
        }
        // One shared deadline for all tasks, not one grace period each.
        let deadline = Instant::now() + self.config.grace_period;
        let mut aborted = 0usize;
        let total = handles.len();
        for handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !handle.join(remaining).await {
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!(aborted, total, "tasks aborted at shutdown");
        }

        self.bridge.shutdown().await;
        if let Some(handle) = self.bridge_worker.lock().await.take() {
            if let Err(err) = handle.await {
                error!(error = %err, "delivery worker panicked");
            }
        }
        info!(tasks = total, "rule manager stopped");
    }
}
