//! Per-rule alert instance state machine.
//!
//! One [`StateTracker`] lives inside each rule task and holds an
//! [`AlertInstance`] per label-set fingerprint observed in query results.
//! Transitions follow the debounce table:
//!
//! - Inactive + breached → Pending (`active_since` set); Firing in the same
//!   tick when the for-duration is already satisfied (for = 0).
//! - Pending + breached long enough → Firing (emits a Fired transition).
//! - Pending/Firing + not breached → Inactive; a Firing instance emits a
//!   Resolved transition. Any false evaluation resets `active_since`
//!   entirely.
//!
//! The tracker is purely synchronous and single-owner; the task applies
//! evaluations strictly in order, so transitions are never applied
//! out of order.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use vigil_core::{Fingerprint, Labels};

/// Alert lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Inactive,
    Pending,
    Firing,
}

/// One evaluated series: the observed value and whether the rule condition
/// held for it.
#[derive(Debug, Clone)]
pub struct SeriesEval {
    pub labels: Labels,
    pub value: f64,
    pub breached: bool,
}

/// The tracked state of one rule × one label set.
#[derive(Debug, Clone)]
pub struct AlertInstance {
    pub labels: Labels,
    pub fingerprint: Fingerprint,
    pub state: AlertState,
    /// When the condition first became true for the current streak.
    pub active_since: Option<DateTime<Utc>>,
    pub last_eval: DateTime<Utc>,
    pub last_value: f64,
    /// Consecutive evaluations this label set was absent from results.
    pub missed_evals: u32,
    /// Set when repeated query failures make the instance unobservable.
    pub no_data: bool,
}

/// Edge emitted by [`StateTracker::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Fired,
    Resolved,
}

/// One state-machine edge, carrying enough context to notify on.
#[derive(Debug, Clone)]
pub struct Transition {
    pub kind: TransitionKind,
    pub fingerprint: Fingerprint,
    pub labels: Labels,
    pub value: f64,
    pub active_since: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of an instance for status display.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InstanceStatus {
    pub labels: Labels,
    pub state: AlertState,
    pub no_data: bool,
    pub active_since: Option<DateTime<Utc>>,
    pub last_eval: DateTime<Utc>,
    pub last_value: f64,
}

/// Per-rule alert state machine over all observed label sets.
#[derive(Debug)]
pub struct StateTracker {
    for_duration: Duration,
    retention_misses: u32,
    instances: HashMap<Fingerprint, AlertInstance>,
}

impl StateTracker {
    pub fn new(for_duration: Duration, retention_misses: u32) -> Self {
        Self {
            for_duration,
            retention_misses,
            instances: HashMap::new(),
        }
    }

    /// Apply one evaluation's results, returning the transitions it caused.
    ///
    /// Label sets absent from `evals` accrue a miss; after
    /// `retention_misses` consecutive misses the instance is pruned.
    /// A successful observation also clears the NoData flag.
    pub fn observe(&mut self, now: DateTime<Utc>, evals: &[SeriesEval]) -> Vec<Transition> {
        let mut transitions = Vec::new();
        let mut seen: Vec<Fingerprint> = Vec::with_capacity(evals.len());

        for eval in evals {
            let fingerprint = eval.labels.fingerprint();
            seen.push(fingerprint);

            let instance = match self.instances.entry(fingerprint) {
                std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::hash_map::Entry::Vacant(v) => {
                    // Instances are created on the first breached
                    // evaluation of an unseen label set; healthy series
                    // are not tracked.
                    if !eval.breached {
                        continue;
                    }
                    v.insert(AlertInstance {
                        labels: eval.labels.clone(),
                        fingerprint,
                        state: AlertState::Inactive,
                        active_since: None,
                        last_eval: now,
                        last_value: eval.value,
                        missed_evals: 0,
                        no_data: false,
                    })
                }
            };

            instance.last_eval = now;
            instance.last_value = eval.value;
            instance.missed_evals = 0;
            instance.no_data = false;

            if eval.breached {
                if instance.state == AlertState::Inactive {
                    instance.state = AlertState::Pending;
                    instance.active_since = Some(now);
                }
                if instance.state == AlertState::Pending {
                    if let Some(since) = instance.active_since {
                        let held = (now - since).to_std().unwrap_or(Duration::ZERO);
                        if held >= self.for_duration {
                            instance.state = AlertState::Firing;
                            transitions.push(Transition {
                                kind: TransitionKind::Fired,
                                fingerprint,
                                labels: instance.labels.clone(),
                                value: eval.value,
                                active_since: instance.active_since,
                                at: now,
                            });
                        }
                    }
                }
            } else {
                // Full reset: no partial credit across gaps.
                if instance.state == AlertState::Firing {
                    transitions.push(Transition {
                        kind: TransitionKind::Resolved,
                        fingerprint,
                        labels: instance.labels.clone(),
                        value: eval.value,
                        active_since: instance.active_since,
                        at: now,
                    });
                }
                instance.state = AlertState::Inactive;
                instance.active_since = None;
            }
        }

        self.age_unseen(&seen);
        transitions
    }

    /// Bump miss counts for instances absent from this evaluation and
    /// prune the stale ones.
    fn age_unseen(&mut self, seen: &[Fingerprint]) {
        let retention = self.retention_misses;
        self.instances.retain(|fingerprint, instance| {
            if seen.contains(fingerprint) {
                return true;
            }
            instance.missed_evals += 1;
            if instance.missed_evals >= retention {
                debug!(%fingerprint, labels = %instance.labels, "pruning stale alert instance");
                false
            } else {
                true
            }
        });
    }

    /// Flag every live instance as NoData (observability lost); states are
    /// left untouched.
    pub fn mark_no_data(&mut self) {
        for instance in self.instances.values_mut() {
            instance.no_data = true;
        }
    }

    /// Currently Firing instances (repeat-notification candidates).
    pub fn firing(&self) -> Vec<&AlertInstance> {
        self.instances
            .values()
            .filter(|i| i.state == AlertState::Firing)
            .collect()
    }

    /// Status view of every live instance, ordered by label set.
    pub fn snapshot(&self) -> Vec<InstanceStatus> {
        let mut statuses: Vec<InstanceStatus> = self
            .instances
            .values()
            .map(|i| InstanceStatus {
                labels: i.labels.clone(),
                state: i.state,
                no_data: i.no_data,
                active_since: i.active_since,
                last_eval: i.last_eval,
                last_value: i.last_value,
            })
            .collect();
        statuses.sort_by(|a, b| a.labels.to_string().cmp(&b.labels.to_string()));
        statuses
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(host: &str, value: f64, breached: bool) -> SeriesEval {
        SeriesEval {
            labels: Labels::from_pairs([("host", host)]),
            value,
            breached,
        }
    }

    fn ts(minute: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(minute * 60, 0).unwrap()
    }

    fn state_of(tracker: &StateTracker, host: &str) -> Option<AlertState> {
        let fp = Labels::from_pairs([("host", host)]).fingerprint();
        tracker.instances.get(&fp).map(|i| i.state)
    }

    #[test]
    fn first_breach_goes_pending_not_firing() {
        let mut t = StateTracker::new(Duration::from_secs(120), 5);
        let transitions = t.observe(ts(0), &[eval("a", 150.0, true)]);
        assert!(transitions.is_empty());
        assert_eq!(state_of(&t, "a"), Some(AlertState::Pending));
    }

    #[test]
    fn zero_for_duration_fires_on_first_tick() {
        let mut t = StateTracker::new(Duration::ZERO, 5);
        let transitions = t.observe(ts(0), &[eval("a", 150.0, true)]);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].kind, TransitionKind::Fired);
        // No intermediate Pending tick observable.
        assert_eq!(state_of(&t, "a"), Some(AlertState::Firing));
    }

    #[test]
    fn fires_once_for_duration_satisfied() {
        let mut t = StateTracker::new(Duration::from_secs(120), 5);
        assert!(t.observe(ts(0), &[eval("a", 150.0, true)]).is_empty());
        assert!(t.observe(ts(1), &[eval("a", 150.0, true)]).is_empty());
        assert_eq!(state_of(&t, "a"), Some(AlertState::Pending));

        let transitions = t.observe(ts(2), &[eval("a", 150.0, true)]);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].kind, TransitionKind::Fired);
        assert_eq!(transitions[0].active_since, Some(ts(0)));
        assert_eq!(state_of(&t, "a"), Some(AlertState::Firing));

        // Steady state: no further edges.
        assert!(t.observe(ts(3), &[eval("a", 160.0, true)]).is_empty());
        assert_eq!(state_of(&t, "a"), Some(AlertState::Firing));
    }

    #[test]
    fn false_tick_resets_active_since() {
        let mut t = StateTracker::new(Duration::from_secs(120), 5);
        t.observe(ts(0), &[eval("a", 150.0, true)]);
        t.observe(ts(1), &[eval("a", 50.0, false)]);
        assert_eq!(state_of(&t, "a"), Some(AlertState::Inactive));

        // The streak starts over: two more true ticks are still Pending.
        t.observe(ts(2), &[eval("a", 150.0, true)]);
        let transitions = t.observe(ts(3), &[eval("a", 150.0, true)]);
        assert!(transitions.is_empty());
        assert_eq!(state_of(&t, "a"), Some(AlertState::Pending));

        // And the fire happens only once the new streak spans the window.
        let transitions = t.observe(ts(4), &[eval("a", 150.0, true)]);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].active_since, Some(ts(2)));
    }

    #[test]
    fn firing_to_inactive_emits_resolved() {
        let mut t = StateTracker::new(Duration::ZERO, 5);
        t.observe(ts(0), &[eval("a", 150.0, true)]);
        let transitions = t.observe(ts(1), &[eval("a", 50.0, false)]);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].kind, TransitionKind::Resolved);
        assert_eq!(state_of(&t, "a"), Some(AlertState::Inactive));
    }

    #[test]
    fn pending_to_inactive_is_silent() {
        let mut t = StateTracker::new(Duration::from_secs(120), 5);
        t.observe(ts(0), &[eval("a", 150.0, true)]);
        let transitions = t.observe(ts(1), &[eval("a", 50.0, false)]);
        assert!(transitions.is_empty());
    }

    #[test]
    fn never_fires_from_inactive_on_false() {
        let mut t = StateTracker::new(Duration::ZERO, 5);
        let transitions = t.observe(ts(0), &[eval("a", 50.0, false)]);
        assert!(transitions.is_empty());
        // Healthy unseen series are not even tracked.
        assert!(t.is_empty());
    }

    #[test]
    fn instances_tracked_per_label_set() {
        let mut t = StateTracker::new(Duration::ZERO, 5);
        let transitions = t.observe(
            ts(0),
            &[eval("a", 150.0, true), eval("b", 150.0, true), eval("c", 10.0, false)],
        );
        assert_eq!(transitions.len(), 2);
        assert_eq!(t.len(), 2);
        assert_eq!(t.firing().len(), 2);
    }

    #[test]
    fn stale_instances_pruned_after_misses() {
        let mut t = StateTracker::new(Duration::ZERO, 3);
        t.observe(ts(0), &[eval("a", 150.0, true)]);

        // Series vanishes from results.
        t.observe(ts(1), &[]);
        t.observe(ts(2), &[]);
        assert_eq!(t.len(), 1);
        t.observe(ts(3), &[]);
        assert!(t.is_empty());
    }

    #[test]
    fn reappearing_series_resets_miss_count() {
        let mut t = StateTracker::new(Duration::ZERO, 3);
        t.observe(ts(0), &[eval("a", 150.0, true)]);
        t.observe(ts(1), &[]);
        t.observe(ts(2), &[eval("a", 150.0, true)]);
        t.observe(ts(3), &[]);
        t.observe(ts(4), &[]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn no_data_flag_is_orthogonal() {
        let mut t = StateTracker::new(Duration::ZERO, 5);
        t.observe(ts(0), &[eval("a", 150.0, true)]);
        t.mark_no_data();

        let snap = t.snapshot();
        assert!(snap[0].no_data);
        assert_eq!(snap[0].state, AlertState::Firing);

        // Next successful observation clears the flag.
        t.observe(ts(1), &[eval("a", 150.0, true)]);
        assert!(!t.snapshot()[0].no_data);
    }

    #[test]
    fn snapshot_reports_values() {
        let mut t = StateTracker::new(Duration::from_secs(120), 5);
        t.observe(ts(0), &[eval("a", 150.0, true)]);
        let snap = t.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].last_value, 150.0);
        assert_eq!(snap[0].state, AlertState::Pending);
        assert_eq!(snap[0].active_since, Some(ts(0)));
    }
}
