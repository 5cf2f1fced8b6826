//! One evaluation cycle: window math, cache consult, gated backend query,
//! threshold comparison.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use vigil_core::ManagerConfig;

use crate::cache::{CacheKey, ResultCache};
use crate::reader::{QueryError, TelemetryReader, TimeRange};
use crate::schema::Rule;
use crate::state::SeriesEval;

/// Gate waits longer than this get logged; the tick is delayed, never
/// skipped.
const GATE_DELAY_LOG_THRESHOLD: Duration = Duration::from_millis(100);

/// Result of one evaluation cycle, before it touches the state tracker.
#[derive(Debug)]
pub struct EvalOutcome {
    pub window: TimeRange,
    pub cache_hit: bool,
    pub series: Vec<SeriesEval>,
}

impl EvalOutcome {
    /// Count of series whose condition held.
    pub fn breached_count(&self) -> usize {
        self.series.iter().filter(|s| s.breached).count()
    }
}

/// Runs evaluation cycles for rules against the telemetry backend.
///
/// Shared by every rule task of one manager, so the admission gate it holds
/// bounds concurrent backend queries across all rules, independent of rule
/// count.
pub struct Evaluator {
    reader: Arc<dyn TelemetryReader>,
    cache: Arc<dyn ResultCache>,
    gate: Arc<Semaphore>,
    default_eval_delay: Duration,
    cache_ttl_margin: Duration,
}

impl Evaluator {
    pub fn new(
        reader: Arc<dyn TelemetryReader>,
        cache: Arc<dyn ResultCache>,
        gate: Arc<Semaphore>,
        config: &ManagerConfig,
    ) -> Self {
        Self {
            reader,
            cache,
            gate,
            default_eval_delay: config.eval_delay,
            cache_ttl_margin: config.cache_ttl_margin,
        }
    }

    /// The window a rule evaluates at instant `now`.
    ///
    /// The end is pulled back by the rule's ingestion-lag offset; without
    /// it, rules would evaluate partially-ingested data and flap.
    pub fn window_for(&self, rule: &Rule, now: DateTime<Utc>) -> TimeRange {
        let delay = to_chrono(rule.effective_eval_delay(self.default_eval_delay));
        let end = now - delay;
        let start = end - to_chrono(rule.window);
        TimeRange { start, end }
    }

    /// Run one evaluation cycle for `rule` at instant `now`.
    pub async fn evaluate(&self, rule: &Rule, now: DateTime<Utc>) -> Result<EvalOutcome, QueryError> {
        let window = self.window_for(rule, now);
        let key = CacheKey {
            tenant: rule.tenant.clone(),
            rule_id: rule.id.clone(),
            window_start: window.start,
            window_end: window.end,
        };

        let (raw, cache_hit) = match self.cache.get(&key) {
            Some(series) => (series, true),
            None => (self.query_gated(rule, window, key).await?, false),
        };

        let series = raw
            .into_iter()
            .map(|s| SeriesEval {
                breached: rule.compare.holds(s.value, rule.threshold),
                labels: s.labels,
                value: s.value,
            })
            .collect();

        Ok(EvalOutcome {
            window,
            cache_hit,
            series,
        })
    }

    /// Execute the backend query under the shared admission gate, with a
    /// deadline derived from the rule's interval so a slow query cannot
    /// occupy a gate slot indefinitely.
    async fn query_gated(
        &self,
        rule: &Rule,
        window: TimeRange,
        key: CacheKey,
    ) -> Result<Vec<crate::reader::LabeledSeries>, QueryError> {
        let waiting_since = Instant::now();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| QueryError::Transient("admission gate closed".to_string()))?;
        let waited = waiting_since.elapsed();
        if waited > GATE_DELAY_LOG_THRESHOLD {
            info!(
                rule_id = %rule.id,
                waited_ms = waited.as_millis() as u64,
                "evaluation delayed by admission gate"
            );
        }

        let deadline = rule.interval;
        let series = match tokio::time::timeout(
            deadline,
            self.reader.query(&rule.tenant, &rule.query, window),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(QueryError::Timeout(deadline)),
        };

        debug!(
            rule_id = %rule.id,
            series = series.len(),
            "backend query complete"
        );
        self.cache
            .put(key, series.clone(), rule.interval + self.cache_ttl_margin);
        Ok(series)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::{NoopCache, QueryResultCache};
    use crate::reader::LabeledSeries;
    use crate::schema::{CompareOp, QuerySpec};
    use vigil_core::Labels;

    struct FixedReader {
        value: f64,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TelemetryReader for FixedReader {
        async fn query(
            &self,
            _tenant: &str,
            _spec: &QuerySpec,
            _range: TimeRange,
        ) -> Result<Vec<LabeledSeries>, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![LabeledSeries {
                labels: Labels::from_pairs([("host", "web-1")]),
                value: self.value,
            }])
        }
    }

    struct SlowReader;

    #[async_trait::async_trait]
    impl TelemetryReader for SlowReader {
        async fn query(
            &self,
            _tenant: &str,
            _spec: &QuerySpec,
            _range: TimeRange,
        ) -> Result<Vec<LabeledSeries>, QueryError> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Ok(Vec::new())
        }
    }

    fn rule() -> Rule {
        Rule {
            id: "r1".to_string(),
            tenant: "acme".to_string(),
            name: "cpu".to_string(),
            query: QuerySpec::new("avg(cpu)"),
            compare: CompareOp::Above,
            threshold: 100.0,
            interval: Duration::from_secs(60),
            window: Duration::from_secs(300),
            for_duration: Duration::ZERO,
            enabled: true,
            target: String::new(),
            version: 1,
            eval_delay: None,
            severity: Default::default(),
            annotations: Default::default(),
        }
    }

    fn evaluator(reader: Arc<dyn TelemetryReader>, cache: Arc<dyn ResultCache>) -> Evaluator {
        let mut config = ManagerConfig::for_tests();
        config.eval_delay = Duration::from_secs(120);
        Evaluator::new(reader, cache, Arc::new(Semaphore::new(2)), &config)
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn window_is_offset_by_eval_delay() {
        let e = evaluator(
            Arc::new(FixedReader { value: 1.0, calls: AtomicUsize::new(0) }),
            Arc::new(NoopCache),
        );
        let w = e.window_for(&rule(), ts(10_000));
        assert_eq!(w.end, ts(10_000 - 120));
        assert_eq!(w.start, ts(10_000 - 120 - 300));
    }

    #[tokio::test]
    async fn per_rule_eval_delay_override() {
        let e = evaluator(
            Arc::new(FixedReader { value: 1.0, calls: AtomicUsize::new(0) }),
            Arc::new(NoopCache),
        );
        let mut r = rule();
        r.eval_delay = Some(Duration::from_secs(600));
        let w = e.window_for(&r, ts(10_000));
        assert_eq!(w.end, ts(10_000 - 600));
    }

    #[tokio::test]
    async fn applies_threshold_comparison() {
        let e = evaluator(
            Arc::new(FixedReader { value: 150.0, calls: AtomicUsize::new(0) }),
            Arc::new(NoopCache),
        );
        let outcome = e.evaluate(&rule(), ts(10_000)).await.unwrap();
        assert_eq!(outcome.series.len(), 1);
        assert!(outcome.series[0].breached);
        assert_eq!(outcome.breached_count(), 1);
        assert!(!outcome.cache_hit);
    }

    #[tokio::test]
    async fn same_window_hits_cache() {
        let reader = Arc::new(FixedReader { value: 150.0, calls: AtomicUsize::new(0) });
        let e = evaluator(reader.clone(), Arc::new(QueryResultCache::new(8)));

        let first = e.evaluate(&rule(), ts(10_000)).await.unwrap();
        let second = e.evaluate(&rule(), ts(10_000)).await.unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(reader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.series[0].value, 150.0);
    }

    #[tokio::test]
    async fn different_window_misses_cache() {
        let reader = Arc::new(FixedReader { value: 150.0, calls: AtomicUsize::new(0) });
        let e = evaluator(reader.clone(), Arc::new(QueryResultCache::new(8)));

        e.evaluate(&rule(), ts(10_000)).await.unwrap();
        e.evaluate(&rule(), ts(10_060)).await.unwrap();
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_query_times_out_at_interval() {
        let e = evaluator(Arc::new(SlowReader), Arc::new(NoopCache));
        let err = e.evaluate(&rule(), ts(10_000)).await.unwrap_err();
        assert!(err.is_transient());
        match err {
            QueryError::Timeout(d) => assert_eq!(d, Duration::from_secs(60)),
            other => panic!("expected timeout, got: {other:?}"),
        }
    }
}
