//! vigil-worker — standalone rule manager process.
//!
//! Loads rule YAML files from a directory, schedules them against a
//! telemetry reader, and delivers alert notifications over a webhook (or
//! just logs them when no webhook is configured). The rules directory is
//! watched; edits reconcile without a restart.
//!
//! The built-in reader is synthetic (a deterministic waveform per host),
//! which makes this binary a self-contained way to exercise rules and
//! notification wiring before pointing it at a real backend.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use vigil_core::{load_dotenv, Labels, ManagerConfig};
use vigil_notify::{AlertTransport, LogTransport, WebhookTransport};
use vigil_rules::reader::{LabeledSeries, QueryError, TelemetryReader, TimeRange};
use vigil_rules::schema::QuerySpec;
use vigil_rules::{FileRuleStore, Manager, ManagerOptions, QueryResultCache};

// ── CLI ─────────────────────────────────────────────────────────────

/// Vigil rule manager worker.
#[derive(Parser, Debug)]
#[command(name = "vigil-worker", version, about)]
struct Cli {
    /// Directory of rule YAML files to schedule and watch.
    #[arg(long, env = "VIGIL_RULES_DIR", default_value = "data/rules")]
    rules_dir: String,

    /// Webhook URL for alert delivery; logs alerts when unset.
    #[arg(long, env = "VIGIL_WEBHOOK_URL")]
    webhook_url: Option<String>,
}

// ── Synthetic reader ────────────────────────────────────────────────

/// Deterministic stand-in for a telemetry backend: each host reports a
/// slow sine wave, offset per host, scaled to 0..200.
struct SyntheticReader {
    hosts: Vec<String>,
}

#[async_trait::async_trait]
impl TelemetryReader for SyntheticReader {
    async fn query(
        &self,
        _tenant: &str,
        _spec: &QuerySpec,
        range: TimeRange,
    ) -> Result<Vec<LabeledSeries>, QueryError> {
        let t = range.end.timestamp() as f64;
        Ok(self
            .hosts
            .iter()
            .enumerate()
            .map(|(i, host)| {
                let phase = i as f64 * 1.3;
                let value = 100.0 + 100.0 * (t / 300.0 + phase).sin();
                LabeledSeries {
                    labels: Labels::from_pairs([("host", host.as_str())]),
                    value,
                }
            })
            .collect())
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = ManagerConfig::from_env();

    std::fs::create_dir_all(&cli.rules_dir)?;
    let store = Arc::new(FileRuleStore::new(&cli.rules_dir));

    let transport: Arc<dyn AlertTransport> = match &cli.webhook_url {
        Some(url) => {
            info!(%url, "delivering alerts over webhook");
            Arc::new(WebhookTransport::new(url.clone(), Default::default())?)
        }
        None => {
            warn!("no webhook configured, alerts will only be logged");
            Arc::new(LogTransport)
        }
    };

    let reader = Arc::new(SyntheticReader {
        hosts: vec!["web-1".to_string(), "web-2".to_string(), "db-1".to_string()],
    });
    let cache = Arc::new(QueryResultCache::new(config.cache_capacity));

    let manager = Manager::new(ManagerOptions {
        store: store.clone(),
        reader,
        cache,
        transport,
        config,
    });

    // Keep the watcher alive for the life of the process.
    let _watcher = {
        let manager = Arc::clone(&manager);
        store.watch(move || manager.notify_rule_change())?
    };

    manager.start().await;
    info!(rules_dir = %cli.rules_dir, "vigil-worker running, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    manager.stop().await;
    info!("vigil-worker exited cleanly");
    Ok(())
}
