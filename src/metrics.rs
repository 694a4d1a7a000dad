//! Prometheus metrics for the editorial engines.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_agent_call`, `record_provider_latency`, …) are no-ops if
//! `init_metrics` was never called, so the engines are always safe to run;
//! observability simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `editorial_agent_calls_total` | Counter | `role`, `outcome` |
//! | `editorial_provider_retries_total` | Counter | `provider` |
//! | `editorial_provider_latency_seconds` | Histogram | `provider` |
//! | `editorial_stage_duration_seconds` | Histogram | `stage` |
//! | `editorial_audits_total` | Counter | `mode`, `outcome` |
//! | `editorial_pipeline_runs_total` | Counter | `status` |
//! | `editorial_notifications_shed_total` | Counter | - |

use crate::OrchestratorError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics, bundled so they can live in one [`OnceLock`].
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Agent invocations by role and outcome.
    pub agent_calls: CounterVec,
    /// Provider retries by provider id.
    pub provider_retries: CounterVec,
    /// Provider call latency (all attempts) by provider id.
    pub provider_latency: HistogramVec,
    /// Pipeline stage latency.
    pub stage_duration: HistogramVec,
    /// Audits by mode and outcome.
    pub audits: CounterVec,
    /// Generation runs by terminal status.
    pub pipeline_runs: CounterVec,
    /// Terminal notifications dropped because the channel was full.
    pub notifications_shed: IntCounter,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn register<C: Collector + Clone + 'static>(
    registry: &Registry,
    collector: Result<C, prometheus::Error>,
) -> Result<C, OrchestratorError> {
    let collector =
        collector.map_err(|e| OrchestratorError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| OrchestratorError::Other(format!("metrics registration failed: {e}")))?;
    Ok(collector)
}

fn build(prefix: &str) -> Result<Metrics, OrchestratorError> {
    let registry = Registry::new();
    let name = |n: &str| format!("{prefix}_{n}");

    let agent_calls = register(
        &registry,
        CounterVec::new(
            Opts::new(name("agent_calls_total"), "Agent invocations by role and outcome"),
            &["role", "outcome"],
        ),
    )?;
    let provider_retries = register(
        &registry,
        CounterVec::new(
            Opts::new(name("provider_retries_total"), "Provider call retries"),
            &["provider"],
        ),
    )?;
    let provider_latency = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(name("provider_latency_seconds"), "Provider call latency")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["provider"],
        ),
    )?;
    let stage_duration = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(name("stage_duration_seconds"), "Pipeline stage duration"),
            &["stage"],
        ),
    )?;
    let audits = register(
        &registry,
        CounterVec::new(
            Opts::new(name("audits_total"), "Audits by mode and outcome"),
            &["mode", "outcome"],
        ),
    )?;
    let pipeline_runs = register(
        &registry,
        CounterVec::new(
            Opts::new(name("pipeline_runs_total"), "Generation runs by terminal status"),
            &["status"],
        ),
    )?;
    let notifications_shed = register(
        &registry,
        IntCounter::new(
            name("notifications_shed_total"),
            "Terminal notifications dropped because the channel was full",
        ),
    )?;

    Ok(Metrics {
        registry,
        agent_calls,
        provider_retries,
        provider_latency,
        stage_duration,
        audits,
        pipeline_runs,
        notifications_shed,
    })
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    // A racing initialiser builds identical descriptors; the first one wins.
    let _ = METRICS.set(build("editorial")?);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one agent invocation. `outcome` is `ok` or an error-kind label.
pub fn inc_agent_call(role: &str, outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.agent_calls.get_metric_with_label_values(&[role, outcome]) {
            c.inc();
        }
    }
}

/// Count one provider retry.
pub fn inc_provider_retry(provider: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.provider_retries.get_metric_with_label_values(&[provider]) {
            c.inc();
        }
    }
}

/// Record the latency of a provider call across all its attempts.
pub fn record_provider_latency(provider: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.provider_latency.get_metric_with_label_values(&[provider]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Record how long a pipeline stage took.
///
/// # Panics
///
/// This function never panics.
pub fn record_stage_latency(stage: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.stage_duration.get_metric_with_label_values(&[stage]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count one audit. `outcome` is `recorded`, `aborted`, or `failed`.
pub fn inc_audit(mode: &str, outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.audits.get_metric_with_label_values(&[mode, outcome]) {
            c.inc();
        }
    }
}

/// Count one finished generation run.
pub fn inc_pipeline_run(status: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.pipeline_runs.get_metric_with_label_values(&[status]) {
            c.inc();
        }
    }
}

/// Count one shed notification.
pub fn inc_notification_shed() {
    if let Some(m) = metrics() {
        m.notifications_shed.inc();
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let families = m.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Counter values printed at the end of a CLI run.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Agent calls keyed by `"role:outcome"`.
    pub agent_calls: HashMap<String, u64>,
    /// Retries keyed by provider id.
    pub provider_retries: HashMap<String, u64>,
}

fn label<'a>(metric: &'a prometheus::proto::Metric, name: &str) -> &'a str {
    metric
        .get_label()
        .iter()
        .find(|l| l.get_name() == name)
        .map_or("unknown", |l| l.get_value())
}

/// Structured summary of current counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been initialised.
pub fn get_metrics_summary() -> MetricsSummary {
    let Some(m) = metrics() else {
        return MetricsSummary::default();
    };
    let mut summary = MetricsSummary::default();

    for family in m.agent_calls.collect() {
        for metric in family.get_metric() {
            let key = format!("{}:{}", label(metric, "role"), label(metric, "outcome"));
            summary
                .agent_calls
                .insert(key, metric.get_counter().get_value() as u64);
        }
    }
    for family in m.provider_retries.collect() {
        for metric in family.get_metric() {
            summary.provider_retries.insert(
                label(metric, "provider").to_string(),
                metric.get_counter().get_value() as u64,
            );
        }
    }
    summary
}
