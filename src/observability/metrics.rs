//! Prometheus metrics for the expired change remover.
//!
//! Provides metrics for:
//! - Documents removed from change collections
//! - Remover passes and their duration
//! - Per-tenant removal failures

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Histogram buckets for pass duration, in seconds.
#[cfg(feature = "prometheus")]
const PASS_DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0];

/// Initialize the metrics system and start the scrape endpoint.
///
/// Must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            PASS_DURATION_BUCKETS,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(listen = %config.listen, "Prometheus metrics endpoint started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record expired documents deleted from one tenant's change collection.
pub fn record_remover_deletion(count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("change_collection_expired_documents_removed_total").increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = count;
    }
}

/// Record a tenant whose expired changes could not be removed this pass.
pub fn record_remover_tenant_failure() {
    #[cfg(feature = "prometheus")]
    {
        counter!("change_collection_remover_tenant_failures_total").increment(1);
    }
}

/// Record a completed remover pass.
///
/// # Arguments
/// * `duration_secs` - Wall time the pass took
/// * `interrupted` - Whether shutdown cut the pass short
pub fn record_remover_pass(duration_secs: f64, interrupted: bool) {
    #[cfg(feature = "prometheus")]
    {
        let outcome = if interrupted { "interrupted" } else { "completed" };
        counter!("change_collection_remover_passes_total", "outcome" => outcome).increment(1);
        histogram!("change_collection_remover_pass_duration_seconds").record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (duration_secs, interrupted);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
