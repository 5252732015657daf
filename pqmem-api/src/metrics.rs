//! Prometheus Metrics Definitions
//!
//! Counters for authentication, API key cache and rate-limit behaviour,
//! exposed at `/metrics` for scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};

use crate::error::{ApiError, ApiResult};

/// Global metrics instance - initialized on first use
pub static METRICS: Lazy<ApiResult<PqMetrics>> = Lazy::new(PqMetrics::new);

#[derive(Clone)]
pub struct PqMetrics {
    /// Authentication attempts - labels: method, outcome
    pub auth_attempts_total: CounterVec,

    /// API key cache lookups - labels: result (hit/miss/stale)
    pub api_key_cache_lookups_total: CounterVec,

    /// Rate-limit decisions - labels: backend, outcome
    pub rate_limit_decisions_total: CounterVec,

    /// Distributed rate-limit failures answered locally - labels: backend
    pub rate_limit_failovers_total: CounterVec,

    /// API key rotations - labels: status
    pub api_key_rotations_total: CounterVec,
}

impl PqMetrics {
    /// Create and register all metrics with the default registry.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            auth_attempts_total: register_counter_vec!(
                "pqmem_auth_attempts_total",
                "Authentication attempts by method and outcome",
                &["method", "outcome"]
            )
            .map_err(|e| registration_error("auth_attempts_total", e))?,

            api_key_cache_lookups_total: register_counter_vec!(
                "pqmem_api_key_cache_lookups_total",
                "API key cache lookups by result",
                &["result"]
            )
            .map_err(|e| registration_error("api_key_cache_lookups_total", e))?,

            rate_limit_decisions_total: register_counter_vec!(
                "pqmem_rate_limit_decisions_total",
                "Rate-limit decisions by backend and outcome",
                &["backend", "outcome"]
            )
            .map_err(|e| registration_error("rate_limit_decisions_total", e))?,

            rate_limit_failovers_total: register_counter_vec!(
                "pqmem_rate_limit_failovers_total",
                "Distributed rate-limit failures answered by the local counter",
                &["backend"]
            )
            .map_err(|e| registration_error("rate_limit_failovers_total", e))?,

            api_key_rotations_total: register_counter_vec!(
                "pqmem_api_key_rotations_total",
                "API key rotations by status",
                &["status"]
            )
            .map_err(|e| registration_error("api_key_rotations_total", e))?,
        })
    }

    pub fn record_auth_attempt(&self, method: &str, outcome: &str) {
        self.auth_attempts_total
            .with_label_values(&[method, outcome])
            .inc();
    }

    pub fn record_cache_lookup(&self, result: &str) {
        self.api_key_cache_lookups_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn record_rate_limit_decision(&self, backend: &str, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "rejected" };
        self.rate_limit_decisions_total
            .with_label_values(&[backend, outcome])
            .inc();
    }

    pub fn record_rate_limit_failover(&self, backend: &str) {
        self.rate_limit_failovers_total
            .with_label_values(&[backend])
            .inc();
    }

    pub fn record_key_rotation(&self, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.api_key_rotations_total
            .with_label_values(&[status])
            .inc();
    }
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

/// Run `f` against the global metrics if they initialized.
pub fn with_metrics(f: impl FnOnce(&PqMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

/// Handler for `GET /metrics`.
pub async fn metrics_handler() -> impl IntoResponse {
    // Touch the registry so counters appear before the first request.
    Lazy::force(&METRICS);

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        assert!(!metrics.auth_attempts_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_rate_limit_failover() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let before = metrics
            .rate_limit_failovers_total
            .with_label_values(&["unit-test"])
            .get();
        metrics.record_rate_limit_failover("unit-test");
        let after = metrics
            .rate_limit_failovers_total
            .with_label_values(&["unit-test"])
            .get();
        assert_eq!(after - before, 1.0);
        Ok(())
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        with_metrics(|m| {
            m.record_auth_attempt("api_key", "success");
            m.record_cache_lookup("hit");
            m.record_rate_limit_decision("local", false);
            m.record_key_rotation(true);
        });
    }
}
