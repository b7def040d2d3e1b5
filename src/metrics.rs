//! Prometheus metrics for the pod agent
//!
//! Registered in the default registry and, when `--metrics-addr` is given,
//! served as text on `/metrics`.

use std::net::SocketAddr;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Policy
    // ─────────────────────────────────────────────────────────────────────────────

    /// Policy fetches from the authority.
    ///
    /// Labels:
    /// - result: "success" or "error"
    pub static ref POLICY_SYNC_TOTAL: CounterVec = register_counter_vec!(
        "podsentinel_policy_sync_total",
        "Policy fetches from the authority by result",
        &["result"]
    ).expect("failed to register POLICY_SYNC_TOTAL metric");

    /// Constraints in the currently installed policy.
    pub static ref POLICY_CONSTRAINTS: Gauge = register_gauge!(
        "podsentinel_policy_constraints",
        "Number of constraints in the installed policy"
    ).expect("failed to register POLICY_CONSTRAINTS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Validation
    // ─────────────────────────────────────────────────────────────────────────────

    /// Duration of one validation pass.
    ///
    /// Labels:
    /// - validator: "process" or "file"
    pub static ref VALIDATION_PASS_DURATION: HistogramVec = register_histogram_vec!(
        "podsentinel_validation_pass_duration_seconds",
        "Time spent in one validation pass",
        &["validator"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).expect("failed to register VALIDATION_PASS_DURATION metric");

    /// Violations found, counted per pass (repeats are counted again).
    ///
    /// Labels:
    /// - kind: "process" or "file"
    pub static ref VIOLATIONS_DETECTED: CounterVec = register_counter_vec!(
        "podsentinel_violations_detected_total",
        "Violating processes and files found",
        &["kind"]
    ).expect("failed to register VIOLATIONS_DETECTED metric");

    /// Rules skipped because they could not be evaluated.
    pub static ref INVALID_RULES_TOTAL: CounterVec = register_counter_vec!(
        "podsentinel_invalid_rules_total",
        "Allow-rules skipped as invalid",
        &["kind"]
    ).expect("failed to register INVALID_RULES_TOTAL metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Reporting
    // ─────────────────────────────────────────────────────────────────────────────

    /// Violation events sent to the authority.
    ///
    /// Labels:
    /// - result: "success" or "error"
    pub static ref REPORTS_TOTAL: CounterVec = register_counter_vec!(
        "podsentinel_reports_total",
        "Violation event deliveries by result",
        &["result"]
    ).expect("failed to register REPORTS_TOTAL metric");
}

/// Render every registered metric in the Prometheus text format
pub fn encode_text() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

async fn metrics_handler() -> (StatusCode, String) {
    match encode_text() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Serve `/metrics` on `addr` until `shutdown` is cancelled
pub async fn serve(addr: SocketAddr, shutdown: CancellationToken) -> std::io::Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "serving metrics");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_registered_metrics() {
        REPORTS_TOTAL.with_label_values(&["success"]).inc();
        POLICY_CONSTRAINTS.set(2.0);

        let text = encode_text().unwrap();
        assert!(text.contains("podsentinel_reports_total"));
        assert!(text.contains("podsentinel_policy_constraints"));
    }

    #[tokio::test]
    async fn test_handler_returns_ok() {
        POLICY_SYNC_TOTAL.with_label_values(&["success"]).inc();
        let (status, body) = metrics_handler().await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("podsentinel_policy_sync_total"));
    }
}
