//! Prometheus metrics for tester observability.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("tester_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record an admission decision (`admitted`, `ignored` or a rejection reason).
pub fn admission_decided(outcome: &str) {
    counter!("tester_admissions_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a runner state transition.
pub fn build_status_changed(status: &str) {
    counter!("tester_builds_total", "status" => status.to_string()).increment(1);
}

/// Record runner wall-clock duration.
pub fn build_duration(duration_ms: u64) {
    histogram!("tester_build_duration_ms").record(duration_ms as f64);
}

/// Record a result reported back by a runner.
pub fn test_result_recorded(status: &str) {
    counter!("tester_test_results_total", "status" => status.to_string()).increment(1);
}

pub fn issue_opened(kind: &str) {
    counter!("tester_issues_opened_total", "kind" => kind.to_string()).increment(1);
}
