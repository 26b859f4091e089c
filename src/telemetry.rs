//! Prometheus exposition for the counters recorded across the crate.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global recorder. Only one recorder can exist per process.
pub fn install() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus recorder: {e}"))?;
    describe();
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!("casedesk_reports_submitted_total", "Reports accepted, by category");
    metrics::describe_counter!("casedesk_login_failures_total", "Rejected login attempts");
    metrics::describe_counter!("casedesk_rate_limited_total", "Requests refused by the rate limiter, by action");
}
