//! Metrics collection and Prometheus exporter for uniproxy.
//!
//! This module provides metrics instrumentation for the node agent,
//! including reconciliation cycles, provisioning calls and traffic pushes.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize Prometheus metrics exporter.
///
/// Starts an HTTP server on the given address to expose metrics.
/// Returns an error message if binding fails.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {}", e))?;

    Ok(())
}

// ============================================================================
// Metric Names
// ============================================================================

/// Total number of reconciliation cycles, by mode and outcome.
pub const SYNC_CYCLES_TOTAL: &str = "uniproxy_sync_cycles_total";
/// Total number of reconciliation ticks skipped because a cycle was still running.
pub const SYNC_SKIPPED_TOTAL: &str = "uniproxy_sync_skipped_total";
/// Reconciliation cycle duration histogram (seconds).
pub const SYNC_DURATION_SECONDS: &str = "uniproxy_sync_duration_seconds";
/// Number of unique accounts in the latest directory fetch.
pub const DESIRED_ACCOUNTS: &str = "uniproxy_desired_accounts";
/// Total number of principals added to the proxy.
pub const PRINCIPALS_ADDED_TOTAL: &str = "uniproxy_principals_added_total";
/// Total number of principals removed from the proxy, by reason.
pub const PRINCIPALS_REMOVED_TOTAL: &str = "uniproxy_principals_removed_total";
/// Total number of failed provisioning calls, by operation.
pub const PROVISION_FAILURES_TOTAL: &str = "uniproxy_provision_failures_total";
/// Total number of traffic pushes, by outcome.
pub const TRAFFIC_PUSH_TOTAL: &str = "uniproxy_traffic_push_total";
/// Total bytes reported to the panel, by direction.
pub const TRAFFIC_REPORTED_BYTES_TOTAL: &str = "uniproxy_traffic_reported_bytes_total";
/// Total number of errors by type.
pub const ERRORS_TOTAL: &str = "uniproxy_errors_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a finished reconciliation cycle.
///
/// Mode: "full" or "incremental". Outcome: "ok" or "aborted".
#[inline]
pub fn record_sync_cycle(mode: &'static str, outcome: &'static str, duration_secs: f64) {
    counter!(SYNC_CYCLES_TOTAL, "mode" => mode, "outcome" => outcome).increment(1);
    histogram!(SYNC_DURATION_SECONDS, "mode" => mode).record(duration_secs);
}

/// Record a tick skipped because the previous cycle had not finished.
#[inline]
pub fn record_sync_skipped() {
    counter!(SYNC_SKIPPED_TOTAL).increment(1);
}

/// Set the number of unique desired accounts.
#[inline]
pub fn set_desired_accounts(count: usize) {
    gauge!(DESIRED_ACCOUNTS).set(count as f64);
}

/// Record a principal added to the proxy.
#[inline]
pub fn record_principal_added() {
    counter!(PRINCIPALS_ADDED_TOTAL).increment(1);
}

/// Record a principal removed (reason: "wipe", "rotate", "stale").
#[inline]
pub fn record_principal_removed(reason: &'static str) {
    counter!(PRINCIPALS_REMOVED_TOTAL, "reason" => reason).increment(1);
}

/// Record a failed provisioning call (op: "add", "remove").
#[inline]
pub fn record_provision_failure(op: &'static str) {
    counter!(PROVISION_FAILURES_TOTAL, "op" => op).increment(1);
}

/// Record a traffic push attempt (outcome: "ok", "failed").
#[inline]
pub fn record_traffic_push(outcome: &'static str) {
    counter!(TRAFFIC_PUSH_TOTAL, "outcome" => outcome).increment(1);
}

/// Record bytes reported to the panel.
#[inline]
pub fn record_traffic_reported(up: u64, down: u64) {
    counter!(TRAFFIC_REPORTED_BYTES_TOTAL, "direction" => "up").increment(up);
    counter!(TRAFFIC_REPORTED_BYTES_TOTAL, "direction" => "down").increment(down);
}

/// Record an error by type.
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}

// ============================================================================
// Error Type Constants (re-exported from uniproxy-core)
// ============================================================================

pub use uniproxy_core::{
    ERROR_CONFIG, ERROR_DECODE, ERROR_PROVISIONING, ERROR_STATUS, ERROR_TRANSPORT,
};
