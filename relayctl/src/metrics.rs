//! Prometheus metrics for the relay pipeline.
//!
//! Counters are emitted through the `metrics` facade at the call sites. Until a recorder is
//! installed they are no-ops, so tests and deployments with `enable_metrics: false` pay
//! nothing.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::{Mutex, const_mutex};

pub const RELAY_REQUESTS_TOTAL: &str = "relay_requests_total";
pub const QUOTA_DENIED_TOTAL: &str = "relay_quota_denied_total";
pub const QUOTA_STORE_ERRORS_TOTAL: &str = "relay_quota_store_errors_total";
pub const CREDITS_RESERVED_TOTAL: &str = "relay_credits_reserved_total";
pub const RESERVATIONS_FINALIZED_TOTAL: &str = "relay_reservations_finalized_total";
pub const RESERVATIONS_SWEPT_TOTAL: &str = "relay_reservations_swept_total";

static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = const_mutex(None);

/// Install the global Prometheus recorder on first call and return its handle.
///
/// The facade only accepts one global recorder per process, so repeated calls (several
/// `Application`s in one test binary) share the first handle.
pub fn get_or_install_prometheus_handle() -> anyhow::Result<PrometheusHandle> {
    let mut slot = PROMETHEUS_HANDLE.lock();
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    *slot = Some(handle.clone());
    Ok(handle)
}

/// Outcome label for `relay_requests_total`
pub fn record_request(outcome: &'static str) {
    metrics::counter!(RELAY_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}
