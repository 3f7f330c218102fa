//! Client-side metrics
//!
//! Recorded through the `metrics` facade; the embedding application decides
//! whether a recorder is installed. Without one, every call is a no-op.
//!
//! - `api_requests_total` (counter): labels `method`, `status`
//! - `api_request_duration_seconds` (histogram): label `status`
//! - `api_transport_errors_total` (counter): label `error_type`
//! - `api_token_refresh_total` (counter): label `outcome`
//! - `api_sessions_expired_total` (counter)

/// Record a request that produced a response.
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    metrics::counter!("api_requests_total", "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    metrics::histogram!("api_request_duration_seconds", "status" => status).record(duration_secs);
}

/// Record a request that never got a response.
pub fn record_transport_error(error_type: &'static str) {
    metrics::counter!("api_transport_errors_total", "error_type" => error_type).increment(1);
}

/// Record how a refresh attempt ended: `refreshed`, `coalesced`, `rejected`
/// or `unavailable`.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("api_token_refresh_total", "outcome" => outcome).increment(1);
}

pub fn record_session_expired() {
    metrics::counter!("api_sessions_expired_total").increment(1);
}
