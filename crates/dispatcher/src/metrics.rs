//! Dispatcher metrics
//!
//! Recorded through the `metrics` facade; the gateway installs the
//! Prometheus recorder. Without a recorder these calls are no-ops.
//!
//! - `dispatch_attempts_total` (counter): labels `label`, `status`
//! - `dispatch_admission_polls_total` (counter): label `outcome`
//! - `dispatch_exhausted_total` (counter): label `label`
//! - `dispatch_duration_seconds` (histogram): label `outcome`

/// Histogram boundaries for `dispatch_duration_seconds`. Admission waits can
/// run for minutes, so the range extends well past a single attempt.
pub const DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

pub fn record_attempt(label: &str, status: &str) {
    metrics::counter!("dispatch_attempts_total", "label" => label.to_string(), "status" => status.to_string())
        .increment(1);
}

pub fn record_admission_poll(outcome: &'static str) {
    metrics::counter!("dispatch_admission_polls_total", "outcome" => outcome).increment(1);
}

pub fn record_exhausted(label: &str) {
    metrics::counter!("dispatch_exhausted_total", "label" => label.to_string()).increment(1);
}

pub fn record_dispatch(outcome: &'static str, duration_secs: f64) {
    metrics::histogram!("dispatch_duration_seconds", "outcome" => outcome).record(duration_secs);
}
