//! Credential-rotating request dispatcher for rate-limited media backends
//!
//! Many callers share a rotating pool of bearer credentials and a remote
//! admission gate that caps in-flight generations per backend server. One
//! dispatch call runs as a sequential pipeline:
//! 1. Generation requests poll the admission gate until a slot is granted
//! 2. Candidates are built: explicit credential, else personal first and the
//!    shared pool in random order (refilled once if empty)
//! 3. Candidates are tried one at a time until one succeeds
//! 4. If all fail, the last error is returned and an aggregate entry recorded
//!
//! Telemetry gets one entry per attempt. A failing personal credential
//! publishes one `PersonalCredentialInvalid` event per call.

pub mod admission;
pub mod candidates;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use admission::{
    AdmissionGate, AdmissionPolicy, GateError, RpcAdmissionGate, Sleeper, TokioSleeper,
    server_identity,
};
pub use candidates::{build_candidates, order_candidates};
pub use dispatch::{
    DEFAULT_DIRECT_TIMEOUT, DispatchRequest, DispatchResponse, Dispatcher, ProgressFn, RequestKind,
};
pub use endpoint::{EndpointDefaults, EndpointResolver, Operation, ServiceFamily};
pub use error::{AttemptRecord, DispatchError, Result};
pub use notify::{DispatchEvent, NotificationBus};
pub use telemetry::{
    FanoutTelemetry, HttpTelemetry, LogTelemetry, TelemetryEntry, TelemetrySink, TelemetryStatus,
};
