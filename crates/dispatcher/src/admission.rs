//! Admission gate client and slot polling
//!
//! A remote gate caps in-flight generations per backend server. The
//! dispatcher asks for a slot with a fixed cooldown and polls until granted;
//! there is no upper bound on polls. A failing gate call aborts the dispatch
//! immediately and is never retried here.
//!
//! The polling loop is a pure state machine (`handle_event`) driven by
//! `acquire_slot`, which does the I/O and sleeps through an injected
//! `Sleeper` so tests can run without real delays.
//!
//! Transitions:
//! - Waiting → Waiting (denied, retry after the poll interval)
//! - Waiting → Acquired (granted)
//! - Waiting → Failed (gate call errored)
//! - Acquired / Failed are terminal

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use tracing::{debug, info, warn};

use crate::dispatch::ProgressFn;
use crate::error::{DispatchError, Result};
use crate::metrics;

/// Cooldown requested from the gate, in seconds.
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// Delay between denied polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// The gate call failed (transport or database error). Never a "maybe".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct GateError(pub String);

/// Remote slot reservation. Idempotent: repeated calls with the same
/// arguments are the polling contract.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn AdmissionGate>`).
pub trait AdmissionGate: Send + Sync {
    fn request_slot<'a>(
        &'a self,
        server_identity: &'a str,
        cooldown_secs: u64,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<bool, GateError>> + Send + 'a>>;
}

/// Timed suspension between polls.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production sleeper backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Cooldown and poll interval used for every admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    pub cooldown_secs: u64,
    pub poll_interval: Duration,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionState {
    Waiting { polls: u32 },
    Acquired { polls: u32 },
    Failed { polls: u32, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    Granted,
    Denied,
    GateFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionAction {
    Proceed,
    RetryAfter(Duration),
    Abort(String),
    /// Event arrived in a terminal state
    None,
}

/// Pure transition function for the polling loop.
pub fn handle_event(
    state: AdmissionState,
    event: AdmissionEvent,
    poll_interval: Duration,
) -> (AdmissionState, AdmissionAction) {
    match (state, event) {
        (AdmissionState::Waiting { polls }, AdmissionEvent::Granted) => (
            AdmissionState::Acquired { polls: polls + 1 },
            AdmissionAction::Proceed,
        ),
        (AdmissionState::Waiting { polls }, AdmissionEvent::Denied) => (
            AdmissionState::Waiting { polls: polls + 1 },
            AdmissionAction::RetryAfter(poll_interval),
        ),
        (AdmissionState::Waiting { polls }, AdmissionEvent::GateFailed(error)) => (
            AdmissionState::Failed {
                polls: polls + 1,
                error: error.clone(),
            },
            AdmissionAction::Abort(error),
        ),
        (terminal, _) => (terminal, AdmissionAction::None),
    }
}

/// Poll the gate until a slot is granted. Returns the number of gate calls.
pub async fn acquire_slot(
    gate: &dyn AdmissionGate,
    sleeper: &dyn Sleeper,
    server_identity: &str,
    policy: AdmissionPolicy,
    progress: Option<&ProgressFn>,
) -> Result<u32> {
    let mut state = AdmissionState::Waiting { polls: 0 };

    loop {
        let event = match gate.request_slot(server_identity, policy.cooldown_secs).await {
            Ok(true) => AdmissionEvent::Granted,
            Ok(false) => AdmissionEvent::Denied,
            Err(e) => AdmissionEvent::GateFailed(e.0),
        };

        let (next, action) = handle_event(state, event, policy.poll_interval);
        state = next;

        match action {
            AdmissionAction::Proceed => {
                let polls = match state {
                    AdmissionState::Acquired { polls } => polls,
                    _ => 0,
                };
                metrics::record_admission_poll("granted");
                info!(server = server_identity, polls, "admission slot acquired");
                if let Some(progress) = progress {
                    progress(&format!("Generation slot acquired on {server_identity}"));
                }
                return Ok(polls);
            }
            AdmissionAction::RetryAfter(delay) => {
                metrics::record_admission_poll("denied");
                debug!(
                    server = server_identity,
                    retry_in_ms = delay.as_millis() as u64,
                    "admission denied, waiting for a free slot"
                );
                if let Some(progress) = progress {
                    progress(&format!(
                        "Waiting for a free generation slot on {server_identity}..."
                    ));
                }
                sleeper.sleep(delay).await;
            }
            AdmissionAction::Abort(error) => {
                metrics::record_admission_poll("error");
                warn!(server = server_identity, error = %error, "admission gate call failed");
                return Err(DispatchError::AdmissionGate(error));
            }
            AdmissionAction::None => {
                return Err(DispatchError::AdmissionGate(format!(
                    "admission loop reached terminal state {state:?}"
                )));
            }
        }
    }
}

/// Server identity for the gate: the origin of the destination URL.
///
/// Falls back to the raw destination when it is not an http(s) URL.
pub fn server_identity(destination: &str) -> String {
    match reqwest::Url::parse(destination) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => url.origin().ascii_serialization(),
        _ => destination.trim_end_matches('/').to_string(),
    }
}

/// Gate client calling a remote `request_slot` RPC over HTTP.
///
/// POSTs `{"cooldown_seconds", "server_url"}`. The response body is either a
/// bare JSON boolean or `{"acquired": bool}`.
pub struct RpcAdmissionGate {
    client: reqwest::Client,
    rpc_url: String,
    api_key: Option<Secret<String>>,
}

impl RpcAdmissionGate {
    pub fn new(client: reqwest::Client, rpc_url: impl Into<String>, api_key: Option<Secret<String>>) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            api_key,
        }
    }
}

impl AdmissionGate for RpcAdmissionGate {
    fn request_slot<'a>(
        &'a self,
        server_identity: &'a str,
        cooldown_secs: u64,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<bool, GateError>> + Send + 'a>> {
        Box::pin(async move {
            let mut request = self.client.post(&self.rpc_url).json(&serde_json::json!({
                "cooldown_seconds": cooldown_secs,
                "server_url": server_identity,
            }));
            if let Some(key) = &self.api_key {
                request = request
                    .header("apikey", key.expose())
                    .bearer_auth(key.expose());
            }

            let response = request
                .send()
                .await
                .map_err(|e| GateError(format!("admission gate unreachable: {e}")))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| GateError(format!("reading admission gate response: {e}")))?;

            if !status.is_success() {
                return Err(GateError(format!("admission gate returned {status}: {body}")));
            }

            parse_acquired(&body)
                .ok_or_else(|| GateError(format!("unexpected admission gate response: {body}")))
        })
    }
}

fn parse_acquired(body: &str) -> Option<bool> {
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    match value {
        serde_json::Value::Bool(acquired) => Some(acquired),
        serde_json::Value::Object(map) => map.get("acquired").and_then(|v| v.as_bool()),
        _ => None,
    }
}
