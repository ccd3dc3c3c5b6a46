//! The dispatcher: admission, credential rotation, attempt loop
//!
//! Each call is one sequential pipeline. Calls from different callers run
//! concurrently and never coordinate locally; server capacity is arbitrated
//! by the remote admission gate. Credential attempts inside one call are
//! strictly sequential so a backend never sees duplicate billable requests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use credentials::{Credential, CredentialStore};
use futures_util::future::try_join_all;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use transport::Transport;

use crate::admission::{AdmissionGate, AdmissionPolicy, Sleeper, TokioSleeper, acquire_slot, server_identity};
use crate::candidates::build_candidates;
use crate::error::{AttemptRecord, DispatchError, Result};
use crate::metrics;
use crate::notify::{DispatchEvent, NotificationBus};
use crate::telemetry::{TelemetryEntry, TelemetrySink};

/// Hard deadline for the direct invocation path.
pub const DEFAULT_DIRECT_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Sink for human-readable progress strings.
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// What a request does at the backend, derived from its context label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Generation,
    StatusPoll,
    Upload,
}

impl RequestKind {
    /// `Upload` if the label mentions "upload", `StatusPoll` if it mentions
    /// "status" or "poll", otherwise `Generation`.
    pub fn from_label(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        if label.contains("upload") {
            RequestKind::Upload
        } else if label.contains("status") || label.contains("poll") {
            RequestKind::StatusPoll
        } else {
            RequestKind::Generation
        }
    }

    /// Only generations occupy a server slot.
    pub fn needs_admission(&self) -> bool {
        matches!(self, RequestKind::Generation)
    }
}

/// One request to deliver. The payload is opaque to the dispatcher.
#[derive(Clone)]
pub struct DispatchRequest {
    pub destination: String,
    pub payload: Value,
    /// Context label used for logging, telemetry, and admission (e.g. `video:generate`)
    pub label: String,
    /// Free-text description recorded with telemetry (typically the prompt)
    pub description: Option<String>,
    /// Bypasses rotation: the only candidate tried
    pub explicit_credential: Option<Credential>,
    pub progress: Option<ProgressFn>,
}

impl DispatchRequest {
    pub fn new(destination: impl Into<String>, payload: Value, label: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            payload,
            label: label.into(),
            description: None,
            explicit_credential: None,
            progress: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.explicit_credential = Some(credential);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn kind(&self) -> RequestKind {
        RequestKind::from_label(&self.label)
    }

    fn report(&self, message: &str) {
        if let Some(progress) = &self.progress {
            progress(message);
        }
    }

    fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

/// Successful dispatch: the backend's body and the credential that produced it.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub body: Value,
    pub credential: Credential,
}

/// Orchestrates admission, candidate selection, and the attempt loop.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    gate: Arc<dyn AdmissionGate>,
    telemetry: Arc<dyn TelemetrySink>,
    notifications: NotificationBus,
    sleeper: Arc<dyn Sleeper>,
    admission: AdmissionPolicy,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        gate: Arc<dyn AdmissionGate>,
        telemetry: Arc<dyn TelemetrySink>,
        notifications: NotificationBus,
    ) -> Self {
        Self {
            transport,
            store,
            gate,
            telemetry,
            notifications,
            sleeper: Arc::new(TokioSleeper),
            admission: AdmissionPolicy::default(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_admission_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.admission = policy;
        self
    }

    pub fn notifications(&self) -> &NotificationBus {
        &self.notifications
    }

    /// Deliver `request`, rotating through candidates until one succeeds.
    ///
    /// Fails with `AdmissionGate` if the gate call errors, with
    /// `NoCredentialsAvailable` before any network call if there is nothing
    /// to try, and with `Exhausted` (carrying the last error) if every
    /// candidate fails.
    #[instrument(skip_all, fields(label = %request.label, destination = %request.destination))]
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse> {
        let started = Instant::now();
        let result = self.run(&request).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_dispatch(outcome, started.elapsed().as_secs_f64());
        result
    }

    async fn run(&self, request: &DispatchRequest) -> Result<DispatchResponse> {
        if request.kind().needs_admission() {
            let server = server_identity(&request.destination);
            if let Err(e) = acquire_slot(
                self.gate.as_ref(),
                self.sleeper.as_ref(),
                &server,
                self.admission,
                request.progress.as_ref(),
            )
            .await
            {
                self.telemetry.record(TelemetryEntry::error(
                    &request.label,
                    request.description(),
                    String::new(),
                    e.to_string(),
                ));
                return Err(e);
            }
        }

        let candidates =
            build_candidates(self.store.as_ref(), request.explicit_credential.clone()).await;
        if candidates.is_empty() {
            warn!("no credentials available, nothing attempted");
            self.telemetry.record(TelemetryEntry::error(
                &request.label,
                request.description(),
                String::new(),
                DispatchError::NoCredentialsAvailable.to_string(),
            ));
            return Err(DispatchError::NoCredentialsAvailable);
        }

        let total = candidates.len();
        debug!(candidates = total, "starting attempt loop");
        let mut history: Vec<AttemptRecord> = Vec::with_capacity(total);
        let mut personal_reported = false;

        for (index, credential) in candidates.into_iter().enumerate() {
            let attempt = index + 1;
            let preview = credential.preview();
            request.report(&format!("Trying credential {attempt}/{total} ({preview})"));

            match self
                .transport
                .send(&request.destination, &request.payload, credential.value())
                .await
            {
                Ok(body) => {
                    metrics::record_attempt(&request.label, "success");
                    info!(attempt, credential = %preview, "dispatch succeeded");
                    self.telemetry.record(TelemetryEntry::success(
                        &request.label,
                        request.description(),
                        preview,
                    ));
                    return Ok(DispatchResponse { body, credential });
                }
                Err(e) => {
                    metrics::record_attempt(&request.label, "error");
                    warn!(
                        transport = self.transport.id(),
                        attempt,
                        of = total,
                        credential = %preview,
                        provenance = %credential.provenance(),
                        kind = e.kind(),
                        classification = e.classification().label(),
                        error = %e,
                        "attempt failed, rotating"
                    );
                    self.telemetry.record(TelemetryEntry::error(
                        &request.label,
                        request.description(),
                        preview.clone(),
                        e.to_string(),
                    ));
                    if credential.is_personal() && !personal_reported {
                        personal_reported = true;
                        self.notifications
                            .publish(DispatchEvent::PersonalCredentialInvalid);
                    }
                    history.push(AttemptRecord {
                        preview,
                        provenance: credential.provenance().label().to_string(),
                        error: e,
                    });
                }
            }
        }

        let Some(last) = history.last() else {
            return Err(DispatchError::NoCredentialsAvailable);
        };
        let last_error = last.error.clone();
        warn!(attempts = history.len(), error = %last_error, "all credentials exhausted");
        metrics::record_exhausted(&request.label);
        self.telemetry.record(TelemetryEntry::error(
            &request.label,
            request.description(),
            last.preview.clone(),
            format!("all {} credentials failed: {last_error}", history.len()),
        ));

        Err(DispatchError::Exhausted {
            last: last_error,
            history,
        })
    }

    /// Single best-effort attempt with a caller-held credential.
    ///
    /// No admission, no rotation. Cancelled after `timeout`, which fails
    /// with `Timeout` rather than a transport error.
    #[instrument(skip_all, fields(destination = %destination, timeout_ms = timeout.as_millis() as u64))]
    pub async fn invoke_direct(
        &self,
        destination: &str,
        payload: &Value,
        credential: &Credential,
        timeout: Duration,
    ) -> Result<Value> {
        let preview = credential.preview();
        let attempt = self.transport.send(destination, payload, credential.value());

        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => Err(DispatchError::Attempt(e)),
            Err(_) => Err(DispatchError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match &result {
            Ok(_) => {
                metrics::record_attempt("direct", "success");
                self.telemetry
                    .record(TelemetryEntry::success("direct", "", preview));
            }
            Err(e) => {
                metrics::record_attempt("direct", "error");
                warn!(
                    transport = self.transport.id(),
                    credential = %preview,
                    error = %e,
                    "direct invocation failed"
                );
                self.telemetry
                    .record(TelemetryEntry::error("direct", "", preview, e.to_string()));
            }
        }
        result
    }

    /// Dispatch every upload concurrently, then the compose request built
    /// from their bodies (in upload order).
    ///
    /// Each upload rotates on its own. The first failed upload fails the
    /// whole operation and the compose request is never sent.
    pub async fn upload_then_compose<F>(
        &self,
        uploads: Vec<DispatchRequest>,
        build_compose: F,
    ) -> Result<DispatchResponse>
    where
        F: FnOnce(Vec<Value>) -> DispatchRequest,
    {
        let count = uploads.len();
        let uploaded = try_join_all(uploads.into_iter().map(|upload| self.dispatch(upload))).await?;
        debug!(uploads = count, "uploads complete, dispatching compose request");

        let bodies = uploaded.into_iter().map(|r| r.body).collect();
        self.dispatch(build_compose(bodies)).await
    }
}
