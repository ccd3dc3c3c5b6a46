//! Stub collaborators shared by the dispatcher's unit tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use credentials::{Credential, CredentialStore};
use transport::{AttemptError, Transport};

use crate::admission::{AdmissionGate, GateError, Sleeper};
use crate::telemetry::{TelemetryEntry, TelemetrySink};

/// Gate answering from a script; once the script runs out it keeps granting.
pub struct ScriptedGate {
    script: Mutex<Vec<Result<bool, GateError>>>,
    requests: Mutex<Vec<(String, u64)>>,
}

impl ScriptedGate {
    pub fn new(mut script: Vec<Result<bool, GateError>>) -> Self {
        script.reverse();
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn granting() -> Self {
        Self::new(vec![])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<(String, u64)> {
        self.requests.lock().unwrap().clone()
    }
}

impl AdmissionGate for ScriptedGate {
    fn request_slot<'a>(
        &'a self,
        server_identity: &'a str,
        cooldown_secs: u64,
    ) -> Pin<Box<dyn Future<Output = Result<bool, GateError>> + Send + 'a>> {
        self.requests
            .lock()
            .unwrap()
            .push((server_identity.to_string(), cooldown_secs));
        let next = self.script.lock().unwrap().pop().unwrap_or(Ok(true));
        Box::pin(async move { next })
    }
}

/// Sleeper that records durations and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.sleeps.lock().unwrap().push(duration);
        Box::pin(async {})
    }
}

/// In-memory store with a scripted refill (`None` = refill fails).
pub struct StubStore {
    personal: Option<Credential>,
    shared: Mutex<Vec<Credential>>,
    refill: Option<Vec<Credential>>,
    refills: AtomicUsize,
}

impl StubStore {
    pub fn new(personal: Option<&str>, shared: Vec<&str>, refill: Option<Vec<&str>>) -> Self {
        Self {
            personal: personal.map(Credential::personal),
            shared: Mutex::new(shared.into_iter().map(Credential::shared).collect()),
            refill: refill.map(|pool| pool.into_iter().map(Credential::shared).collect()),
            refills: AtomicUsize::new(0),
        }
    }

    pub fn refills(&self) -> usize {
        self.refills.load(Ordering::SeqCst)
    }
}

impl CredentialStore for StubStore {
    fn current_shared(&self) -> Pin<Box<dyn Future<Output = Vec<Credential>> + Send + '_>> {
        let shared = self.shared.lock().unwrap().clone();
        Box::pin(async move { shared })
    }

    fn current_personal(&self) -> Pin<Box<dyn Future<Output = Option<Credential>> + Send + '_>> {
        let personal = self.personal.clone();
        Box::pin(async move { personal })
    }

    fn refill_shared(
        &self,
    ) -> Pin<Box<dyn Future<Output = credentials::Result<Vec<Credential>>> + Send + '_>> {
        self.refills.fetch_add(1, Ordering::SeqCst);
        let result = match &self.refill {
            Some(pool) => {
                *self.shared.lock().unwrap() = pool.clone();
                Ok(pool.clone())
            }
            None => Err(credentials::Error::Http("pool endpoint unreachable".into())),
        };
        Box::pin(async move { result })
    }
}

#[derive(Clone)]
enum Outcome {
    Succeed(serde_json::Value),
    Echo,
    Fail(AttemptError),
}

/// One recorded transport call.
#[derive(Debug, Clone)]
pub struct Call {
    pub destination: String,
    pub credential: String,
    pub payload: serde_json::Value,
}

/// Transport answering per credential value. Unscripted credentials fail
/// with a transport error.
pub struct ScriptedTransport {
    outcomes: HashMap<String, Outcome>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            outcomes: HashMap::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeed(mut self, credential: &str, body: serde_json::Value) -> Self {
        self.outcomes
            .insert(credential.to_string(), Outcome::Succeed(body));
        self
    }

    /// Succeed with `{"destination", "payload"}` echoed back.
    pub fn echo(mut self, credential: &str) -> Self {
        self.outcomes.insert(credential.to_string(), Outcome::Echo);
        self
    }

    pub fn fail(mut self, credential: &str, error: AttemptError) -> Self {
        self.outcomes
            .insert(credential.to_string(), Outcome::Fail(error));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn credentials_tried(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.credential).collect()
    }
}

impl Transport for ScriptedTransport {
    fn id(&self) -> &str {
        "scripted"
    }

    fn send<'a>(
        &'a self,
        destination: &'a str,
        payload: &'a serde_json::Value,
        bearer: &'a str,
    ) -> Pin<Box<dyn Future<Output = transport::Result<serde_json::Value>> + Send + 'a>> {
        self.calls.lock().unwrap().push(Call {
            destination: destination.to_string(),
            credential: bearer.to_string(),
            payload: payload.clone(),
        });
        let outcome = self.outcomes.get(bearer).cloned();
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match outcome {
                Some(Outcome::Succeed(body)) => Ok(body),
                Some(Outcome::Echo) => Ok(serde_json::json!({
                    "destination": destination,
                    "payload": payload,
                })),
                Some(Outcome::Fail(error)) => Err(error),
                None => Err(AttemptError::Transport(format!("no script for {bearer}"))),
            }
        })
    }
}

/// Sink keeping every entry in memory.
#[derive(Default)]
pub struct RecordingTelemetry {
    entries: Mutex<Vec<TelemetryEntry>>,
}

impl RecordingTelemetry {
    pub fn entries(&self) -> Vec<TelemetryEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, entry: TelemetryEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

pub fn api_error(status: u16, message: &str) -> AttemptError {
    AttemptError::Api {
        status,
        message: message.to_string(),
        classification: transport::classify_status(status, message),
    }
}

pub fn transport_error(message: &str) -> AttemptError {
    AttemptError::Transport(message.to_string())
}
