//! Telemetry sink for dispatch attempts
//!
//! `record` is synchronous and must never block or fail the dispatch path.
//! Entries carry only a credential preview, never the secret itself.

use std::sync::Arc;

use common::Secret;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryStatus {
    Success,
    Error,
}

impl TelemetryStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TelemetryStatus::Success => "success",
            TelemetryStatus::Error => "error",
        }
    }
}

/// One telemetry record. Serialized field names follow the usage log schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryEntry {
    /// Context label of the request (e.g. `video:generate`)
    #[serde(rename = "model")]
    pub label: String,
    /// Caller-supplied description or prompt
    #[serde(rename = "prompt")]
    pub description: String,
    /// Credential suffix only
    #[serde(rename = "output")]
    pub preview: String,
    pub status: TelemetryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TelemetryEntry {
    pub fn success(label: &str, description: &str, preview: String) -> Self {
        Self {
            label: label.to_string(),
            description: description.to_string(),
            preview,
            status: TelemetryStatus::Success,
            error: None,
        }
    }

    pub fn error(label: &str, description: &str, preview: String, error: String) -> Self {
        Self {
            label: label.to_string(),
            description: description.to_string(),
            preview,
            status: TelemetryStatus::Error,
            error: Some(error),
        }
    }
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, entry: TelemetryEntry);
}

/// One structured log line per entry under the `telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn record(&self, entry: TelemetryEntry) {
        match entry.status {
            TelemetryStatus::Success => info!(
                target: "telemetry",
                label = %entry.label,
                credential = %entry.preview,
                "dispatch succeeded"
            ),
            TelemetryStatus::Error => warn!(
                target: "telemetry",
                label = %entry.label,
                credential = %entry.preview,
                error = entry.error.as_deref().unwrap_or(""),
                "dispatch failed"
            ),
        }
    }
}

/// Ships each entry to a remote usage log in a background task.
///
/// Delivery failures are logged and dropped. Outside a tokio runtime the
/// entry is dropped with a warning.
pub struct HttpTelemetry {
    client: reqwest::Client,
    url: String,
    api_key: Option<Secret<String>>,
}

impl HttpTelemetry {
    pub fn new(client: reqwest::Client, url: impl Into<String>, api_key: Option<Secret<String>>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
        }
    }
}

impl TelemetrySink for HttpTelemetry {
    fn record(&self, entry: TelemetryEntry) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(label = %entry.label, "no runtime for telemetry delivery, dropping entry");
            return;
        };

        let mut request = self.client.post(&self.url).json(&entry);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key.expose()).bearer_auth(key.expose());
        }
        let url = self.url.clone();

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    warn!(url = %url, status = response.status().as_u16(), "telemetry sink rejected entry");
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "telemetry delivery failed");
                }
            }
        });
    }
}

/// Records every entry into each inner sink, in order.
pub struct FanoutTelemetry {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutTelemetry {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }
}

impl TelemetrySink for FanoutTelemetry {
    fn record(&self, entry: TelemetryEntry) {
        for sink in &self.sinks {
            sink.record(entry.clone());
        }
    }
}
