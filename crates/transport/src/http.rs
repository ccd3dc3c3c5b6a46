//! HTTP transport: one POST per attempt over a shared reqwest client.
//!
//! Headers carry the bearer credential and the caller identity. The body is
//! the caller's opaque JSON payload, forwarded untouched.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::classify::classify_status;
use crate::{AttemptError, ErrorClassification, Result, Transport};

/// Header identifying the calling application to the backend.
pub const CALLER_ID_HEADER: &str = "x-caller-id";

/// Longest raw body excerpt carried in an error message.
const MAX_MESSAGE_CHARS: usize = 512;

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    caller_identity: String,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, caller_identity: impl Into<String>) -> Self {
        Self {
            client,
            caller_identity: caller_identity.into(),
        }
    }
}

impl Transport for HttpTransport {
    fn id(&self) -> &str {
        "http"
    }

    fn send<'a>(
        &'a self,
        destination: &'a str,
        payload: &'a serde_json::Value,
        bearer: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .post(destination)
                .bearer_auth(bearer)
                .header(CALLER_ID_HEADER, &self.caller_identity)
                .json(payload)
                .send()
                .await
                .map_err(|e| AttemptError::Transport(format!("request failed: {e}")))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| AttemptError::Transport(format!("reading response body: {e}")))?;

            if !status.is_success() {
                let code = status.as_u16();
                let classification = classify_status(code, &text);
                debug!(status = code, classification = classification.label(), "backend rejected attempt");
                let message = extract_message(&text).unwrap_or_else(|| {
                    format!(
                        "backend returned {code} {}",
                        status.canonical_reason().unwrap_or("")
                    )
                    .trim_end()
                    .to_string()
                });
                return Err(AttemptError::Api {
                    status: code,
                    message,
                    classification,
                });
            }

            serde_json::from_str(&text).map_err(|e| AttemptError::Api {
                status: status.as_u16(),
                message: format!("invalid response body: {e}"),
                classification: ErrorClassification::Transient,
            })
        })
    }
}

/// Pull the most useful human-readable message out of an error body.
///
/// Looks at `error.message`, `error`, `message`, and `detail` in that order,
/// falling back to the raw text (truncated). Returns `None` for empty bodies.
pub fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let candidates = [
            json.pointer("/error/message"),
            json.get("error"),
            json.get("message"),
            json.get("detail"),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(s) = candidate.as_str()
                && !s.trim().is_empty()
            {
                return Some(s.trim().to_string());
            }
        }
    }

    Some(trimmed.chars().take(MAX_MESSAGE_CHARS).collect())
}
