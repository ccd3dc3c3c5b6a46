//! HTTP error responses
//!
//! Every error leaves the gateway as
//! `{"error":{"type":"...","message":"...","request_id":"req_..."}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dispatcher::DispatchError;

pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

pub fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Status code for a dispatcher failure.
///
/// Upstream failures (gate, exhaustion, direct attempt) are 502; an empty
/// credential set is 503 since nothing was tried.
pub fn status_for(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::NoCredentialsAvailable => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        DispatchError::AdmissionGate(_)
        | DispatchError::Exhausted { .. }
        | DispatchError::Attempt(_) => StatusCode::BAD_GATEWAY,
    }
}

pub fn dispatch_error_response(err: &DispatchError, request_id: &str) -> Response {
    error_response(status_for(err), err.kind(), &err.to_string(), request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::{AttemptError, ErrorClassification};

    #[test]
    fn status_mapping() {
        let api = AttemptError::Api {
            status: 429,
            message: "quota exceeded".into(),
            classification: ErrorClassification::QuotaExceeded,
        };
        assert_eq!(
            status_for(&DispatchError::NoCredentialsAvailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&DispatchError::AdmissionGate("db down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&DispatchError::Exhausted {
                last: api.clone(),
                history: vec![],
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&DispatchError::Timeout { timeout_ms: 15_000 }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&DispatchError::Attempt(api)),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn error_body_shape() {
        let response = dispatch_error_response(&DispatchError::NoCredentialsAvailable, "req_abc");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "no_credentials_available");
        assert_eq!(json["error"]["message"], "no credentials available");
        assert_eq!(json["error"]["request_id"], "req_abc");
    }
}
