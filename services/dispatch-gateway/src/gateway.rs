//! Request handling for the dispatch routes
//!
//! Turns `POST /v1/...` requests into dispatcher calls. Backend response
//! bodies are returned under `result`; the credential that produced them is
//! reported only as a preview.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use credentials::{Credential, Provenance};
use dispatcher::{
    DispatchRequest, Dispatcher, EndpointResolver, Operation, ProgressFn, ServiceFamily,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::{dispatch_error_response, error_response};

/// Header carrying a caller-held credential that bypasses rotation.
pub const EXPLICIT_CREDENTIAL_HEADER: &str = "x-explicit-credential";

/// Shared state for the dispatch routes
#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub resolver: Arc<EndpointResolver>,
    pub direct_timeout: Duration,
}

#[derive(Deserialize)]
struct ComposeBody {
    #[serde(default)]
    uploads: Vec<Value>,
    recipe: Value,
}

fn json_response(status: StatusCode, body: Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn parse_target(
    family: &str,
    operation: &str,
    request_id: &str,
) -> Result<(ServiceFamily, Operation), Response> {
    let family: ServiceFamily = family
        .parse()
        .map_err(|e: String| error_response(StatusCode::NOT_FOUND, "not_found", &e, request_id))?;
    let operation: Operation = operation
        .parse()
        .map_err(|e: String| error_response(StatusCode::NOT_FOUND, "not_found", &e, request_id))?;
    Ok((family, operation))
}

fn parse_payload(body: &[u8], request_id: &str) -> Result<Value, Response> {
    serde_json::from_slice(body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            &format!("invalid JSON body: {e}"),
            request_id,
        )
    })
}

/// The prompt, when the payload carries one, recorded as the telemetry description.
fn describe(payload: &Value) -> Option<String> {
    payload
        .get("prompt")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn progress_logger(request_id: &str) -> ProgressFn {
    let request_id = request_id.to_owned();
    Arc::new(move |message: &str| {
        info!(request_id = %request_id, progress = message, "dispatch progress");
    })
}

fn build_request(
    destination: String,
    payload: Value,
    label: String,
    request_id: &str,
) -> DispatchRequest {
    let description = describe(&payload);
    let mut request =
        DispatchRequest::new(destination, payload, label).with_progress(progress_logger(request_id));
    if let Some(description) = description {
        request = request.with_description(description);
    }
    request
}

/// `POST /v1/{family}/{operation}`: rotate credentials until the backend accepts.
#[instrument(skip_all, fields(request_id = %request_id, family = %family, operation = %operation))]
pub async fn dispatch_operation(
    state: &GatewayState,
    family: &str,
    operation: &str,
    explicit_credential: Option<&str>,
    body: &[u8],
    request_id: &str,
) -> Response {
    let (family, operation) = match parse_target(family, operation, request_id) {
        Ok(target) => target,
        Err(response) => return response,
    };
    let payload = match parse_payload(body, request_id) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let destination = state.resolver.url_for(family, operation);
    let label = format!("{family}:{}", operation.name());
    let mut request = build_request(destination, payload, label, request_id);
    if let Some(value) = explicit_credential.map(str::trim).filter(|v| !v.is_empty()) {
        request = request.with_credential(Credential::new(
            value,
            Provenance::from_tag(Some("explicit")),
        ));
    }

    match state.dispatcher.dispatch(request).await {
        Ok(response) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "result": response.body,
                "credential": response.credential.preview(),
            }),
        ),
        Err(e) => {
            warn!(error = %e, kind = e.kind(), "dispatch failed");
            dispatch_error_response(&e, request_id)
        }
    }
}

/// `POST /v1/direct/{family}/{operation}`: one attempt with the caller's bearer.
#[instrument(skip_all, fields(request_id = %request_id, family = %family, operation = %operation))]
pub async fn direct_operation(
    state: &GatewayState,
    family: &str,
    operation: &str,
    bearer: Option<&str>,
    body: &[u8],
    request_id: &str,
) -> Response {
    let (family, operation) = match parse_target(family, operation, request_id) {
        Ok(target) => target,
        Err(response) => return response,
    };
    let Some(bearer) = bearer.map(str::trim).filter(|b| !b.is_empty()) else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "missing_credential",
            "direct invocation requires an Authorization: Bearer credential",
            request_id,
        );
    };
    let payload = match parse_payload(body, request_id) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let credential = Credential::new(bearer, Provenance::from_tag(Some("direct")));
    let destination = state.resolver.url_for(family, operation);

    match state
        .dispatcher
        .invoke_direct(&destination, &payload, &credential, state.direct_timeout)
        .await
    {
        Ok(result) => json_response(StatusCode::OK, serde_json::json!({ "result": result })),
        Err(e) => dispatch_error_response(&e, request_id),
    }
}

/// `POST /v1/{family}/compose`: upload every file concurrently, then run the
/// recipe with the upload results inserted under `uploads`.
#[instrument(skip_all, fields(request_id = %request_id, family = %family))]
pub async fn compose(state: &GatewayState, family: &str, body: &[u8], request_id: &str) -> Response {
    let family: ServiceFamily = match family.parse() {
        Ok(family) => family,
        Err(e) => return error_response(StatusCode::NOT_FOUND, "not_found", &e, request_id),
    };
    let body: ComposeBody = match serde_json::from_slice(body) {
        Ok(body) => body,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid compose body: {e}"),
                request_id,
            );
        }
    };
    let Value::Object(mut recipe) = body.recipe else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "recipe must be a JSON object",
            request_id,
        );
    };

    let upload_url = state.resolver.url_for(family, Operation::Upload);
    let recipe_url = state.resolver.url_for(family, Operation::RunRecipe);
    let uploads = body
        .uploads
        .into_iter()
        .map(|payload| {
            build_request(
                upload_url.clone(),
                payload,
                format!("{family}:upload"),
                request_id,
            )
        })
        .collect();

    let compose_label = format!("{family}:run-recipe");
    let result = state
        .dispatcher
        .upload_then_compose(uploads, |bodies| {
            recipe.insert("uploads".to_string(), Value::Array(bodies));
            build_request(recipe_url, Value::Object(recipe), compose_label, request_id)
        })
        .await;

    match result {
        Ok(response) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "result": response.body,
                "credential": response.credential.preview(),
            }),
        ),
        Err(e) => {
            warn!(error = %e, kind = e.kind(), "compose failed");
            dispatch_error_response(&e, request_id)
        }
    }
}
