//! Admin API for runtime overrides
//!
//! Endpoints:
//! - GET/PUT /admin/endpoint-override: one base URL for every service family
//! - GET/PUT /admin/personal-credential: replace or clear the personal credential
//!
//! Never returns a credential, only its preview.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use credentials::{Credential, CredentialStore, SessionStore};
use dispatcher::EndpointResolver;
use serde::Deserialize;
use tracing::info;

use crate::error::{error_response, new_request_id};

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    resolver: Arc<EndpointResolver>,
    store: Arc<SessionStore>,
}

impl AdminState {
    pub fn new(resolver: Arc<EndpointResolver>, store: Arc<SessionStore>) -> Self {
        Self { resolver, store }
    }
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/admin/endpoint-override",
            get(get_override).put(put_override),
        )
        .route(
            "/admin/personal-credential",
            get(get_personal).put(put_personal),
        )
        .with_state(state)
}

fn json(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

#[derive(Deserialize)]
struct OverrideRequest {
    url: Option<String>,
}

async fn get_override(State(state): State<AdminState>) -> impl IntoResponse {
    json(
        StatusCode::OK,
        serde_json::json!({ "url": state.resolver.current_override() }),
    )
}

/// PUT /admin/endpoint-override: `{"url": "https://..."}` sets, `null` or blank clears.
async fn put_override(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<OverrideRequest>,
) -> Response {
    if let Some(url) = body.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
        && !url.starts_with("http://")
        && !url.starts_with("https://")
    {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            &format!("url must start with http:// or https://, got: {url}"),
            &new_request_id(),
        );
    }

    state.resolver.set_override(body.url);
    json(
        StatusCode::OK,
        serde_json::json!({ "url": state.resolver.current_override() }),
    )
}

#[derive(Deserialize)]
struct PersonalRequest {
    token: Option<String>,
}

async fn personal_status(store: &SessionStore) -> serde_json::Value {
    let personal = store.current_personal().await;
    serde_json::json!({
        "present": personal.is_some(),
        "preview": personal.map(|c| c.preview()),
    })
}

async fn get_personal(State(state): State<AdminState>) -> impl IntoResponse {
    json(StatusCode::OK, personal_status(&state.store).await)
}

/// PUT /admin/personal-credential: `{"token": "..."}` replaces, `null` or blank clears.
async fn put_personal(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<PersonalRequest>,
) -> impl IntoResponse {
    let credential = body
        .token
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .map(Credential::personal);
    info!(present = credential.is_some(), "personal credential replaced via admin API");
    state.store.set_personal(credential).await;
    json(StatusCode::OK, personal_status(&state.store).await)
}
