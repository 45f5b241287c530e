//! `/auth/*` — spec.md §6: unauthenticated, informational/admin endpoints.

use hyper::{Body, Response, StatusCode};
use resizr_model::auth::AuthGate;
use serde_json::json;

use crate::error::ApiError;
use crate::AppState;

pub async fn generate_key(_state: &AppState) -> Result<Response<Body>, ApiError> {
    let api_key = AuthGate::generate_key();
    let body = json!({
        "api_key": api_key,
        "message": "store this key now; it is not persisted and cannot be retrieved again",
    });
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body)?))?)
}

pub async fn status(state: &AppState) -> Result<Response<Body>, ApiError> {
    let gate = &state.auth_gate;
    let body = json!({
        "auth_enabled": gate.is_enabled(),
        "key_header": state.config.key_header,
        "read_write_keys": gate.read_write_key_count(),
        "read_only_keys": gate.read_only_key_count(),
    });
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body)?))?)
}
