//! `GET /health` — spec.md §6/§4.7: no auth, but billed against the `Info`
//! route class like `/info`.

use hyper::{Body, Response, StatusCode};
use serde_json::json;

use crate::error::ApiError;
use crate::AppState;

pub async fn handle(state: &AppState) -> Result<Response<Body>, ApiError> {
    let report = state.health_probe.check().await;
    let status = StatusCode::from_u16(report.status.http_status()).unwrap_or(StatusCode::OK);
    let body = json!({
        "status": report.status,
        "services": report.services,
        "timestamp": resizr_util::time::now(),
    });
    Ok(Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body)?))?)
}
