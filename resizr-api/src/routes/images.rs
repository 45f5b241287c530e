//! `/images/*` — spec.md §6, the core upload/serve/manage surface.

use hyper::{header, Body, Request, Response, StatusCode};
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::helpers::{parse_upload_multipart, query_param};
use crate::AppState;

fn parse_image_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse::<Uuid>()
        .map_err(|_| ApiError::Core(resizr_util::Error::Validation(format!("invalid image id: {}", raw))))
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Result<Response<Body>, ApiError> {
    Ok(Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body)?))?)
}

pub async fn upload(state: &AppState, req: Request<Body>) -> Result<Response<Body>, ApiError> {
    let parsed = parse_upload_multipart(req).await?;
    let result = state
        .image_service
        .upload(parsed.filename, parsed.bytes, &parsed.resolutions)
        .await
        .map_err(ApiError::Core)?;
    json_response(
        StatusCode::CREATED,
        json!({
            "id": result.id,
            "message": "image uploaded",
            "resolutions": result.resolutions,
        }),
    )
}

pub async fn info(state: &AppState, id: &str) -> Result<Response<Body>, ApiError> {
    let id = parse_image_id(id)?;
    let record = state.image_service.get_metadata(id).await.map_err(ApiError::Core)?;
    json_response(
        StatusCode::OK,
        json!({
            "id": record.id,
            "filename": record.filename,
            "mime_type": record.mime_type,
            "size": record.size,
            "dimensions": {"width": record.width, "height": record.height},
            "available_resolutions": record.resolutions,
            "created_at": record.created_at,
        }),
    )
}

/// Serves `/images/:id/original`, `/images/:id/thumbnail`, and
/// `/images/:id/:resolution`, deriving the variant on demand.
pub async fn download(state: &AppState, id: &str, resolution: &str) -> Result<Response<Body>, ApiError> {
    let uid = parse_image_id(id)?;
    let record = state.image_service.get_metadata(uid).await.map_err(ApiError::Core)?;
    let (stream, mime) = state
        .image_service
        .stream(uid, resolution)
        .await
        .map_err(ApiError::Core)?;

    let disposition = if resolution == "original" {
        format!("inline; filename=\"{}\"", record.filename)
    } else {
        let base = record
            .filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&record.filename);
        format!(
            "inline; filename=\"{}_{}.{}\"",
            base,
            resolution,
            mime.extension()
        )
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.content_type())
        .header(header::CACHE_CONTROL, "public, max-age=3600, immutable")
        .header(header::ETAG, format!("\"{}-{}\"", id, resolution))
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::wrap_stream(stream))?)
}

const DEFAULT_PRESIGN_TTL_SECS: u32 = 3600;

pub async fn presign(
    state: &AppState,
    id: &str,
    resolution: &str,
    req: &Request<Body>,
) -> Result<Response<Body>, ApiError> {
    let uid = parse_image_id(id)?;
    let ttl_secs = match query_param(req, "expires_in") {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ApiError::BadRequest(format!("invalid expires_in: {:?}", raw)))?,
        None => DEFAULT_PRESIGN_TTL_SECS,
    };

    let result = state
        .image_service
        .presign(uid, resolution, ttl_secs)
        .await
        .map_err(ApiError::Core)?;
    let expires_at = resizr_util::time::now() + chrono::Duration::seconds(ttl_secs as i64);
    json_response(
        StatusCode::OK,
        json!({
            "url": result.url,
            "expires_at": expires_at,
            "expires_in": result.expires_in,
        }),
    )
}

pub async fn delete(state: &AppState, id: &str) -> Result<Response<Body>, ApiError> {
    let uid = parse_image_id(id)?;
    state.image_service.delete(uid).await.map_err(ApiError::Core)?;
    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())?)
}

pub async fn delete_resolution(state: &AppState, id: &str, resolution: &str) -> Result<Response<Body>, ApiError> {
    let uid = parse_image_id(id)?;
    state
        .image_service
        .delete_resolution(uid, resolution)
        .await
        .map_err(ApiError::Core)?;
    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())?)
}
