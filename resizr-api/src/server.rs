//! The HTTP bootstrap: binds a raw `hyper` server, routes by method+path,
//! and wraps every handler with the auth/rate-limit gates, request-ID
//! propagation, CORS, and the error-envelope mapping of spec.md §6/§7.
//!
//! Routing here is a flat match over path segments rather than a router
//! crate — the surface is small and fixed, and it keeps the dispatch logic
//! next to the auth/rate-limit decision for each route, mirroring how the
//! teacher's RPC server keeps one dispatch table per process.

use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use resizr_model::auth::Permission;
use resizr_model::rate_limit::{RateLimitOutcome, RateLimitSnapshot, RouteClass};
use resizr_util::config::Config;
use resizr_util::Error as CoreError;

use crate::error::{ApiError, ErrorEnvelope};
use crate::middleware::{apply_cors_headers, apply_security_headers, echo_request_id, preflight_response, request_id};
use crate::routes;
use crate::AppState;

pub struct ApiServer {
    pub bind_addr: SocketAddr,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(bind_addr: SocketAddr, state: Arc<AppState>) -> Self {
        ApiServer { bind_addr, state }
    }

    pub async fn run(self, shutdown_signal: impl Future<Output = ()>) -> Result<(), hyper::Error> {
        let state = self.state;
        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let state = state.clone();
            let client_ip = conn.remote_addr().ip();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    handle_request(state.clone(), req, client_ip)
                }))
            }
        });

        let server = Server::bind(&self.bind_addr).serve(make_svc);
        tracing::info!(addr = %self.bind_addr, "resizr listening");
        server.with_graceful_shutdown(shutdown_signal).await
    }
}

async fn handle_request(
    state: Arc<AppState>,
    req: Request<Body>,
    client_ip: IpAddr,
) -> Result<Response<Body>, Infallible> {
    if let Some(preflight) = preflight_response(&req) {
        return Ok(preflight);
    }

    let started = Instant::now();
    let rid = request_id(&req);
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = match dispatch(&state, req, client_ip).await {
        Ok(resp) => resp,
        Err(e) => error_response(&e, &rid),
    };

    echo_request_id(&mut response, &rid);
    apply_cors_headers(&mut response);
    apply_security_headers(&mut response, state.config.log_format == "json");

    tracing::debug!(
        request_id = %rid,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request handled",
    );

    Ok(response)
}

fn error_response(e: &ApiError, request_id: &str) -> Response<Body> {
    if e.is_server_error() {
        tracing::error!(request_id = %request_id, error = %e, "request failed");
    } else {
        tracing::warn!(request_id = %request_id, error = %e, "request rejected");
    }
    let envelope = ErrorEnvelope::from(e);
    let status = e.http_status_code();
    let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()));
    if let ApiError::RateLimited(snapshot) = e {
        response
            .headers_mut()
            .insert(hyper::header::RETRY_AFTER, hyper::header::HeaderValue::from_static("60"));
        apply_rate_limit_headers(&mut response, *snapshot);
    }
    response
}

/// Extracts the presented API key using the configured header name.
fn presented_key<'a>(req: &'a Request<Body>, key_header: &str) -> Option<&'a str> {
    req.headers()
        .iter()
        .find(|(name, _)| name.as_str().eq_ignore_ascii_case(key_header))
        .and_then(|(_, value)| value.to_str().ok())
}

/// Runs the auth and rate-limit gates for a route, attaching
/// `X-RateLimit-*` headers to whatever the handler returns (or to the error
/// response, on rejection). Takes the presented key as an owned/borrowed
/// string rather than the request itself, so callers remain free to move
/// the request body into `handler` (multipart upload, streaming download).
async fn guarded<F, Fut>(
    state: &AppState,
    key: Option<&str>,
    client_ip: IpAddr,
    required: Permission,
    class: RouteClass,
    handler: F,
) -> Result<Response<Body>, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response<Body>, ApiError>>,
{
    let granted = state.auth_gate.authorize(key).map_err(ApiError::Core)?;
    state.auth_gate.require(granted, required).map_err(ApiError::Core)?;

    let outcome = state.rate_gate.check(client_ip, class);
    let snapshot = match outcome {
        RateLimitOutcome::Allowed(s) => s,
        RateLimitOutcome::Limited(s) => {
            return Err(ApiError::RateLimited(s));
        }
    };

    let mut response = handler().await?;
    apply_rate_limit_headers(&mut response, snapshot);
    Ok(response)
}

/// Runs only the rate-limit gate, for routes that skip auth but still count
/// against a `RouteClass` budget (spec.md §4.7's INFO class covers
/// `/health` alongside `/info`).
async fn rate_limited<F, Fut>(
    state: &AppState,
    client_ip: IpAddr,
    class: RouteClass,
    handler: F,
) -> Result<Response<Body>, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response<Body>, ApiError>>,
{
    let outcome = state.rate_gate.check(client_ip, class);
    let snapshot = match outcome {
        RateLimitOutcome::Allowed(s) => s,
        RateLimitOutcome::Limited(s) => {
            return Err(ApiError::RateLimited(s));
        }
    };

    let mut response = handler().await?;
    apply_rate_limit_headers(&mut response, snapshot);
    Ok(response)
}

fn apply_rate_limit_headers(resp: &mut Response<Body>, snapshot: RateLimitSnapshot) {
    if snapshot.limit == 0 {
        return;
    }
    let headers = resp.headers_mut();
    headers.insert(
        hyper::header::HeaderName::from_static("x-ratelimit-limit"),
        snapshot.limit.into(),
    );
    headers.insert(
        hyper::header::HeaderName::from_static("x-ratelimit-remaining"),
        snapshot.remaining.into(),
    );
    headers.insert(
        hyper::header::HeaderName::from_static("x-ratelimit-reset"),
        snapshot.reset_secs.into(),
    );
}

async fn dispatch(state: &Arc<AppState>, req: Request<Body>, client_ip: IpAddr) -> Result<Response<Body>, ApiError> {
    let method = req.method().clone();
    let segments: Vec<String> = req
        .uri()
        .path()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    let segs: Vec<&str> = segments.iter().map(|s| s.as_str()).collect();
    let key = presented_key(&req, &state.config.key_header).map(|s| s.to_string());
    let key = key.as_deref();

    match (&method, segs.as_slice()) {
        (&Method::GET, ["health"]) => {
            rate_limited(state, client_ip, RouteClass::Info, || routes::health::handle(state)).await
        }

        (&Method::POST, ["api", "v1", "images"]) => {
            guarded(state, key, client_ip, Permission::ReadWrite, RouteClass::Upload, || {
                routes::images::upload(state, req)
            })
            .await
        }
        (&Method::GET, ["api", "v1", "images", id, "info"]) => {
            let id = id.to_string();
            guarded(state, key, client_ip, Permission::Read, RouteClass::Info, || async move {
                routes::images::info(state, &id).await
            })
            .await
        }
        (&Method::GET, ["api", "v1", "images", id, "original"]) => {
            let id = id.to_string();
            guarded(state, key, client_ip, Permission::Read, RouteClass::Download, || async move {
                routes::images::download(state, &id, "original").await
            })
            .await
        }
        (&Method::GET, ["api", "v1", "images", id, resolution, "presigned-url"]) => {
            let (id, resolution) = (id.to_string(), resolution.to_string());
            guarded(state, key, client_ip, Permission::Read, RouteClass::Download, || async move {
                routes::images::presign(state, &id, &resolution, &req).await
            })
            .await
        }
        (&Method::GET, ["api", "v1", "images", id, resolution]) => {
            let (id, resolution) = (id.to_string(), resolution.to_string());
            guarded(state, key, client_ip, Permission::Read, RouteClass::Download, || async move {
                routes::images::download(state, &id, &resolution).await
            })
            .await
        }
        (&Method::DELETE, ["api", "v1", "images", id]) => {
            let id = id.to_string();
            guarded(state, key, client_ip, Permission::ReadWrite, RouteClass::Unlimited, || async move {
                routes::images::delete(state, &id).await
            })
            .await
        }
        (&Method::DELETE, ["api", "v1", "images", id, resolution]) => {
            let (id, resolution) = (id.to_string(), resolution.to_string());
            guarded(state, key, client_ip, Permission::ReadWrite, RouteClass::Unlimited, || async move {
                routes::images::delete_resolution(state, &id, &resolution).await
            })
            .await
        }
        (&Method::GET, ["api", "v1", "auth", "generate-key"]) => routes::auth::generate_key(state).await,
        (&Method::GET, ["api", "v1", "auth", "status"]) => routes::auth::status(state).await,

        _ => Err(ApiError::Core(CoreError::NotFound)),
    }
}

/// Router-level tests driven straight through `dispatch`/`handle_request`
/// against an `AppState` built from `resizr_model::testing`'s in-memory
/// fakes — no `hyper::Client`, no bound socket (spec.md §8's HTTP-shape
/// scenarios).
#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use resizr_model::codec::ImageCodec;
    use resizr_model::deduper::Deduper;
    use resizr_model::hash_index::HashIndex;
    use resizr_model::health::HealthProbe;
    use resizr_model::metadata_repo::MetadataRepo;
    use resizr_model::metadata_store::MetadataStore;
    use resizr_model::object_store::ObjectStore;
    use resizr_model::testing::{InMemoryMetadataStore, InMemoryObjectStore, StubImageCodec};
    use resizr_model::variant_engine::VariantEngine;
    use resizr_util::config::{ObjectStoreConfig, RateLimitConfig};

    fn test_state(auth_enabled: bool, rw_keys: Vec<String>, ro_keys: Vec<String>, rate_limit: RateLimitConfig) -> Arc<AppState> {
        let object_store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let metadata_store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());
        let metadata_repo = Arc::new(MetadataRepo::new(metadata_store.clone()));
        let hash_index = Arc::new(HashIndex::new(metadata_store.clone()));
        let codec: Arc<dyn ImageCodec> = Arc::new(StubImageCodec);

        let deduper = Deduper::new(
            object_store.clone(),
            codec.clone(),
            metadata_repo.clone(),
            hash_index.clone(),
            10 * 1024 * 1024,
        );
        let variant_engine = VariantEngine::new(
            object_store.clone(),
            codec,
            metadata_repo.clone(),
            hash_index.clone(),
            150,
            85,
        );
        let image_service = Arc::new(resizr_model::service::ImageService::new(
            object_store.clone(),
            metadata_repo,
            hash_index,
            deduper,
            variant_engine,
            150,
            8192,
            8192,
        ));

        let auth_gate = Arc::new(resizr_model::auth::AuthGate::new(auth_enabled, rw_keys.clone(), ro_keys.clone()));
        let rate_gate = Arc::new(resizr_model::rate_limit::RateGate::new(&rate_limit));
        let health_probe = Arc::new(HealthProbe::new(metadata_store, object_store));
        let config = Arc::new(Config {
            bind_addr: "0.0.0.0:3000".to_string(),
            metadata_store_url: "redis://localhost".to_string(),
            object_store: ObjectStoreConfig {
                endpoint: "http://localhost:9000".to_string(),
                region: "us-east-1".to_string(),
                bucket: "test".to_string(),
                access_key: "test".to_string(),
                secret_key: "test".to_string(),
                path_style: true,
            },
            max_file_size: 10 * 1024 * 1024,
            quality: 85,
            max_width: 8192,
            max_height: 8192,
            thumbnail_size: 150,
            rate_limit,
            auth_enabled,
            read_write_keys: rw_keys,
            read_only_keys: ro_keys,
            key_header: "X-Api-Key".to_string(),
            tls: None,
            log_format: "compact".to_string(),
            log_level: "info".to_string(),
        });

        Arc::new(AppState {
            image_service,
            auth_gate,
            rate_gate,
            health_probe,
            config,
        })
    }

    fn unlimited_rate_limit() -> RateLimitConfig {
        RateLimitConfig {
            upload_per_minute: 0,
            download_per_minute: 0,
            info_per_minute: 0,
        }
    }

    fn client_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    fn multipart_upload_request(uri: &str, filename: &str, bytes: &[u8]) -> Request<Body> {
        let boundary = "resizr-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: image/jpeg\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                hyper::header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn read_only_key_gets_forbidden_on_a_readwrite_route() {
        let ro_key = "b".repeat(64);
        let state = test_state(true, vec![], vec![ro_key.clone()], unlimited_rate_limit());
        let req = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/api/v1/images/{}", uuid::Uuid::new_v4()))
            .header(state.config.key_header.as_str(), ro_key)
            .body(Body::empty())
            .unwrap();

        let result = dispatch(&state, req, client_ip()).await;
        assert!(matches!(result, Err(ApiError::Core(CoreError::Forbidden))));
    }

    #[tokio::test]
    async fn burst_plus_one_upload_is_rate_limited_with_retry_after_header() {
        let mut rate_limit = unlimited_rate_limit();
        rate_limit.upload_per_minute = 1; // burst capacity = 2
        let state = test_state(false, vec![], vec![], rate_limit);

        for _ in 0..2 {
            let req = multipart_upload_request("/api/v1/images", "a.jpg", b"bytes-one");
            let resp = handle_request(state.clone(), req, client_ip()).await.unwrap();
            assert_eq!(resp.status(), StatusCode::CREATED);
        }

        let req = multipart_upload_request("/api/v1/images", "a.jpg", b"bytes-two");
        let resp = handle_request(state.clone(), req, client_ip()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key(hyper::header::RETRY_AFTER));
        assert!(resp.headers().contains_key("x-ratelimit-limit"));
    }

    #[tokio::test]
    async fn multipart_upload_returns_201_with_resolutions() {
        let state = test_state(false, vec![], vec![], unlimited_rate_limit());
        let req = multipart_upload_request("/api/v1/images", "cat.jpg", b"fake-bytes");

        let resp = dispatch(&state, req, client_ip()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["id"].is_string());
        assert_eq!(json["resolutions"], serde_json::json!(["thumbnail"]));
    }

    #[tokio::test]
    async fn presign_response_has_the_documented_shape() {
        let state = test_state(false, vec![], vec![], unlimited_rate_limit());
        let upload_req = multipart_upload_request("/api/v1/images", "cat.jpg", b"presign-bytes");
        let upload_resp = dispatch(&state, upload_req, client_ip()).await.unwrap();
        let upload_body = hyper::body::to_bytes(upload_resp.into_body()).await.unwrap();
        let upload_json: serde_json::Value = serde_json::from_slice(&upload_body).unwrap();
        let id = upload_json["id"].as_str().unwrap();

        let presign_req = Request::builder()
            .method(Method::GET)
            .uri(format!("/api/v1/images/{id}/original/presigned-url"))
            .body(Body::empty())
            .unwrap();
        let presign_resp = dispatch(&state, presign_req, client_ip()).await.unwrap();
        assert_eq!(presign_resp.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(presign_resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["url"].as_str().unwrap().starts_with("https://"));
        assert!(json["expires_in"].is_number());
        assert!(json["expires_at"].is_string());
    }

    #[tokio::test]
    async fn health_route_is_rate_limited_but_not_authenticated() {
        let mut rate_limit = unlimited_rate_limit();
        rate_limit.info_per_minute = 1; // burst capacity = 2
        let state = test_state(true, vec!["a".repeat(64)], vec![], rate_limit);

        for _ in 0..2 {
            let req = Request::builder().method(Method::GET).uri("/health").body(Body::empty()).unwrap();
            let resp = dispatch(&state, req, client_ip()).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let req = Request::builder().method(Method::GET).uri("/health").body(Body::empty()).unwrap();
        assert!(matches!(dispatch(&state, req, client_ip()).await, Err(ApiError::RateLimited(_))));
    }
}
