//! Request-ID propagation, CORS, and the security headers spec.md §6 treats
//! as "configuration-driven boilerplate".

use hyper::header::{HeaderName, HeaderValue};
use hyper::{Body, Method, Request, Response, StatusCode};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Reads `X-Request-ID` off the request, generating a v4 UUID if absent.
pub fn request_id(req: &Request<Body>) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn echo_request_id(resp: &mut Response<Body>, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        resp.headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }
}

/// Standard permissive CORS: every response carries these, and a bare
/// `OPTIONS` preflight gets a 204 with nothing else attached.
pub fn apply_cors_headers(resp: &mut Response<Body>) {
    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("content-type, x-api-key, x-request-id"),
    );
    headers.insert(
        HeaderName::from_static("access-control-expose-headers"),
        HeaderValue::from_static("x-request-id, x-ratelimit-limit, x-ratelimit-remaining, x-ratelimit-reset, etag"),
    );
}

pub fn preflight_response(req: &Request<Body>) -> Option<Response<Body>> {
    if req.method() != Method::OPTIONS {
        return None;
    }
    let mut resp = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .expect("building a preflight response cannot fail");
    apply_cors_headers(&mut resp);
    Some(resp)
}

/// Extra headers applied only when `production` is set in configuration.
pub fn apply_security_headers(resp: &mut Response<Body>, production: bool) {
    if !production {
        return;
    }
    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("strict-transport-security"),
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static("default-src 'none'"),
    );
}
