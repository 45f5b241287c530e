//! The HTTP boundary's error type (spec.md §7): wraps the engine's
//! [`resizr_util::Error`] plus the handful of transport-level failures that
//! can occur before a handler ever sees a typed request, and owns the
//! single mapping from kind to status code.

use err_derive::Error;
use hyper::StatusCode;
use resizr_model::rate_limit::RateLimitSnapshot;
use serde::Serialize;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(display = "{}", _0)]
    Core(#[error(source)] resizr_util::Error),

    /// A rate-limit rejection, carrying the bucket snapshot so the HTTP
    /// layer can attach `X-RateLimit-*` and `Retry-After` (spec.md §4.7).
    #[error(display = "Rate limited")]
    RateLimited(RateLimitSnapshot),

    #[error(display = "Internal error (Hyper): {}", _0)]
    Hyper(#[error(source)] hyper::Error),

    #[error(display = "Internal error (HTTP): {}", _0)]
    Http(#[error(source)] http::Error),

    #[error(display = "Internal error (JSON): {}", _0)]
    Json(#[error(source)] serde_json::Error),

    #[error(display = "Malformed multipart body: {}", _0)]
    Multipart(String),

    #[error(display = "Bad request: {}", _0)]
    BadRequest(String),
}

impl ApiError {
    pub fn http_status_code(&self) -> StatusCode {
        match self {
            ApiError::Core(e) => match e {
                resizr_util::Error::Validation(_) => StatusCode::BAD_REQUEST,
                resizr_util::Error::Unauthorized => StatusCode::UNAUTHORIZED,
                resizr_util::Error::Forbidden => StatusCode::FORBIDDEN,
                resizr_util::Error::NotFound => StatusCode::NOT_FOUND,
                resizr_util::Error::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                resizr_util::Error::Processing(_) => StatusCode::UNPROCESSABLE_ENTITY,
                resizr_util::Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                resizr_util::Error::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
                resizr_util::Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Multipart(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Hyper(_) | ApiError::Http(_) | ApiError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The `error` field of the envelope: the engine's machine-readable kind
    /// where one exists, else a transport-level kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Core(e) => e.kind(),
            ApiError::RateLimited(_) => "rate_limited",
            ApiError::Multipart(_) | ApiError::BadRequest(_) => "validation_error",
            ApiError::Hyper(_) | ApiError::Http(_) | ApiError::Json(_) => "internal_error",
        }
    }

    /// §7 propagation policy: `warn` for 4xx (except `Internal`, which is
    /// `error`), `error` for 5xx.
    pub fn is_server_error(&self) -> bool {
        match self {
            ApiError::Core(e) => e.is_server_error(),
            ApiError::RateLimited(_) | ApiError::Multipart(_) | ApiError::BadRequest(_) => false,
            ApiError::Hyper(_) | ApiError::Http(_) | ApiError::Json(_) => true,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorEnvelope {
    pub error: &'static str,
    pub message: String,
    pub code: u16,
}

impl From<&ApiError> for ErrorEnvelope {
    fn from(e: &ApiError) -> Self {
        ErrorEnvelope {
            error: e.kind(),
            message: e.to_string(),
            code: e.http_status_code().as_u16(),
        }
    }
}

/// Maps a foreign `Result`/`Option` to `ApiError::BadRequest`, mirroring
/// [`resizr_util::error::OkOrBadRequest`] for transport-layer values
/// (headers, query strings) that never pass through the engine.
pub trait OkOrBadRequest {
    type S2;
    fn ok_or_bad_request(self, reason: &'static str) -> Self::S2;
}

impl<T, E> OkOrBadRequest for Result<T, E>
where
    E: std::fmt::Display,
{
    type S2 = Result<T, ApiError>;
    fn ok_or_bad_request(self, reason: &'static str) -> Result<T, ApiError> {
        match self {
            Ok(x) => Ok(x),
            Err(e) => Err(ApiError::BadRequest(format!("{}: {}", reason, e))),
        }
    }
}

impl<T> OkOrBadRequest for Option<T> {
    type S2 = Result<T, ApiError>;
    fn ok_or_bad_request(self, reason: &'static str) -> Result<T, ApiError> {
        match self {
            Some(x) => Ok(x),
            None => Err(ApiError::BadRequest(reason.to_string())),
        }
    }
}
