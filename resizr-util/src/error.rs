//! The error taxonomy of §7: a single tagged-variant sum type that every
//! component returns, and the extension traits ([`OkOrBadRequest`],
//! [`OkOrInternalError`]) used throughout to attach a kind to a foreign
//! error or a missing `Option`.

use err_derive::Error;

/// Errors produced by the core engine (dedup, metadata coordination,
/// variant derivation, auth, rate limiting). The HTTP boundary
/// (`resizr-api::error::ApiError`) owns the single mapping from these kinds
/// to status codes; nothing downstream of this type re-derives that mapping.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Malformed input: bad UUID, bad resolution grammar, unsupported mime,
    /// bad `expires_in`, bad multipart body.
    #[error(display = "Validation error: {}", _0)]
    Validation(String),

    /// Missing or unrecognized API key.
    #[error(display = "Unauthorized")]
    Unauthorized,

    /// Recognized key, insufficient permission tier.
    #[error(display = "Forbidden")]
    Forbidden,

    /// Unknown image id, or an unrendered resolution that also fails to
    /// resolve as an alias.
    #[error(display = "Not found")]
    NotFound,

    /// Upload body exceeds `max_file_size`.
    #[error(display = "Payload too large")]
    TooLarge,

    /// Decode/resize/encode failure, or bytes that are not a supported
    /// image format.
    #[error(display = "Processing error: {}", _0)]
    Processing(String),

    /// Token bucket for this `(client, route class)` is empty.
    #[error(display = "Rate limited")]
    RateLimited,

    /// The object store (or metadata store) is unreachable or returned an
    /// unexpected error.
    #[error(display = "Storage error: {}", _0)]
    Storage(String),

    /// Anything else; also the catch-all for bugs (CAS retries exhausted,
    /// invariants that should not be violated).
    #[error(display = "Internal error: {}", _0)]
    Internal(String),
}

impl Error {
    /// Short machine-readable kind name, used as the `error` field of the
    /// HTTP error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Unauthorized => "unauthorized",
            Error::Forbidden => "forbidden",
            Error::NotFound => "not_found",
            Error::TooLarge => "too_large",
            Error::Processing(_) => "processing_error",
            Error::RateLimited => "rate_limited",
            Error::Storage(_) => "storage_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// `true` for errors that belong in `error` log level rather than `warn`
    /// (§7: "`error` for 5xx ... except `Internal` at `error`" among 4xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Internal(_))
    }
}

/// Maps a foreign `Result` to `Error::Validation`, attaching a static
/// reason. Mirrors the teacher's `OkOrBadRequest` helper.
pub trait OkOrBadRequest {
    type S2;
    fn ok_or_bad_request(self, reason: &'static str) -> Self::S2;
}

impl<T, E> OkOrBadRequest for Result<T, E>
where
    E: std::fmt::Display,
{
    type S2 = Result<T, Error>;
    fn ok_or_bad_request(self, reason: &'static str) -> Result<T, Error> {
        match self {
            Ok(x) => Ok(x),
            Err(e) => Err(Error::Validation(format!("{}: {}", reason, e))),
        }
    }
}

impl<T> OkOrBadRequest for Option<T> {
    type S2 = Result<T, Error>;
    fn ok_or_bad_request(self, reason: &'static str) -> Result<T, Error> {
        match self {
            Some(x) => Ok(x),
            None => Err(Error::Validation(reason.to_string())),
        }
    }
}

/// Maps a foreign `Result`/`Option` to `Error::Internal`, for invariants
/// that should never be violated in practice.
pub trait OkOrInternalError {
    type S2;
    fn ok_or_internal_error(self, reason: &'static str) -> Self::S2;
}

impl<T, E> OkOrInternalError for Result<T, E>
where
    E: std::fmt::Display,
{
    type S2 = Result<T, Error>;
    fn ok_or_internal_error(self, reason: &'static str) -> Result<T, Error> {
        match self {
            Ok(x) => Ok(x),
            Err(e) => Err(Error::Internal(format!("{}: {}", reason, e))),
        }
    }
}

impl<T> OkOrInternalError for Option<T> {
    type S2 = Result<T, Error>;
    fn ok_or_internal_error(self, reason: &'static str) -> Result<T, Error> {
        match self {
            Some(x) => Ok(x),
            None => Err(Error::Internal(reason.to_string())),
        }
    }
}
