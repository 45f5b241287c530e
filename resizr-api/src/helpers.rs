//! Request-body parsing: multipart uploads and query strings. Hyper gives
//! handlers raw bytes and headers; everything structured is parsed here so
//! the route handlers read like the orchestration they are.

use bytes::Bytes;
use hyper::{Body, Request};

use crate::error::ApiError;

pub struct ParsedUpload {
    pub filename: String,
    pub bytes: Bytes,
    pub resolutions: Vec<String>,
}

/// Parses a `multipart/form-data` upload body: the `image` file field plus
/// zero or more `resolutions` fields (each itself optionally CSV, per
/// spec.md §6 "multipart: `image` (file), `resolutions` (CSV or repeated)").
pub async fn parse_upload_multipart(req: Request<Body>) -> Result<ParsedUpload, ApiError> {
    let content_type = req
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Multipart("missing Content-Type".to_string()))?;
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| ApiError::Multipart(format!("invalid multipart boundary: {}", e)))?;

    let mut multipart = multer::Multipart::new(req.into_body(), boundary);

    let mut filename: Option<String> = None;
    let mut bytes: Option<Bytes> = None;
    let mut resolutions = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        match field.name() {
            Some("image") => {
                filename = field.file_name().map(|s| s.to_string());
                bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::Multipart(e.to_string()))?,
                );
            }
            Some("resolutions") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Multipart(e.to_string()))?;
                resolutions.extend(
                    text.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty()),
                );
            }
            _ => {}
        }
    }

    let bytes = bytes.ok_or_else(|| ApiError::BadRequest("missing `image` field".to_string()))?;
    let filename = filename.unwrap_or_else(|| "upload".to_string());

    Ok(ParsedUpload {
        filename,
        bytes,
        resolutions,
    })
}

/// Looks up a single query parameter by name, percent-decoding `+` and
/// `%XX` escapes. Minimal by design: every caller in this crate only ever
/// needs one scalar value (`expires_in`, `offset`, `limit`).
pub fn query_param(req: &Request<Body>, name: &str) -> Option<String> {
    let query = req.uri().query()?;
    for pair in query.split('&') {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if k == name {
            return Some(percent_decode(v));
        }
    }
    None
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(
                    std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""),
                    16,
                ) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_and_plus() {
        assert_eq!(percent_decode("a%20b+c"), "a b c");
    }
}
