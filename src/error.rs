//! Crate-wide error aliases and the typed error returned by the Witan API.
//!
//! Everything that can go wrong is an `anyhow::Error`. When the failure came from the remote
//! service, the error carries an [`ApiError`], and [`ApiError::kind`] is the only place that
//! turns a status code and error code into a [`FailureKind`]. Callers ask questions like
//! [`is_not_found`] or [`is_stale_identity`] instead of looking at raw status codes.

use serde::Deserialize;
use std::fmt::{Display, Formatter};

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

const FILENAME_MISMATCH: &str = "filename_mismatch";
const CONTENT_TYPE_MISMATCH: &str = "content_type_mismatch";

/// The closed set of ways a terminal (post-retry) API response can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP 404: the referenced file or revision does not exist (anymore).
    NotFound,
    /// The upload is incompatible with the existing remote file (filename or content type).
    Mismatch,
    /// HTTP 429.
    RateLimited,
    /// HTTP 401 or 403.
    Unauthorized,
    /// Any 5xx.
    Server,
    /// Any other non-success status.
    Client,
}

impl FailureKind {
    /// True when a remembered remote file id can no longer be used for a revision upload, and a
    /// fresh upload is the right recovery.
    pub fn is_stale_identity(self) -> bool {
        matches!(self, FailureKind::NotFound | FailureKind::Mismatch)
    }
}

/// A non-success response from the Witan API, after retries were exhausted or skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct ApiError {
    status: u16,
    code: Option<String>,
    message: String,
    retry_after: Option<String>,
}

/// The error envelope: `{ "error": { "code": "...", "message": "..." } }`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl ApiError {
    /// Translates a raw non-success response into an `ApiError`. When the body is not the
    /// standard error envelope, the raw body becomes the message.
    pub(crate) fn from_response(status: u16, body: &[u8], retry_after: Option<&str>) -> Self {
        let retry_after = retry_after
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        match serde_json::from_slice::<ErrorEnvelope>(body) {
            Ok(envelope) if !envelope.error.message.is_empty() => Self {
                status,
                code: Some(envelope.error.code).filter(|c| !c.is_empty()),
                message: envelope.error.message,
                retry_after,
            },
            _ => Self {
                status,
                code: None,
                message: String::from_utf8_lossy(body).trim().to_string(),
                retry_after,
            },
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retry_after(&self) -> Option<&str> {
        self.retry_after.as_deref()
    }

    /// Classifies this error. This is the single translation from status/code to meaning.
    pub fn kind(&self) -> FailureKind {
        match (self.status, self.code()) {
            (404, _) => FailureKind::NotFound,
            (_, Some(FILENAME_MISMATCH | CONTENT_TYPE_MISMATCH)) => FailureKind::Mismatch,
            (429, _) => FailureKind::RateLimited,
            (401 | 403, _) => FailureKind::Unauthorized,
            (500..=599, _) => FailureKind::Server,
            _ => FailureKind::Client,
        }
    }

    /// Known error codes that deserve a friendlier message than the generic format.
    fn friendly_message(&self) -> Option<String> {
        if self.kind() == FailureKind::RateLimited {
            return Some(match self.retry_after() {
                Some(after) => format!("rate limited by API; retry after {after}"),
                None => "rate limited by API; retry in a moment".to_string(),
            });
        }
        match self.code()? {
            "spawn_failed" => {
                Some("file is not a valid Excel file (.xlsx, .xls, or .xlsm)".to_string())
            }
            "invalid_mime_type" => {
                Some("unsupported file type, expected .xlsx, .xls, or .xlsm".to_string())
            }
            // These messages are already human-readable, e.g. "Sheet 'Foo' not found".
            "NOT_FOUND" | "SHEET_NOT_FOUND" | "INVALID_ARG" | "ADDRESS_PARSE_ERROR" => {
                Some(self.message.clone())
            }
            _ => None,
        }
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(friendly) = self.friendly_message() {
            return f.write_str(&friendly);
        }
        match self.code() {
            Some(code) => write!(f, "API error {}: {code}: {}", self.status, self.message),
            None => write!(f, "API error {}: {}", self.status, self.message),
        }
    }
}

/// Returns the classification of `err` if it carries an [`ApiError`].
pub fn failure_kind(err: &Error) -> Option<FailureKind> {
    err.downcast_ref::<ApiError>().map(ApiError::kind)
}

/// True when `err` is a 404 from the API. Used to trigger a re-upload after an operation against
/// a cached file id fails.
pub fn is_not_found(err: &Error) -> bool {
    failure_kind(err) == Some(FailureKind::NotFound)
}

/// True when `err` proves that a remembered remote file id is gone or incompatible.
pub fn is_stale_identity(err: &Error) -> bool {
    failure_kind(err).is_some_and(FailureKind::is_stale_identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_parse_error_envelope() {
        let body = br#"{"error":{"code":"NOT_FOUND","message":"missing revision"}}"#;
        let e = ApiError::from_response(404, body, None);
        assert_eq!(e.status(), 404);
        assert_eq!(e.code(), Some("NOT_FOUND"));
        assert_eq!(e.message(), "missing revision");
        assert_eq!(e.kind(), FailureKind::NotFound);
        assert_eq!(e.to_string(), "missing revision");
    }

    #[test]
    fn test_raw_body_becomes_message() {
        let e = ApiError::from_response(502, b"bad gateway\n", None);
        assert_eq!(e.code(), None);
        assert_eq!(e.message(), "bad gateway");
        assert_eq!(e.kind(), FailureKind::Server);
        assert_eq!(e.to_string(), "API error 502: bad gateway");
    }

    #[test]
    fn test_envelope_without_message_is_raw() {
        let body = br#"{"error":{"code":"x","message":""}}"#;
        let e = ApiError::from_response(400, body, None);
        assert_eq!(e.code(), None);
        assert_eq!(e.message(), r#"{"error":{"code":"x","message":""}}"#);
    }

    #[test]
    fn test_generic_message_with_code() {
        let body = br#"{"error":{"code":"quota_exceeded","message":"too many files"}}"#;
        let e = ApiError::from_response(400, body, None);
        assert_eq!(e.to_string(), "API error 400: quota_exceeded: too many files");
        assert_eq!(e.kind(), FailureKind::Client);
    }

    #[test]
    fn test_rate_limited_message() {
        let e = ApiError::from_response(429, b"slow down", Some("7"));
        assert_eq!(e.kind(), FailureKind::RateLimited);
        assert_eq!(e.to_string(), "rate limited by API; retry after 7");
        let e = ApiError::from_response(429, b"slow down", Some("  "));
        assert_eq!(e.to_string(), "rate limited by API; retry in a moment");
    }

    #[test]
    fn test_friendly_codes() {
        let body = br#"{"error":{"code":"spawn_failed","message":"worker crashed"}}"#;
        let e = ApiError::from_response(422, body, None);
        assert_eq!(
            e.to_string(),
            "file is not a valid Excel file (.xlsx, .xls, or .xlsm)"
        );
    }

    #[test]
    fn test_classification() {
        let mismatch = |code: &str| {
            let body = format!(r#"{{"error":{{"code":"{code}","message":"m"}}}}"#);
            ApiError::from_response(409, body.as_bytes(), None).kind()
        };
        assert_eq!(mismatch("filename_mismatch"), FailureKind::Mismatch);
        assert_eq!(mismatch("content_type_mismatch"), FailureKind::Mismatch);
        assert_eq!(mismatch("conflict"), FailureKind::Client);
        assert_eq!(
            ApiError::from_response(401, b"no", None).kind(),
            FailureKind::Unauthorized
        );
        assert_eq!(
            ApiError::from_response(403, b"no", None).kind(),
            FailureKind::Unauthorized
        );
        assert_eq!(
            ApiError::from_response(503, b"busy", None).kind(),
            FailureKind::Server
        );
    }

    #[test]
    fn test_predicates_see_through_context() {
        let err: Error = Error::new(ApiError::from_response(404, b"gone", None));
        let err = Err::<(), _>(err).context("calc failed").unwrap_err();
        assert!(is_not_found(&err));
        assert!(is_stale_identity(&err));

        let auth: Error = ApiError::from_response(401, b"no", None).into();
        assert!(!is_not_found(&auth));
        assert!(!is_stale_identity(&auth));

        let other = anyhow::anyhow!("disk full");
        assert_eq!(failure_kind(&other), None);
        assert!(!is_stale_identity(&other));
    }
}
