//! Transport-neutral request and response types for the protocol handler

use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::headers::{TUS_RESUMABLE, TUS_VERSION, X_HTTP_METHOD_OVERRIDE};
use crate::error::TusError;
use crate::store::ByteStream;

// ============================================================================
// Request
// ============================================================================

/// One incoming tus request
pub struct TusRequest {
    /// Effective method, after override normalization
    pub method: Method,
    /// Target upload, `None` for the collection URL
    pub file_id: Option<String>,
    pub headers: HeaderMap,
    pub body: ByteStream,
    pub cancel: CancellationToken,
}

impl TusRequest {
    pub fn new(method: Method, file_id: Option<String>, headers: HeaderMap) -> Self {
        Self {
            method,
            file_id,
            headers,
            body: stream::empty().boxed(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_body(mut self, body: ByteStream) -> Self {
        self.body = body;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Resolve `X-HTTP-Method-Override` tunnelling.
///
/// Only a POST may carry an override; any other method is taken as sent.
pub fn effective_method(method: &Method, headers: &HeaderMap) -> Method {
    if *method != Method::POST {
        return method.clone();
    }

    headers
        .get(X_HTTP_METHOD_OVERRIDE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Method::from_bytes(value.trim().to_ascii_uppercase().as_bytes()).ok())
        .unwrap_or_else(|| method.clone())
}

// ============================================================================
// Response
// ============================================================================

/// Status, headers and an optional plain-text body
#[derive(Debug, Clone)]
pub struct TusResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl TusResponse {
    /// Response carrying `Tus-Resumable`
    pub fn new(status: StatusCode) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
        Self {
            status,
            headers,
            body: None,
        }
    }

    /// Add a header; values that are not valid header text are skipped.
    pub fn with_header(mut self, name: axum::http::HeaderName, value: impl AsRef<str>) -> Self {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => {
                tracing::warn!(header = %name, "Dropping invalid response header value");
            }
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn from_error(err: &TusError) -> Self {
        let mut response = Self::new(err.status_code());
        if matches!(err, TusError::PreconditionFailed) {
            response = response.with_header(super::headers::TUS_VERSION_HEADER, TUS_VERSION);
        }
        response.body = Some(err.to_string());
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_override_on_post() {
        let mut headers = HeaderMap::new();
        headers.insert(X_HTTP_METHOD_OVERRIDE, HeaderValue::from_static("patch"));
        assert_eq!(effective_method(&Method::POST, &headers), Method::PATCH);
    }

    #[test]
    fn test_method_override_ignored_on_other_methods() {
        let mut headers = HeaderMap::new();
        headers.insert(X_HTTP_METHOD_OVERRIDE, HeaderValue::from_static("DELETE"));
        assert_eq!(effective_method(&Method::HEAD, &headers), Method::HEAD);
        assert_eq!(effective_method(&Method::POST, &HeaderMap::new()), Method::POST);
    }

    #[test]
    fn test_error_response() {
        let response = TusResponse::from_error(&TusError::PreconditionFailed);
        assert_eq!(response.status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(response.header("tus-version"), Some("1.0.0"));
        assert_eq!(response.header("tus-resumable"), Some("1.0.0"));
        assert!(response.body.is_some());
    }
}
