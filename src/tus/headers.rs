//! Tus header names and value parsers

use std::collections::HashMap;

use axum::http::{header, HeaderMap, HeaderName};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::TusError;
use crate::store::ChecksumAlgorithm;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version spoken by this server
pub const TUS_VERSION: &str = "1.0.0";

/// Required `Content-Type` of PATCH requests
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

pub const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub const TUS_VERSION_HEADER: HeaderName = HeaderName::from_static("tus-version");
pub const TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
pub const TUS_MAX_SIZE: HeaderName = HeaderName::from_static("tus-max-size");
pub const TUS_CHECKSUM_ALGORITHM: HeaderName = HeaderName::from_static("tus-checksum-algorithm");
pub const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");
pub const UPLOAD_LENGTH: HeaderName = HeaderName::from_static("upload-length");
pub const UPLOAD_DEFER_LENGTH: HeaderName = HeaderName::from_static("upload-defer-length");
pub const UPLOAD_METADATA: HeaderName = HeaderName::from_static("upload-metadata");
pub const UPLOAD_CONCAT: HeaderName = HeaderName::from_static("upload-concat");
pub const UPLOAD_EXPIRES: HeaderName = HeaderName::from_static("upload-expires");
pub const UPLOAD_CHECKSUM: HeaderName = HeaderName::from_static("upload-checksum");
pub const X_HTTP_METHOD_OVERRIDE: HeaderName = HeaderName::from_static("x-http-method-override");

/// Every tus header a browser client needs to read
pub const EXPOSED_HEADERS: [HeaderName; 12] = [
    header::LOCATION,
    TUS_RESUMABLE,
    TUS_VERSION_HEADER,
    TUS_EXTENSION,
    TUS_MAX_SIZE,
    TUS_CHECKSUM_ALGORITHM,
    UPLOAD_OFFSET,
    UPLOAD_LENGTH,
    UPLOAD_DEFER_LENGTH,
    UPLOAD_METADATA,
    UPLOAD_CONCAT,
    UPLOAD_EXPIRES,
];

// ============================================================================
// Generic Helpers
// ============================================================================

/// Header value as trimmed text, `None` when absent
pub fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Result<Option<&'a str>, TusError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| TusError::BadRequest(format!("Header {name} is not valid text")))
        })
        .transpose()
}

/// Non-negative integer header
pub fn parse_u64_header(headers: &HeaderMap, name: &HeaderName) -> Result<Option<u64>, TusError> {
    header_str(headers, name)?
        .map(|value| {
            value.parse::<u64>().map_err(|_| {
                TusError::BadRequest(format!("Header {name} must be a non-negative integer"))
            })
        })
        .transpose()
}

// ============================================================================
// Upload-Concat
// ============================================================================

/// Parsed `Upload-Concat` request header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadConcat {
    Partial,
    /// Referenced upload URLs in declared order
    Final(Vec<String>),
}

pub fn parse_upload_concat(value: &str) -> Result<UploadConcat, TusError> {
    let value = value.trim();
    if value == "partial" {
        return Ok(UploadConcat::Partial);
    }

    let Some(urls) = value.strip_prefix("final;") else {
        return Err(TusError::BadRequest(format!(
            "Header Upload-Concat: unknown value {value}"
        )));
    };

    let urls: Vec<String> = urls.split_whitespace().map(str::to_string).collect();
    if urls.is_empty() {
        return Err(TusError::InvalidConcatenation(
            "final upload must reference at least one partial upload".to_string(),
        ));
    }

    Ok(UploadConcat::Final(urls))
}

/// Extract the upload id from a URL under `url_path`.
///
/// Accepts path-only (`/files/abc`) and absolute (`https://host/files/abc`) forms.
pub fn resolve_file_id(url: &str, url_path: &str) -> Option<String> {
    let path = match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            &rest[rest.find('/')?..]
        }
        None => url,
    };

    let id = path
        .strip_prefix(url_path.trim_end_matches('/'))?
        .strip_prefix('/')?
        .trim_end_matches('/');

    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id.to_string())
}

// ============================================================================
// Upload-Metadata
// ============================================================================

/// Validate an `Upload-Metadata` value and decode its pairs.
///
/// Format: comma-separated `key base64value` pairs, the value may be omitted.
/// Keys must be non-empty, unique and free of spaces and commas.
pub fn parse_metadata(value: &str) -> Result<HashMap<String, Option<Vec<u8>>>, TusError> {
    let mut pairs = HashMap::new();
    if value.trim().is_empty() {
        return Ok(pairs);
    }

    for pair in value.split(',') {
        let mut parts = pair.trim().split(' ');
        let key = parts.next().unwrap_or_default();
        if key.is_empty() {
            return Err(TusError::BadRequest(
                "Header Upload-Metadata: keys must not be empty".to_string(),
            ));
        }

        let decoded = match parts.next() {
            Some(encoded) => Some(STANDARD.decode(encoded).map_err(|_| {
                TusError::BadRequest(format!(
                    "Header Upload-Metadata: value for {key} is not properly base64 encoded"
                ))
            })?),
            None => None,
        };

        if parts.next().is_some() {
            return Err(TusError::BadRequest(format!(
                "Header Upload-Metadata: the entry for {key} contains more than one space"
            )));
        }

        if pairs.insert(key.to_string(), decoded).is_some() {
            return Err(TusError::BadRequest(format!(
                "Header Upload-Metadata: duplicate key {key}"
            )));
        }
    }

    Ok(pairs)
}

// ============================================================================
// Upload-Checksum
// ============================================================================

/// Parse `Upload-Checksum: <algorithm> <base64 digest>`
pub fn parse_checksum(value: &str) -> Result<(ChecksumAlgorithm, Vec<u8>), TusError> {
    let (algorithm, digest) = value.trim().split_once(' ').ok_or_else(|| {
        TusError::BadRequest("Header Upload-Checksum must be '<algorithm> <digest>'".to_string())
    })?;

    let algorithm = algorithm
        .parse::<ChecksumAlgorithm>()
        .map_err(TusError::BadRequest)?;
    let digest = STANDARD
        .decode(digest.trim())
        .map_err(|_| TusError::BadRequest("Header Upload-Checksum digest is not base64".to_string()))?;

    Ok((algorithm, digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_u64_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_u64_header(&headers, &UPLOAD_OFFSET).unwrap(), None);

        headers.insert(UPLOAD_OFFSET, HeaderValue::from_static("42"));
        assert_eq!(parse_u64_header(&headers, &UPLOAD_OFFSET).unwrap(), Some(42));

        headers.insert(UPLOAD_OFFSET, HeaderValue::from_static("-1"));
        assert!(parse_u64_header(&headers, &UPLOAD_OFFSET).is_err());

        headers.insert(UPLOAD_OFFSET, HeaderValue::from_static("ten"));
        assert!(parse_u64_header(&headers, &UPLOAD_OFFSET).is_err());
    }

    #[test]
    fn test_parse_upload_concat() {
        assert_eq!(parse_upload_concat("partial").unwrap(), UploadConcat::Partial);
        assert_eq!(
            parse_upload_concat("final;/files/a https://example.com/files/b").unwrap(),
            UploadConcat::Final(vec![
                "/files/a".to_string(),
                "https://example.com/files/b".to_string()
            ])
        );
        assert!(parse_upload_concat("final;").is_err());
        assert!(parse_upload_concat("complete").is_err());
    }

    #[test]
    fn test_resolve_file_id() {
        assert_eq!(resolve_file_id("/files/abc", "/files"), Some("abc".to_string()));
        assert_eq!(resolve_file_id("/files/abc", "/files/"), Some("abc".to_string()));
        assert_eq!(
            resolve_file_id("http://localhost:3000/files/abc", "/files"),
            Some("abc".to_string())
        );
        assert_eq!(resolve_file_id("/other/abc", "/files"), None);
        assert_eq!(resolve_file_id("/files/", "/files"), None);
        assert_eq!(resolve_file_id("/files/a/b", "/files"), None);
        assert_eq!(resolve_file_id("https://example.com", "/files"), None);
    }

    #[test]
    fn test_parse_metadata() {
        let pairs = parse_metadata("filename d29ybGRfZG9taW5hdGlvbl9wbGFuLnBkZg==,is_confidential")
            .unwrap();
        assert_eq!(
            pairs.get("filename").cloned().flatten(),
            Some(b"world_domination_plan.pdf".to_vec())
        );
        assert_eq!(pairs.get("is_confidential"), Some(&None));

        assert!(parse_metadata("").unwrap().is_empty());
        assert!(parse_metadata("filename not*base64").is_err());
        assert!(parse_metadata("a YQ==,a Yg==").is_err());
        assert!(parse_metadata(",a YQ==").is_err());
        assert!(parse_metadata("a YQ== extra").is_err());
    }

    #[test]
    fn test_parse_checksum() {
        let (algorithm, digest) = parse_checksum("sha1 Kq5sNclPz7QV2+lfQIuc6R7oRu0=").unwrap();
        assert_eq!(algorithm, ChecksumAlgorithm::Sha1);
        assert_eq!(digest.len(), 20);

        assert!(parse_checksum("sha1").is_err());
        assert!(parse_checksum("md5 AAAA").is_err());
        assert!(parse_checksum("sha1 ***").is_err());
    }
}
