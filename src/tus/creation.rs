//! Creation extension
//!
//! Parses the headers of a POST request and creates plain or partial uploads
//! through the matching store fragment. Expiry is left to the handler.

use axum::http::HeaderMap;
use tokio_util::sync::CancellationToken;

use super::headers::{
    header_str, parse_metadata, parse_u64_header, parse_upload_concat, UploadConcat,
    UPLOAD_CONCAT, UPLOAD_DEFER_LENGTH, UPLOAD_LENGTH, UPLOAD_METADATA,
};
use crate::error::{Result, TusError};
use crate::store::StoreCapabilities;

/// Headers relevant to creating an upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreationHeaders {
    pub upload_length: Option<u64>,
    pub defer_length: bool,
    /// Raw, validated `Upload-Metadata`
    pub metadata: Option<String>,
    pub concat: Option<UploadConcat>,
}

impl CreationHeaders {
    pub fn parse(headers: &HeaderMap) -> Result<Self> {
        let upload_length = parse_u64_header(headers, &UPLOAD_LENGTH)?;

        let defer_length = match header_str(headers, &UPLOAD_DEFER_LENGTH)? {
            None => false,
            Some("1") => true,
            Some(other) => {
                return Err(TusError::BadRequest(format!(
                    "Header Upload-Defer-Length must be 1, got {other}"
                )))
            }
        };

        let metadata = match header_str(headers, &UPLOAD_METADATA)? {
            Some(value) if !value.is_empty() => {
                parse_metadata(value)?;
                Some(value.to_string())
            }
            _ => None,
        };

        let concat = header_str(headers, &UPLOAD_CONCAT)?
            .map(parse_upload_concat)
            .transpose()?;

        Ok(Self {
            upload_length,
            defer_length,
            metadata,
            concat,
        })
    }

    pub fn is_final(&self) -> bool {
        matches!(self.concat, Some(UploadConcat::Final(_)))
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.concat, Some(UploadConcat::Partial))
    }

    /// The length a non-final upload is created with.
    ///
    /// Exactly one of `Upload-Length` and `Upload-Defer-Length` must be given,
    /// deferring needs the creation-defer-length extension.
    pub fn declared_length(&self, defer_supported: bool, max_size: Option<u64>) -> Result<Option<u64>> {
        match (self.upload_length, self.defer_length) {
            (Some(_), true) => Err(TusError::BadRequest(
                "Headers Upload-Length and Upload-Defer-Length are mutually exclusive".to_string(),
            )),
            (None, false) => Err(TusError::BadRequest(
                "Header Upload-Length or Upload-Defer-Length must be included".to_string(),
            )),
            (None, true) if !defer_supported => Err(TusError::BadRequest(
                "Header Upload-Defer-Length is not supported".to_string(),
            )),
            (None, true) => Ok(None),
            (Some(length), false) => {
                check_max_size(length, max_size)?;
                Ok(Some(length))
            }
        }
    }
}

/// Reject lengths over `Tus-Max-Size`
pub fn check_max_size(length: u64, max_size: Option<u64>) -> Result<()> {
    match max_size {
        Some(max) if length > max => Err(TusError::PayloadTooLarge { size: length, max }),
        _ => Ok(()),
    }
}

/// Create a plain or partial upload and return its id
pub async fn create_upload(
    store: &StoreCapabilities,
    headers: &CreationHeaders,
    length: Option<u64>,
    cancel: CancellationToken,
) -> Result<String> {
    let metadata = headers.metadata.clone();

    let id = if headers.is_partial() {
        let concatenation = store
            .concatenation
            .as_ref()
            .ok_or(TusError::CapabilityUnavailable("concatenation"))?;
        concatenation
            .create_partial_file(length, metadata, cancel)
            .await?
    } else {
        let creation = store
            .creation
            .as_ref()
            .ok_or(TusError::CapabilityUnavailable("creation"))?;
        creation.create_file(length, metadata, cancel).await?
    };

    Ok(id)
}
