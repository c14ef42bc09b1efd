//! Error types for the Tus server

use axum::http::StatusCode;
use thiserror::Error;

/// Protocol-level result type
pub type Result<T> = std::result::Result<T, TusError>;

/// Protocol error type
///
/// Every protocol-rule violation maps to a 4xx status. Storage failures that
/// are not protocol violations surface as 500.
#[derive(Error, Debug)]
pub enum TusError {
    #[error("Tus-Resumable header must be 1.0.0")]
    PreconditionFailed,

    #[error("Upload not found: {0}")]
    NotFound(String),

    #[error("Offset does not match file: expected {expected}, got {actual}")]
    OffsetConflict { expected: u64, actual: u64 },

    #[error("Store does not support the {0} extension")]
    CapabilityUnavailable(&'static str),

    #[error("Invalid concatenation: {0}")]
    InvalidConcatenation(String),

    #[error("Cannot modify a final upload: {0}")]
    FinalUploadImmutable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Content-Type must be application/offset+octet-stream, got {0}")]
    UnsupportedMediaType(String),

    #[error("Upload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Header Upload-Checksum does not match the checksum of the file")]
    ChecksumMismatch,

    #[error("File {0} is currently being updated, try again later")]
    FileLocked(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Store(StoreError),
}

impl TusError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::OffsetConflict { .. } => StatusCode::CONFLICT,
            Self::CapabilityUnavailable(_) => StatusCode::NOT_FOUND,
            Self::InvalidConcatenation(_) => StatusCode::BAD_REQUEST,
            Self::FinalUploadImmutable(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ChecksumMismatch => checksum_mismatch_status(),
            Self::FileLocked(_) => StatusCode::CONFLICT,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Cancelled => client_closed_request_status(),
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error is a client-side protocol violation
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<StoreError> for TusError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => TusError::NotFound(id),
            StoreError::Cancelled => TusError::Cancelled,
            StoreError::LengthExceeded { length, attempted } => TusError::BadRequest(format!(
                "Request contains more data than the upload length: {attempted} > {length}"
            )),
            other => TusError::Store(other),
        }
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Upload not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Write would exceed upload length: {attempted} > {length}")]
    LengthExceeded { length: u64, attempted: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 460 Checksum Mismatch (tus checksum extension)
fn checksum_mismatch_status() -> StatusCode {
    StatusCode::from_u16(460).unwrap_or(StatusCode::BAD_REQUEST)
}

/// 499 Client Closed Request
fn client_closed_request_status() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
}
