//! Tus protocol handler
//!
//! Routes a request by method, validates protocol preconditions, drives the
//! store and extension modules and renders the response headers.
//!
//! Per request: received → validated (`Tus-Resumable`) → routed → executed →
//! responded. Nothing is retried; clients resume with a new PATCH.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::{header, HeaderMap, Method, StatusCode};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::concatenation;
use super::creation::{self, check_max_size, CreationHeaders};
use super::expiration::{is_expired, AppendExpiry, ExpirationPolicy};
use super::headers::{
    header_str, parse_checksum, parse_u64_header, UploadConcat, OFFSET_OCTET_STREAM,
    TUS_CHECKSUM_ALGORITHM, TUS_EXTENSION, TUS_MAX_SIZE, TUS_RESUMABLE, TUS_VERSION,
    TUS_VERSION_HEADER, UPLOAD_CHECKSUM, UPLOAD_CONCAT, UPLOAD_DEFER_LENGTH, UPLOAD_EXPIRES,
    UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET,
};
use super::http_date::format_http_date;
use super::lock::{FileLock, FileLockProvider};
use super::request::{TusRequest, TusResponse};
use crate::clock::{Clock, SystemClock};
use crate::config::TusConfig;
use crate::error::{Result, StoreError, TusError};
use crate::store::{ByteStream, ChecksumAlgorithm, StoreCapabilities};

// ============================================================================
// Handler
// ============================================================================

/// Stateless protocol engine shared by all requests
pub struct TusHandler {
    config: TusConfig,
    store: StoreCapabilities,
    locks: Option<Arc<dyn FileLockProvider>>,
    clock: Arc<dyn Clock>,
}

impl TusHandler {
    pub fn new(config: TusConfig, store: StoreCapabilities) -> Self {
        Self {
            config,
            store,
            locks: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_locks(mut self, locks: Arc<dyn FileLockProvider>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TusConfig {
        &self.config
    }

    pub fn store(&self) -> &StoreCapabilities {
        &self.store
    }

    fn policy(&self) -> ExpirationPolicy {
        self.config.expiration
    }

    /// Handle one request; errors become error responses
    pub async fn handle(&self, request: TusRequest) -> TusResponse {
        let method = request.method.clone();
        let file_id = request.file_id.clone();

        match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => {
                if err.is_client_error() {
                    tracing::warn!(
                        method = %method,
                        file_id = ?file_id,
                        status = err.status_code().as_u16(),
                        error = %err,
                        "Tus request rejected"
                    );
                } else {
                    tracing::error!(
                        method = %method,
                        file_id = ?file_id,
                        error = %err,
                        "Tus request failed"
                    );
                }
                TusResponse::from_error(&err)
            }
        }
    }

    async fn dispatch(&self, request: TusRequest) -> Result<TusResponse> {
        if request.method == Method::OPTIONS {
            return Ok(self.options());
        }

        validate_tus_resumable(&request.headers)?;

        let method = request.method.clone();
        match (&method, request.file_id.clone()) {
            (&Method::POST, None) => self.post(request).await,
            (&Method::HEAD, Some(file_id)) => self.head(&file_id).await,
            (&Method::PATCH, Some(file_id)) => self.patch(&file_id, request).await,
            (&Method::DELETE, Some(file_id)) => self.delete(&file_id, request.cancel).await,
            (method, _) => Err(TusError::MethodNotAllowed(method.to_string())),
        }
    }

    // ========================================================================
    // OPTIONS
    // ========================================================================

    fn options(&self) -> TusResponse {
        let mut response =
            TusResponse::new(StatusCode::NO_CONTENT).with_header(TUS_VERSION_HEADER, TUS_VERSION);

        let extensions = self.store.extensions();
        if !extensions.is_empty() {
            response = response.with_header(TUS_EXTENSION, extensions.join(","));
        }

        if let Some(max_size) = self.config.max_size {
            response = response.with_header(TUS_MAX_SIZE, max_size.to_string());
        }

        if let Some(checksum) = &self.store.checksum {
            let algorithms: Vec<&str> = checksum
                .supported_algorithms()
                .iter()
                .map(ChecksumAlgorithm::as_str)
                .collect();
            response = response.with_header(TUS_CHECKSUM_ALGORITHM, algorithms.join(","));
        }

        response
    }

    // ========================================================================
    // POST
    // ========================================================================

    async fn post(&self, request: TusRequest) -> Result<TusResponse> {
        let headers = CreationHeaders::parse(&request.headers)?;

        if let Some(UploadConcat::Final(urls)) = &headers.concat {
            return self.create_final(urls, &headers, request.cancel).await;
        }

        // Fail on a missing fragment before looking at lengths
        if headers.is_partial() && self.store.concatenation.is_none() {
            return Err(TusError::CapabilityUnavailable("concatenation"));
        }
        if !headers.is_partial() && self.store.creation.is_none() {
            return Err(TusError::CapabilityUnavailable("creation"));
        }

        let length =
            headers.declared_length(self.store.defer_length.is_some(), self.config.max_size)?;
        let file_id =
            creation::create_upload(&self.store, &headers, length, request.cancel.clone()).await?;

        let expires = self.policy().initial_expiry(self.clock.now());
        if let (Some(expires), Some(expiration)) = (expires, &self.store.expiration) {
            if let Err(err) = expiration
                .set_expiration(&file_id, expires, request.cancel.clone())
                .await
            {
                self.discard_new_upload(&file_id, &err).await;
                return Err(err.into());
            }
        }

        tracing::info!(
            file_id = %file_id,
            length = ?length,
            partial = headers.is_partial(),
            expires = ?expires,
            "Created upload"
        );

        let mut response = TusResponse::new(StatusCode::CREATED)
            .with_header(header::LOCATION, self.config.upload_url(&file_id));
        if let Some(expires) = expires {
            response = response.with_header(UPLOAD_EXPIRES, format_http_date(expires));
        }
        Ok(response)
    }

    /// Remove an upload whose creation could not be completed
    async fn discard_new_upload(&self, file_id: &str, cause: &StoreError) {
        let Some(termination) = &self.store.termination else {
            tracing::error!(
                file_id = %file_id,
                error = %cause,
                "Failed to set expiry on new upload, upload left orphaned"
            );
            return;
        };

        tracing::error!(
            file_id = %file_id,
            error = %cause,
            "Failed to set expiry on new upload, removing it"
        );
        // The request may already be cancelled, removal must still run
        if let Err(err) = termination
            .delete_file(file_id, CancellationToken::new())
            .await
        {
            tracing::error!(file_id = %file_id, error = %err, "Failed to remove orphaned upload");
        }
    }

    async fn create_final(
        &self,
        urls: &[String],
        headers: &CreationHeaders,
        cancel: CancellationToken,
    ) -> Result<TusResponse> {
        let concat_store = self
            .store
            .concatenation
            .as_ref()
            .ok_or(TusError::CapabilityUnavailable("concatenation"))?;

        if headers.upload_length.is_some() || headers.defer_length {
            return Err(TusError::BadRequest(
                "Header Upload-Length must not be included when creating a final upload"
                    .to_string(),
            ));
        }

        let parts = concatenation::resolve_parts(urls, &self.config.url_path)?;

        for part in &parts {
            match self.ensure_live(part).await {
                Ok(()) => {}
                Err(TusError::NotFound(_)) => {
                    return Err(TusError::InvalidConcatenation(format!(
                        "Could not find upload {part} supplied for concatenation"
                    )))
                }
                Err(err) => return Err(err),
            }
        }

        let mut total_length: u64 = 0;
        for part in &parts {
            let length =
                concatenation::check_part(self.store.core.as_ref(), concat_store.as_ref(), part)
                    .await?;
            total_length = total_length.saturating_add(length);
        }
        check_max_size(total_length, self.config.max_size)?;

        let file_id = concatenation::create_final(
            concat_store.as_ref(),
            &parts,
            headers.metadata.clone(),
            cancel,
        )
        .await?;

        tracing::info!(
            file_id = %file_id,
            parts = parts.len(),
            length = total_length,
            "Created final upload"
        );

        // A final upload is complete on creation, it never expires
        Ok(TusResponse::new(StatusCode::CREATED)
            .with_header(header::LOCATION, self.config.upload_url(&file_id)))
    }

    // ========================================================================
    // HEAD
    // ========================================================================

    async fn head(&self, file_id: &str) -> Result<TusResponse> {
        self.ensure_live(file_id).await?;

        let core = &self.store.core;
        let offset = core.get_upload_offset(file_id).await?;
        let length = core.get_upload_length(file_id).await?;

        let mut response = TusResponse::new(StatusCode::OK)
            .with_header(header::CACHE_CONTROL, "no-store")
            .with_header(UPLOAD_OFFSET, offset.to_string());

        response = match length {
            Some(length) => response.with_header(UPLOAD_LENGTH, length.to_string()),
            None => response.with_header(UPLOAD_DEFER_LENGTH, "1"),
        };

        if let Some(creation) = &self.store.creation {
            if let Some(metadata) = creation.get_upload_metadata(file_id).await? {
                response = response.with_header(UPLOAD_METADATA, metadata);
            }
        }

        if let Some(concat_store) = &self.store.concatenation {
            let concat = concat_store.get_concatenation(file_id).await?;
            if let Some(value) = concatenation::concat_header(&concat, &self.config.url_path) {
                response = response.with_header(UPLOAD_CONCAT, value);
            }
        }

        Ok(response)
    }

    // ========================================================================
    // PATCH
    // ========================================================================

    async fn patch(&self, file_id: &str, request: TusRequest) -> Result<TusResponse> {
        let TusRequest {
            headers,
            body,
            cancel,
            ..
        } = request;

        validate_content_type(&headers)?;
        let declared_offset = parse_u64_header(&headers, &UPLOAD_OFFSET)?
            .ok_or_else(|| TusError::BadRequest("Header Upload-Offset must be included".to_string()))?;
        let declared_length = parse_u64_header(&headers, &UPLOAD_LENGTH)?;
        let checksum = self.parse_checksum_header(&headers)?;

        let _lock = self.lock(file_id).await?;
        self.ensure_live(file_id).await?;

        if let Some(concat_store) = &self.store.concatenation {
            if concat_store.get_concatenation(file_id).await?.is_final() {
                return Err(TusError::FinalUploadImmutable(file_id.to_string()));
            }
        }

        let core = &self.store.core;
        let stored_offset = core.get_upload_offset(file_id).await?;
        if declared_offset != stored_offset {
            return Err(TusError::OffsetConflict {
                expected: stored_offset,
                actual: declared_offset,
            });
        }

        let (length, deferred) = self.resolve_patch_length(file_id, declared_length).await?;

        if let Some(length) = length {
            if stored_offset == length {
                return Err(TusError::BadRequest("Upload is already complete".to_string()));
            }
        }

        // Without a known length the upload is bounded by Tus-Max-Size
        let limit = length.or(self.config.max_size);
        if let (Some(limit), Some(content_length)) =
            (limit, parse_u64_header(&headers, &header::CONTENT_LENGTH)?)
        {
            let end = stored_offset.saturating_add(content_length);
            if end > limit {
                return Err(TusError::PayloadTooLarge { size: end, max: limit });
            }
        }

        if let Some(declared) = deferred {
            self.set_deferred_length(file_id, declared, cancel.clone())
                .await?;
        }

        let received = Arc::new(AtomicU64::new(0));
        let body = match (length, self.config.max_size) {
            (None, Some(max_size)) => {
                cap_stream(body, max_size.saturating_sub(stored_offset), received.clone())
            }
            _ => body,
        };

        let appended = core.append_data(file_id, body, cancel.clone()).await;
        let end = stored_offset.saturating_add(received.load(Ordering::SeqCst));
        let new_offset = match (appended, limit) {
            (Ok(offset), _) => offset,
            (Err(_), Some(max)) if length.is_none() && end > max => {
                return Err(TusError::PayloadTooLarge { size: end, max })
            }
            (Err(err), _) => return Err(err.into()),
        };

        if let (Some((algorithm, digest)), Some(checksum_store)) = (checksum, &self.store.checksum) {
            let valid = checksum_store
                .verify_checksum(file_id, algorithm, &digest, cancel.clone())
                .await?;
            if !valid {
                tracing::warn!(file_id = %file_id, algorithm = %algorithm, "Checksum mismatch, chunk discarded");
                return Err(TusError::ChecksumMismatch);
            }
        }

        let expires = self.refresh_expiration(file_id, cancel).await?;

        tracing::debug!(
            file_id = %file_id,
            offset = new_offset,
            length = ?length,
            "Appended data"
        );
        if Some(new_offset) == length {
            tracing::info!(file_id = %file_id, length = new_offset, "Upload complete");
        }

        let mut response = TusResponse::new(StatusCode::NO_CONTENT)
            .with_header(UPLOAD_OFFSET, new_offset.to_string());
        if let Some(expires) = expires {
            response = response.with_header(UPLOAD_EXPIRES, format_http_date(expires));
        }
        Ok(response)
    }

    /// Checksum requested by the client, only honoured when the store verifies
    fn parse_checksum_header(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<(ChecksumAlgorithm, Vec<u8>)>> {
        let Some(checksum_store) = &self.store.checksum else {
            return Ok(None);
        };
        let Some(value) = header_str(headers, &UPLOAD_CHECKSUM)? else {
            return Ok(None);
        };

        let (algorithm, digest) = parse_checksum(value)?;
        if !checksum_store.supported_algorithms().contains(&algorithm) {
            return Err(TusError::BadRequest(format!(
                "Unsupported checksum algorithm: {algorithm}"
            )));
        }
        Ok(Some((algorithm, digest)))
    }

    /// Length in force for this PATCH and, for a deferred upload, the
    /// `Upload-Length` still to be persisted. Nothing is written here.
    async fn resolve_patch_length(
        &self,
        file_id: &str,
        declared: Option<u64>,
    ) -> Result<(Option<u64>, Option<u64>)> {
        let stored = self.store.core.get_upload_length(file_id).await?;

        match (stored, declared) {
            (stored, None) => Ok((stored, None)),
            (Some(stored), Some(declared)) if stored == declared => Ok((Some(stored), None)),
            (Some(_), Some(_)) => Err(TusError::BadRequest(
                "Header Upload-Length cannot be changed once set".to_string(),
            )),
            (None, Some(declared)) => {
                if self.store.defer_length.is_none() {
                    return Err(TusError::BadRequest(
                        "Header Upload-Length is not supported on PATCH".to_string(),
                    ));
                }
                check_max_size(declared, self.config.max_size)?;
                let offset = self.store.core.get_upload_offset(file_id).await?;
                if declared < offset {
                    return Err(TusError::BadRequest(format!(
                        "Header Upload-Length {declared} is smaller than the current offset {offset}"
                    )));
                }
                Ok((Some(declared), Some(declared)))
            }
        }
    }

    async fn set_deferred_length(
        &self,
        file_id: &str,
        length: u64,
        cancel: CancellationToken,
    ) -> Result<()> {
        let defer_store = self
            .store
            .defer_length
            .as_ref()
            .ok_or(TusError::CapabilityUnavailable("creation-defer-length"))?;
        defer_store.set_upload_length(file_id, length, cancel).await?;
        tracing::debug!(file_id = %file_id, length = length, "Deferred length set");
        Ok(())
    }

    /// Apply the policy after a successful append and return the expiry to echo
    async fn refresh_expiration(
        &self,
        file_id: &str,
        cancel: CancellationToken,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
        let policy = self.policy();
        if !policy.is_active() {
            return Ok(None);
        }

        let stored = match (&policy, &self.store.expiration) {
            (ExpirationPolicy::Absolute(_), Some(expiration)) => {
                expiration.get_expiration(file_id).await?
            }
            _ => None,
        };

        let decision = policy.after_append(self.clock.now(), stored);
        if let (AppendExpiry::Refresh(expires), Some(expiration)) = (decision, &self.store.expiration)
        {
            expiration.set_expiration(file_id, expires, cancel).await?;
        }
        Ok(decision.expires())
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    async fn delete(&self, file_id: &str, cancel: CancellationToken) -> Result<TusResponse> {
        let termination = self
            .store
            .termination
            .as_ref()
            .ok_or(TusError::CapabilityUnavailable("termination"))?;

        let _lock = self.lock(file_id).await?;
        self.ensure_live(file_id).await?;

        termination.delete_file(file_id, cancel).await?;
        tracing::info!(file_id = %file_id, "Deleted upload");

        Ok(TusResponse::new(StatusCode::NO_CONTENT))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// The upload exists and has not expired. Expired and unknown uploads
    /// produce the same error.
    async fn ensure_live(&self, file_id: &str) -> Result<()> {
        if !self.store.core.exists(file_id).await? {
            return Err(TusError::NotFound(file_id.to_string()));
        }

        if let Some(expiration) = &self.store.expiration {
            let expires = expiration.get_expiration(file_id).await?;
            if is_expired(expires, self.clock.now()) {
                tracing::debug!(file_id = %file_id, expires = ?expires, "Upload expired");
                return Err(TusError::NotFound(file_id.to_string()));
            }
        }

        Ok(())
    }

    async fn lock(&self, file_id: &str) -> Result<Option<FileLock>> {
        let Some(locks) = &self.locks else {
            return Ok(None);
        };

        match locks.try_lock(file_id).await? {
            Some(lock) => Ok(Some(lock)),
            None => Err(TusError::FileLocked(file_id.to_string())),
        }
    }
}

/// Fail the body once more than `max` bytes have been read. `received`
/// counts every byte seen, including the chunk that crossed the limit.
fn cap_stream(body: ByteStream, max: u64, received: Arc<AtomicU64>) -> ByteStream {
    body.map(move |chunk| {
        let chunk = chunk?;
        let total = received.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
        if total > max {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request body exceeds Tus-Max-Size",
            ));
        }
        Ok(chunk)
    })
    .boxed()
}

fn validate_tus_resumable(headers: &HeaderMap) -> Result<()> {
    match header_str(headers, &TUS_RESUMABLE) {
        Ok(Some(TUS_VERSION)) => Ok(()),
        _ => Err(TusError::PreconditionFailed),
    }
}

fn validate_content_type(headers: &HeaderMap) -> Result<()> {
    let content_type = header_str(headers, &header::CONTENT_TYPE)?.unwrap_or_default();
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    if !mime.eq_ignore_ascii_case(OFFSET_OCTET_STREAM) {
        return Err(TusError::UnsupportedMediaType(content_type.to_string()));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
