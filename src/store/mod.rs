//! Upload Store Contract
//!
//! The interface set a storage backend implements to host tus uploads:
//! - `TusStore`: mandatory core (existence, length, offset, append)
//! - Optional fragments, each independently present or absent:
//!   `CreationStore`, `ConcatenationStore`, `ExpirationStore`,
//!   `TerminationStore`, `ChecksumStore`, `CreationDeferLengthStore`
//!
//! Fragments are resolved once into [`StoreCapabilities`] when the server is
//! configured. The protocol handler only ever asks that record whether a
//! fragment exists, it never calls into a missing one.

pub mod memory;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::StoreResult;

pub use memory::InMemoryStore;
pub use types::{ByteStream, ChecksumAlgorithm, Concatenation};

// ============================================================================
// Core Contract
// ============================================================================

/// Mandatory store operations
#[async_trait]
pub trait TusStore: Send + Sync {
    /// Whether an upload with this id is stored
    async fn exists(&self, file_id: &str) -> StoreResult<bool>;

    /// Total length, `None` while deferred
    async fn get_upload_length(&self, file_id: &str) -> StoreResult<Option<u64>>;

    /// Bytes received so far
    async fn get_upload_offset(&self, file_id: &str) -> StoreResult<u64>;

    /// Append the stream to the upload and return the new offset.
    ///
    /// On cancellation the store stops reading, keeps exactly the bytes it has
    /// already stored and returns `StoreError::Cancelled`.
    async fn append_data(
        &self,
        file_id: &str,
        stream: ByteStream,
        cancel: CancellationToken,
    ) -> StoreResult<u64>;
}

// ============================================================================
// Optional Fragments
// ============================================================================

/// Creation extension
#[async_trait]
pub trait CreationStore: Send + Sync {
    async fn create_file(
        &self,
        length: Option<u64>,
        metadata: Option<String>,
        cancel: CancellationToken,
    ) -> StoreResult<String>;

    /// Raw `Upload-Metadata` value the upload was created with
    async fn get_upload_metadata(&self, file_id: &str) -> StoreResult<Option<String>>;
}

/// Concatenation extension
#[async_trait]
pub trait ConcatenationStore: Send + Sync {
    async fn create_partial_file(
        &self,
        length: Option<u64>,
        metadata: Option<String>,
        cancel: CancellationToken,
    ) -> StoreResult<String>;

    /// Assemble a final upload from `parts`, byte order follows `parts` order.
    async fn create_final_file(
        &self,
        parts: &[String],
        metadata: Option<String>,
        cancel: CancellationToken,
    ) -> StoreResult<String>;

    async fn get_concatenation(&self, file_id: &str) -> StoreResult<Concatenation>;
}

/// Expiration extension
#[async_trait]
pub trait ExpirationStore: Send + Sync {
    async fn get_expiration(&self, file_id: &str) -> StoreResult<Option<DateTime<Utc>>>;

    async fn set_expiration(
        &self,
        file_id: &str,
        expires: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> StoreResult<()>;
}

/// Termination extension
#[async_trait]
pub trait TerminationStore: Send + Sync {
    async fn delete_file(&self, file_id: &str, cancel: CancellationToken) -> StoreResult<()>;
}

/// Checksum extension
#[async_trait]
pub trait ChecksumStore: Send + Sync {
    fn supported_algorithms(&self) -> Vec<ChecksumAlgorithm>;

    /// Verify the bytes written by the latest append against `digest`.
    ///
    /// Returning `false` means the store has discarded those bytes and the
    /// offset is back where the append started.
    async fn verify_checksum(
        &self,
        file_id: &str,
        algorithm: ChecksumAlgorithm,
        digest: &[u8],
        cancel: CancellationToken,
    ) -> StoreResult<bool>;
}

/// Creation-defer-length extension
#[async_trait]
pub trait CreationDeferLengthStore: Send + Sync {
    async fn set_upload_length(
        &self,
        file_id: &str,
        length: u64,
        cancel: CancellationToken,
    ) -> StoreResult<()>;
}

// ============================================================================
// Capability Record
// ============================================================================

/// The core store plus whichever fragments the backend provides
#[derive(Clone)]
pub struct StoreCapabilities {
    pub core: Arc<dyn TusStore>,
    pub creation: Option<Arc<dyn CreationStore>>,
    pub concatenation: Option<Arc<dyn ConcatenationStore>>,
    pub expiration: Option<Arc<dyn ExpirationStore>>,
    pub termination: Option<Arc<dyn TerminationStore>>,
    pub checksum: Option<Arc<dyn ChecksumStore>>,
    pub defer_length: Option<Arc<dyn CreationDeferLengthStore>>,
}

impl StoreCapabilities {
    /// Core-only store, every extension disabled
    pub fn new(core: Arc<dyn TusStore>) -> Self {
        Self {
            core,
            creation: None,
            concatenation: None,
            expiration: None,
            termination: None,
            checksum: None,
            defer_length: None,
        }
    }

    /// A store implementing every fragment
    pub fn full<S>(store: Arc<S>) -> Self
    where
        S: TusStore
            + CreationStore
            + ConcatenationStore
            + ExpirationStore
            + TerminationStore
            + ChecksumStore
            + CreationDeferLengthStore
            + 'static,
    {
        Self::new(store.clone())
            .with_creation(store.clone())
            .with_concatenation(store.clone())
            .with_expiration(store.clone())
            .with_termination(store.clone())
            .with_checksum(store.clone())
            .with_defer_length(store)
    }

    pub fn with_creation(mut self, creation: Arc<dyn CreationStore>) -> Self {
        self.creation = Some(creation);
        self
    }

    pub fn with_concatenation(mut self, concatenation: Arc<dyn ConcatenationStore>) -> Self {
        self.concatenation = Some(concatenation);
        self
    }

    pub fn with_expiration(mut self, expiration: Arc<dyn ExpirationStore>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_termination(mut self, termination: Arc<dyn TerminationStore>) -> Self {
        self.termination = Some(termination);
        self
    }

    pub fn with_checksum(mut self, checksum: Arc<dyn ChecksumStore>) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_defer_length(mut self, defer_length: Arc<dyn CreationDeferLengthStore>) -> Self {
        self.defer_length = Some(defer_length);
        self
    }

    /// Names advertised in `Tus-Extension`, in protocol order
    pub fn extensions(&self) -> Vec<&'static str> {
        let mut extensions = Vec::new();
        if self.creation.is_some() {
            extensions.push("creation");
            if self.defer_length.is_some() {
                extensions.push("creation-defer-length");
            }
        }
        if self.termination.is_some() {
            extensions.push("termination");
        }
        if self.checksum.is_some() {
            extensions.push("checksum");
        }
        if self.concatenation.is_some() {
            extensions.push("concatenation");
        }
        if self.expiration.is_some() {
            extensions.push("expiration");
        }
        extensions
    }
}
