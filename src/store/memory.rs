//! In-memory Upload Store
//!
//! Reference implementation of every store fragment. Uploads live in a
//! `HashMap` behind an async `RwLock`; nothing survives a restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{ByteStream, ChecksumAlgorithm, Concatenation};
use super::{
    ChecksumStore, ConcatenationStore, CreationDeferLengthStore, CreationStore, ExpirationStore,
    TerminationStore, TusStore,
};
use crate::error::{StoreError, StoreResult};

// ============================================================================
// Stored Upload
// ============================================================================

#[derive(Debug, Clone, Default)]
struct StoredUpload {
    data: Vec<u8>,
    length: Option<u64>,
    metadata: Option<String>,
    concatenation: Concatenation,
    expires: Option<DateTime<Utc>>,
    /// Offset at which the most recent append started
    last_append_start: u64,
}

impl StoredUpload {
    fn offset(&self) -> u64 {
        self.data.len() as u64
    }
}

// ============================================================================
// In-memory Store
// ============================================================================

/// Upload store keeping every upload in process memory
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<InMemoryStoreInner>,
}

#[derive(Default)]
struct InMemoryStoreInner {
    uploads: RwLock<HashMap<String, StoredUpload>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored uploads, expired ones included
    pub async fn upload_count(&self) -> usize {
        self.inner.uploads.read().await.len()
    }

    /// Bytes received for an upload
    pub async fn read_data(&self, file_id: &str) -> StoreResult<Vec<u8>> {
        let uploads = self.inner.uploads.read().await;
        uploads
            .get(file_id)
            .map(|upload| upload.data.clone())
            .ok_or_else(|| StoreError::NotFound(file_id.to_string()))
    }

    async fn insert(&self, upload: StoredUpload) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let mut uploads = self.inner.uploads.write().await;
        uploads.insert(id.clone(), upload);
        id
    }

    async fn with_upload<T>(
        &self,
        file_id: &str,
        f: impl FnOnce(&StoredUpload) -> T,
    ) -> StoreResult<T> {
        let uploads = self.inner.uploads.read().await;
        uploads
            .get(file_id)
            .map(f)
            .ok_or_else(|| StoreError::NotFound(file_id.to_string()))
    }

    async fn with_upload_mut<T>(
        &self,
        file_id: &str,
        f: impl FnOnce(&mut StoredUpload) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut uploads = self.inner.uploads.write().await;
        let upload = uploads
            .get_mut(file_id)
            .ok_or_else(|| StoreError::NotFound(file_id.to_string()))?;
        f(upload)
    }
}

#[async_trait]
impl TusStore for InMemoryStore {
    async fn exists(&self, file_id: &str) -> StoreResult<bool> {
        Ok(self.inner.uploads.read().await.contains_key(file_id))
    }

    async fn get_upload_length(&self, file_id: &str) -> StoreResult<Option<u64>> {
        self.with_upload(file_id, |upload| upload.length).await
    }

    async fn get_upload_offset(&self, file_id: &str) -> StoreResult<u64> {
        self.with_upload(file_id, StoredUpload::offset).await
    }

    async fn append_data(
        &self,
        file_id: &str,
        mut stream: ByteStream,
        cancel: CancellationToken,
    ) -> StoreResult<u64> {
        let mut offset = self
            .with_upload_mut(file_id, |upload| {
                upload.last_append_start = upload.offset();
                Ok(upload.offset())
            })
            .await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(file_id = %file_id, offset = offset, "Append cancelled");
                    return Err(StoreError::Cancelled);
                }
                next = stream.next() => next,
            };

            let Some(chunk) = next else { break };
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }

            offset = self
                .with_upload_mut(file_id, |upload| {
                    let attempted = upload.offset() + chunk.len() as u64;
                    if let Some(length) = upload.length {
                        if attempted > length {
                            return Err(StoreError::LengthExceeded { length, attempted });
                        }
                    }
                    upload.data.extend_from_slice(&chunk);
                    Ok(upload.offset())
                })
                .await?;
        }

        Ok(offset)
    }
}

#[async_trait]
impl CreationStore for InMemoryStore {
    async fn create_file(
        &self,
        length: Option<u64>,
        metadata: Option<String>,
        _cancel: CancellationToken,
    ) -> StoreResult<String> {
        Ok(self
            .insert(StoredUpload {
                length,
                metadata,
                ..Default::default()
            })
            .await)
    }

    async fn get_upload_metadata(&self, file_id: &str) -> StoreResult<Option<String>> {
        self.with_upload(file_id, |upload| upload.metadata.clone()).await
    }
}

#[async_trait]
impl ConcatenationStore for InMemoryStore {
    async fn create_partial_file(
        &self,
        length: Option<u64>,
        metadata: Option<String>,
        _cancel: CancellationToken,
    ) -> StoreResult<String> {
        Ok(self
            .insert(StoredUpload {
                length,
                metadata,
                concatenation: Concatenation::Partial,
                ..Default::default()
            })
            .await)
    }

    async fn create_final_file(
        &self,
        parts: &[String],
        metadata: Option<String>,
        _cancel: CancellationToken,
    ) -> StoreResult<String> {
        let data = {
            let uploads = self.inner.uploads.read().await;
            let mut data = Vec::new();
            for part in parts {
                let upload = uploads
                    .get(part)
                    .ok_or_else(|| StoreError::NotFound(part.clone()))?;
                data.extend_from_slice(&upload.data);
            }
            data
        };

        Ok(self
            .insert(StoredUpload {
                length: Some(data.len() as u64),
                data,
                metadata,
                concatenation: Concatenation::Final(parts.to_vec()),
                ..Default::default()
            })
            .await)
    }

    async fn get_concatenation(&self, file_id: &str) -> StoreResult<Concatenation> {
        self.with_upload(file_id, |upload| upload.concatenation.clone())
            .await
    }
}

#[async_trait]
impl ExpirationStore for InMemoryStore {
    async fn get_expiration(&self, file_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        self.with_upload(file_id, |upload| upload.expires).await
    }

    async fn set_expiration(
        &self,
        file_id: &str,
        expires: DateTime<Utc>,
        _cancel: CancellationToken,
    ) -> StoreResult<()> {
        self.with_upload_mut(file_id, |upload| {
            upload.expires = Some(expires);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl TerminationStore for InMemoryStore {
    async fn delete_file(&self, file_id: &str, _cancel: CancellationToken) -> StoreResult<()> {
        let mut uploads = self.inner.uploads.write().await;
        uploads
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(file_id.to_string()))
    }
}

#[async_trait]
impl ChecksumStore for InMemoryStore {
    fn supported_algorithms(&self) -> Vec<ChecksumAlgorithm> {
        vec![ChecksumAlgorithm::Sha1, ChecksumAlgorithm::Sha256]
    }

    async fn verify_checksum(
        &self,
        file_id: &str,
        algorithm: ChecksumAlgorithm,
        digest: &[u8],
        _cancel: CancellationToken,
    ) -> StoreResult<bool> {
        self.with_upload_mut(file_id, |upload| {
            let start = upload.last_append_start as usize;
            let actual = algorithm.digest(&upload.data[start..]);
            if actual != digest {
                upload.data.truncate(start);
                return Ok(false);
            }
            Ok(true)
        })
        .await
    }
}

#[async_trait]
impl CreationDeferLengthStore for InMemoryStore {
    async fn set_upload_length(
        &self,
        file_id: &str,
        length: u64,
        _cancel: CancellationToken,
    ) -> StoreResult<()> {
        self.with_upload_mut(file_id, |upload| {
            if upload.offset() > length {
                return Err(StoreError::LengthExceeded {
                    length,
                    attempted: upload.offset(),
                });
            }
            upload.length = Some(length);
            Ok(())
        })
        .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use futures::stream;

    fn body(chunks: &[&'static [u8]]) -> ByteStream {
        let chunks: Vec<std::io::Result<Bytes>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::from_static(chunk)))
            .collect();
        stream::iter(chunks).boxed()
    }

    #[tokio::test]
    async fn test_create_and_append() {
        let store = InMemoryStore::new();
        let id = store
            .create_file(Some(10), None, CancellationToken::new())
            .await
            .unwrap();

        assert!(store.exists(&id).await.unwrap());
        assert_eq!(store.get_upload_length(&id).await.unwrap(), Some(10));
        assert_eq!(store.get_upload_offset(&id).await.unwrap(), 0);

        let offset = store
            .append_data(&id, body(&[b"abc", b"de"]), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(offset, 5);
        assert_eq!(store.read_data(&id).await.unwrap(), b"abcde");
    }

    #[tokio::test]
    async fn test_append_beyond_length_keeps_stored_bytes() {
        let store = InMemoryStore::new();
        let id = store
            .create_file(Some(4), None, CancellationToken::new())
            .await
            .unwrap();

        let result = store
            .append_data(&id, body(&[b"abc", b"de"]), CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(StoreError::LengthExceeded { length: 4, attempted: 5 })
        ));
        assert_eq!(store.get_upload_offset(&id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_append_leaves_offset() {
        let store = InMemoryStore::new();
        let id = store
            .create_file(Some(10), None, CancellationToken::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = store.append_data(&id, body(&[b"abc"]), cancel).await;

        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert_eq!(store.get_upload_offset(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_final_file_concatenates_in_order() {
        let store = InMemoryStore::new();
        let first = store
            .create_partial_file(Some(3), None, CancellationToken::new())
            .await
            .unwrap();
        let second = store
            .create_partial_file(Some(2), None, CancellationToken::new())
            .await
            .unwrap();
        store
            .append_data(&first, body(&[b"abc"]), CancellationToken::new())
            .await
            .unwrap();
        store
            .append_data(&second, body(&[b"de"]), CancellationToken::new())
            .await
            .unwrap();

        let parts = vec![second.clone(), first.clone()];
        let id = store
            .create_final_file(&parts, None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.read_data(&id).await.unwrap(), b"deabc");
        assert_eq!(store.get_upload_length(&id).await.unwrap(), Some(5));
        assert_eq!(
            store.get_concatenation(&id).await.unwrap(),
            Concatenation::Final(parts)
        );
        assert_eq!(
            store.get_concatenation(&first).await.unwrap(),
            Concatenation::Partial
        );
    }

    #[tokio::test]
    async fn test_checksum_mismatch_discards_chunk() {
        let store = InMemoryStore::new();
        let id = store
            .create_file(Some(10), None, CancellationToken::new())
            .await
            .unwrap();
        store
            .append_data(&id, body(&[b"abc"]), CancellationToken::new())
            .await
            .unwrap();
        store
            .append_data(&id, body(&[b"def"]), CancellationToken::new())
            .await
            .unwrap();

        let good = ChecksumAlgorithm::Sha1.digest(b"def");
        assert!(store
            .verify_checksum(&id, ChecksumAlgorithm::Sha1, &good, CancellationToken::new())
            .await
            .unwrap());
        assert_eq!(store.get_upload_offset(&id).await.unwrap(), 6);

        store
            .append_data(&id, body(&[b"ghi"]), CancellationToken::new())
            .await
            .unwrap();
        let bad = ChecksumAlgorithm::Sha1.digest(b"xyz");
        assert!(!store
            .verify_checksum(&id, ChecksumAlgorithm::Sha1, &bad, CancellationToken::new())
            .await
            .unwrap());
        assert_eq!(store.get_upload_offset(&id).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_deferred_length() {
        let store = InMemoryStore::new();
        let id = store
            .create_file(None, None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.get_upload_length(&id).await.unwrap(), None);

        store
            .set_upload_length(&id, 8, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(store.get_upload_length(&id).await.unwrap(), Some(8));
    }

    #[tokio::test]
    async fn test_delete_file() {
        let store = InMemoryStore::new();
        let id = store
            .create_file(Some(1), Some("filename dGVzdA==".into()), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            store.get_upload_metadata(&id).await.unwrap().as_deref(),
            Some("filename dGVzdA==")
        );
        assert_eq!(store.upload_count().await, 1);

        store.delete_file(&id, CancellationToken::new()).await.unwrap();
        assert!(!store.exists(&id).await.unwrap());
        assert_eq!(store.upload_count().await, 0);
        assert!(matches!(
            store.delete_file(&id, CancellationToken::new()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
