//! Per-upload locking
//!
//! Optional capability: when a lock provider is configured, PATCH and DELETE
//! hold an exclusive lock on the upload for the duration of the request.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StoreResult;

/// Hands out exclusive per-upload locks
#[async_trait]
pub trait FileLockProvider: Send + Sync {
    /// Try to lock `file_id`, `None` if someone else holds it
    async fn try_lock(&self, file_id: &str) -> StoreResult<Option<FileLock>>;
}

/// Held lock, released on drop
pub struct FileLock {
    file_id: String,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl FileLock {
    pub fn new(file_id: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            file_id: file_id.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }
}

impl fmt::Debug for FileLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLock").field("file_id", &self.file_id).finish()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

// ============================================================================
// In-process Lock Table
// ============================================================================

/// Lock provider for a single server process
#[derive(Clone, Default)]
pub struct InMemoryLockProvider {
    locked: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, file_id: &str) -> bool {
        self.locked.lock().contains(file_id)
    }
}

#[async_trait]
impl FileLockProvider for InMemoryLockProvider {
    async fn try_lock(&self, file_id: &str) -> StoreResult<Option<FileLock>> {
        if !self.locked.lock().insert(file_id.to_string()) {
            return Ok(None);
        }

        let locked = self.locked.clone();
        let id = file_id.to_string();
        Ok(Some(FileLock::new(file_id, move || {
            locked.lock().remove(&id);
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let provider = InMemoryLockProvider::new();

        let lock = provider.try_lock("abc").await.unwrap().unwrap();
        assert_eq!(lock.file_id(), "abc");
        assert!(provider.is_locked("abc"));
        assert!(provider.try_lock("abc").await.unwrap().is_none());

        let other = provider.try_lock("def").await.unwrap();
        assert!(other.is_some());
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let provider = InMemoryLockProvider::new();
        {
            let _lock = provider.try_lock("abc").await.unwrap().unwrap();
        }
        assert!(!provider.is_locked("abc"));
        assert!(provider.try_lock("abc").await.unwrap().is_some());
    }
}
