//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::store::StoreCapabilities;
use crate::tus::{InMemoryLockProvider, TusHandler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    handler: TusHandler,
}

impl AppState {
    /// Create the state around a resolved store.
    ///
    /// Per-upload locking is installed when `enable_locking` is set.
    pub fn new(config: Config, store: StoreCapabilities) -> Self {
        let mut handler = TusHandler::new(config.tus.clone(), store);
        if config.tus.enable_locking {
            handler = handler.with_locks(Arc::new(InMemoryLockProvider::new()));
        }
        Self::with_handler(config, handler)
    }

    /// Use a preconfigured handler (custom clock or lock provider)
    pub fn with_handler(config: Config, handler: TusHandler) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, handler }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the protocol handler
    pub fn handler(&self) -> &TusHandler {
        &self.inner.handler
    }
}
