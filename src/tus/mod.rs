//! Tus 1.0.0 protocol engine
//!
//! - `handler`: method dispatch and response rendering
//! - `creation`, `concatenation`: extension logic for POST
//! - `expiration`: expiry policy decisions
//! - `headers`, `http_date`: wire formats
//! - `lock`: optional per-upload locking

pub mod concatenation;
pub mod creation;
pub mod expiration;
pub mod handler;
pub mod headers;
pub mod http_date;
pub mod lock;
pub mod request;

pub use expiration::{AppendExpiry, ExpirationPolicy};
pub use handler::TusHandler;
pub use lock::{FileLock, FileLockProvider, InMemoryLockProvider};
pub use request::{effective_method, TusRequest, TusResponse};
