//! Tus Server Library
//!
//! Resumable uploads over HTTP following the tus 1.0.0 protocol.
//!
//! # Modules
//!
//! - `tus`: protocol engine, independent of the HTTP framework
//! - `store`: upload store contract and the in-memory backend
//! - `routes`: axum adapter
//! - `config`, `state`, `clock`: server plumbing

pub mod clock;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod tus;

pub use config::Config;
pub use error::{StoreError, TusError};
pub use state::AppState;
