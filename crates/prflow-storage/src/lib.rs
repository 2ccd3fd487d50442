//! In-memory state owned by a prflow server.
//!
//! Both stores are plain values behind internal locks, injected where needed
//! (usually as `Arc`), so several servers can live in one process:
//!
//! - [`TokenCache`]: per-instance bearer tokens with expiry and single-flight refresh
//! - [`OperationLog`]: bounded, newest-first record of handled messages

pub mod oplog;
pub mod token_cache;

pub use oplog::{OperationLog, OperationLogEntry, DEFAULT_LOG_CAPACITY};
pub use token_cache::{CachedToken, TokenCache, REFRESH_BUFFER};
