//! Versioned response cache for offline support.
//!
//! This module provides:
//! - Named stores mapping a request (method + URL) to a response
//! - SQLite and in-memory storage backends
//! - The runtime strategies: network-first, cache-first, stale-while-revalidate
//! - Best-effort bulk population for install-time precaching

mod layer;
mod storage;
mod traits;

pub use layer::{AssetOutcome, CacheLayer};
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::{CacheStorage, CacheVersion, Served, ServedFrom};
#[cfg(test)]
pub use traits::CachedEntry;
