//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::http::{CacheKey, Response};

/// Trait for cache storage backends.
///
/// A backend holds any number of named stores, each mapping a request key to a
/// response. Writes to the same key are last-write-wins.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the named store if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  /// Names of all existing stores.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a store and all its entries. Returns false if it did not exist.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look up an entry in a store.
  fn get(&self, name: &str, key: &CacheKey) -> Result<Option<CachedEntry>>;

  /// Store an entry, replacing any previous one for the same key.
  fn put(&self, name: &str, key: &CacheKey, response: &Response) -> Result<()>;
}

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Identifies the current store among all stores of this application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheVersion {
  /// Name prefix shared by every version's store (e.g. "sfg-cache-")
  pub family: String,
  /// Version baked into the current store name (e.g. "sfg-v1.0.0")
  pub version: String,
}

impl CacheVersion {
  pub fn new(family: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      family: family.into(),
      version: version.into(),
    }
  }

  /// Name of the current store.
  pub fn store_name(&self) -> String {
    format!("{}{}", self.family, self.version)
  }

  /// A store of this application left behind by another version.
  pub fn is_superseded(&self, name: &str) -> bool {
    name.starts_with(&self.family) && name != self.store_name()
  }
}

/// Response produced for an intercepted request, with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: Response,
  pub source: ServedFrom,
  /// When the entry was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(entry: CachedEntry) -> Self {
    Self {
      response: entry.response,
      source: ServedFrom::Cache,
      cached_at: Some(entry.cached_at),
    }
  }

  /// The cached boot page standing in for an uncached navigation.
  pub fn boot_page(entry: CachedEntry) -> Self {
    Self {
      source: ServedFrom::BootPage,
      ..Self::from_cache(entry)
    }
  }

  pub fn synthesized(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Synthesized,
      cached_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Live network response
  Network,
  /// Entry matching the request
  Cache,
  /// Offline fallback to the cached boot page
  BootPage,
  /// Generated error response, nothing else was available
  Synthesized,
}

impl std::fmt::Display for ServedFrom {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::BootPage => "boot-page",
      Self::Synthesized => "synthesized",
    };
    f.write_str(s)
  }
}
