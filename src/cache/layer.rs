//! Cache layer that orchestrates caching strategies with network fetching.

use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::traits::{CacheStorage, CachedEntry, Served};
use crate::http::{Request, Response};
use crate::network::Network;

/// Outcome of one item in a best-effort populate pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
  Cached { url: Url },
  Skipped { url: Url, reason: String },
}

impl AssetOutcome {
  pub fn is_cached(&self) -> bool {
    matches!(self, Self::Cached { .. })
  }
}

/// One opened store plus the network it refreshes from.
///
/// Storage failures never surface from the strategies: a failed read counts
/// as a miss and a failed write is logged and dropped.
pub struct CacheLayer<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  name: String,
}

impl<S: CacheStorage, N: Network> CacheLayer<S, N> {
  /// Open the named store, creating it if needed.
  pub fn open(storage: Arc<S>, network: Arc<N>, name: &str) -> color_eyre::Result<Self> {
    storage.open(name)?;
    Ok(Self {
      storage,
      network,
      name: name.to_string(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Cached entry for the request, if any.
  pub fn lookup(&self, request: &Request) -> Option<CachedEntry> {
    self
      .storage
      .get(&self.name, &request.cache_key())
      .unwrap_or_else(|e| {
        warn!(url = %request.url, error = %e, "cache read failed");
        None
      })
  }

  /// Write a response under the request's key.
  pub fn store(&self, request: &Request, response: &Response) {
    store(&*self.storage, &self.name, request, response);
  }

  /// Network-first for documents.
  ///
  /// 1. Fetch live; on success update the cache and return it
  /// 2. On failure, return the entry for this request
  /// 3. Else the cached boot page
  /// 4. Else a synthesized 503
  pub async fn network_first(&self, request: &Request, boot_page: &Url) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(request, &response);
        Served::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, falling back to cache");
        if let Some(entry) = self.lookup(request) {
          return Served::from_cache(entry);
        }
        if let Some(entry) = self.lookup(&Request::get(boot_page.clone())) {
          return Served::boot_page(entry);
        }
        Served::synthesized(Response::offline())
      }
    }
  }

  /// Cache-first with network fallback.
  ///
  /// A cache hit never touches the network. On a miss the live response is
  /// cached and returned; if the fetch fails a synthesized 404 is returned.
  pub async fn cache_first(&self, request: &Request) -> Served {
    if let Some(entry) = self.lookup(request) {
      return Served::from_cache(entry);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(request, &response);
        Served::from_network(response)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "cache miss and network failed");
        Served::synthesized(Response::not_found())
      }
    }
  }

  /// Stale-while-revalidate.
  ///
  /// With a cached entry, return it at once and refresh the entry in a
  /// background task (its handle is returned). Without one, wait for the
  /// network; if that fails too, a synthesized 404.
  pub async fn stale_while_revalidate(&self, request: &Request) -> (Served, Option<JoinHandle<()>>) {
    let Some(entry) = self.lookup(request) else {
      return match self.network.fetch(request).await {
        Ok(response) => {
          self.store(request, &response);
          (Served::from_network(response), None)
        }
        Err(e) => {
          debug!(url = %request.url, error = %e, "cache miss and network failed");
          (Served::synthesized(Response::not_found()), None)
        }
      };
    };

    let storage = Arc::clone(&self.storage);
    let network = Arc::clone(&self.network);
    let name = self.name.clone();
    let request = request.clone();
    let refresh = tokio::spawn(async move {
      match network.fetch(&request).await {
        Ok(response) => store(&*storage, &name, &request, &response),
        Err(e) => debug!(url = %request.url, error = %e, "background refresh failed"),
      }
    });

    (Served::from_cache(entry), Some(refresh))
  }

  /// Best-effort populate: fetch every request concurrently and store the
  /// successful (2xx) ones. Failures are reported per item, never raised.
  pub async fn add_all(&self, requests: Vec<Request>) -> Vec<AssetOutcome> {
    let attempts = requests.into_iter().map(|request| async move {
      let url = request.url.clone();
      let response = match self.network.fetch(&request).await {
        Ok(response) => response,
        Err(e) => {
          return AssetOutcome::Skipped {
            url,
            reason: e.to_string(),
          }
        }
      };
      if !response.ok() {
        return AssetOutcome::Skipped {
          url,
          reason: format!("HTTP {}", response.status),
        };
      }
      match self.storage.put(&self.name, &request.cache_key(), &response) {
        Ok(()) => AssetOutcome::Cached { url },
        Err(e) => AssetOutcome::Skipped {
          url,
          reason: e.to_string(),
        },
      }
    });

    join_all(attempts).await
  }
}

impl<S: CacheStorage, N: Network> Clone for CacheLayer<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      name: self.name.clone(),
    }
  }
}

fn store<S: CacheStorage>(storage: &S, name: &str, request: &Request, response: &Response) {
  if let Err(e) = storage.put(name, &request.cache_key(), response) {
    warn!(url = %request.url, error = %e, "cache write failed");
  }
}
