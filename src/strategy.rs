//! Per-request strategy selection and dispatch.

use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, Served};
use crate::http::{Destination, Request, RequestMode};
use crate::network::Network;

/// How an intercepted request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Documents: live first, cache and boot page when offline
  NetworkFirst,
  /// Images and everything without a dedicated strategy
  CacheFirst,
  /// Audio: cached copy now, refreshed in the background
  StaleWhileRevalidate,
}

impl Strategy {
  /// Strategy for a request, or None for requests left to the browser (non-GET).
  pub fn for_request(request: &Request) -> Option<Self> {
    if !request.is_get() {
      return None;
    }
    if request.mode == RequestMode::Navigate {
      return Some(Self::NetworkFirst);
    }
    match request.destination {
      Destination::Audio => Some(Self::StaleWhileRevalidate),
      Destination::Image => Some(Self::CacheFirst),
      _ => Some(Self::CacheFirst),
    }
  }
}

impl std::fmt::Display for Strategy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Self::NetworkFirst => "network-first",
      Self::CacheFirst => "cache-first",
      Self::StaleWhileRevalidate => "stale-while-revalidate",
    };
    f.write_str(s)
  }
}

/// Result of dispatching one request.
#[derive(Debug)]
pub struct Handled {
  pub served: Served,
  pub strategy: Strategy,
  /// Background cache refresh still running after the response was produced
  pub refresh: Option<JoinHandle<()>>,
}

/// Answers requests from the current store. Cheap to clone into per-request tasks.
pub struct Dispatcher<S: CacheStorage, N: Network> {
  layer: CacheLayer<S, N>,
  boot_page: Url,
}

impl<S: CacheStorage, N: Network> Dispatcher<S, N> {
  pub fn new(layer: CacheLayer<S, N>, boot_page: Url) -> Self {
    Self { layer, boot_page }
  }

  pub async fn handle(&self, request: &Request) -> Option<Handled> {
    let strategy = Strategy::for_request(request)?;
    debug!(url = %request.url, %strategy, store = self.layer.name(), "dispatch");

    let (served, refresh) = match strategy {
      Strategy::NetworkFirst => (
        self.layer.network_first(request, &self.boot_page).await,
        None,
      ),
      Strategy::CacheFirst => (self.layer.cache_first(request).await, None),
      Strategy::StaleWhileRevalidate => self.layer.stale_while_revalidate(request).await,
    };

    Some(Handled {
      served,
      strategy,
      refresh,
    })
  }
}

impl<S: CacheStorage, N: Network> Clone for Dispatcher<S, N> {
  fn clone(&self) -> Self {
    Self {
      layer: self.layer.clone(),
      boot_page: self.boot_page.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ServedFrom};
  use crate::http::Response;
  use crate::network::fake::FakeNetwork;
  use reqwest::Method;
  use std::sync::Arc;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn dispatcher(network: FakeNetwork) -> Dispatcher<MemoryStorage, FakeNetwork> {
    let layer = CacheLayer::open(
      Arc::new(MemoryStorage::new()),
      Arc::new(network),
      "sfg-cache-test",
    )
    .unwrap();
    Dispatcher::new(layer, url("https://app.test/index.html"))
  }

  #[test]
  fn test_strategy_selection() {
    let base = Request::get(url("https://app.test/x"));
    assert_eq!(
      Strategy::for_request(&Request::navigate(url("https://app.test/"))),
      Some(Strategy::NetworkFirst)
    );
    assert_eq!(
      Strategy::for_request(&base.clone().with_destination(Destination::Image)),
      Some(Strategy::CacheFirst)
    );
    assert_eq!(
      Strategy::for_request(&base.clone().with_destination(Destination::Audio)),
      Some(Strategy::StaleWhileRevalidate)
    );
    assert_eq!(
      Strategy::for_request(&base.clone().with_destination(Destination::Script)),
      Some(Strategy::CacheFirst)
    );
    assert_eq!(Strategy::for_request(&base.with_method(Method::POST)), None);
  }

  #[test]
  fn test_navigation_wins_over_destination() {
    let req = Request::navigate(url("https://app.test/")).with_destination(Destination::Image);
    assert_eq!(Strategy::for_request(&req), Some(Strategy::NetworkFirst));
  }

  #[tokio::test]
  async fn test_non_get_is_not_handled() {
    let network = FakeNetwork::new();
    let dispatcher = dispatcher(network.clone());
    let req = Request::get(url("https://app.test/api")).with_method(Method::POST);
    assert!(dispatcher.handle(&req).await.is_none());
    assert!(network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_offline_navigation_gets_boot_page() {
    let network = FakeNetwork::new().route("https://app.test/index.html", Response::new(200, "boot"));
    let dispatcher = dispatcher(network.clone());

    // Prime the boot page while online
    dispatcher
      .handle(&Request::navigate(url("https://app.test/index.html")))
      .await
      .unwrap();

    network.set_offline(true);
    let handled = dispatcher
      .handle(&Request::navigate(url("https://app.test/levels/3")))
      .await
      .unwrap();
    assert_eq!(handled.strategy, Strategy::NetworkFirst);
    assert_eq!(handled.served.source, ServedFrom::BootPage);
    assert_eq!(handled.served.response.status, 200);
    assert_eq!(handled.served.response.body, b"boot");
  }

  #[tokio::test]
  async fn test_other_get_total_failure_is_404() {
    let dispatcher = dispatcher(FakeNetwork::new());
    for destination in [Destination::Image, Destination::Audio, Destination::Style] {
      let req = Request::get(url("https://app.test/asset")).with_destination(destination);
      let handled = dispatcher.handle(&req).await.unwrap();
      assert_eq!(handled.served.response.status, 404);
      assert_eq!(handled.served.source, ServedFrom::Synthesized);
    }
  }
}
