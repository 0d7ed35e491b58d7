//! Live network access.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use tracing::debug;

use crate::http::{CacheMode, Request, Response};

/// Something that can perform a request and produce a response or a failure.
///
/// An HTTP error status is still a response; only transport failures are errors.
pub trait Network: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Network backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("sfg-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    debug!(method = %request.method, url = %request.url, "network fetch");

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    if request.cache == CacheMode::NoCache {
      builder = builder
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .header(reqwest::header::PRAGMA, "no-cache");
    }

    let res = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let status = res.status();
    let headers = res
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = res
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

/// Scripted network for tests.
#[cfg(test)]
pub mod fake {
  use super::*;
  use std::collections::HashMap;
  use std::sync::{Arc, Mutex};
  use tokio::sync::Notify;

  #[derive(Default)]
  struct Inner {
    routes: HashMap<String, Response>,
    calls: Vec<(String, CacheMode)>,
    offline: bool,
  }

  /// Answers from a fixed route table; unknown URLs fail like a dropped connection.
  #[derive(Clone, Default)]
  pub struct FakeNetwork {
    inner: Arc<Mutex<Inner>>,
    gate: Option<Arc<Notify>>,
  }

  impl FakeNetwork {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn route(self, url: &str, response: Response) -> Self {
      self.set_route(url, response);
      self
    }

    pub fn set_route(&self, url: &str, response: Response) {
      self
        .inner
        .lock()
        .unwrap()
        .routes
        .insert(url.to_string(), response);
    }

    /// Every fetch fails until switched back.
    pub fn set_offline(&self, offline: bool) {
      self.inner.lock().unwrap().offline = offline;
    }

    /// Fetches block until the returned handle is notified.
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
      let gate = Arc::new(Notify::new());
      self.gate = Some(Arc::clone(&gate));
      (self, gate)
    }

    pub fn calls(&self) -> Vec<String> {
      self
        .inner
        .lock()
        .unwrap()
        .calls
        .iter()
        .map(|(url, _)| url.clone())
        .collect()
    }

    pub fn cache_modes(&self) -> Vec<CacheMode> {
      self
        .inner
        .lock()
        .unwrap()
        .calls
        .iter()
        .map(|(_, mode)| *mode)
        .collect()
    }
  }

  impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      let url = request.url.to_string();
      self
        .inner
        .lock()
        .unwrap()
        .calls
        .push((url.clone(), request.cache));

      if let Some(gate) = &self.gate {
        gate.notified().await;
      }

      let inner = self.inner.lock().unwrap();
      if inner.offline {
        return Err(eyre!("network unreachable"));
      }
      inner
        .routes
        .get(&url)
        .cloned()
        .ok_or_else(|| eyre!("connection refused: {}", url))
    }
  }
}
