//! Request and response types shared by the cache, the network, and the agent.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// How the request was initiated by the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Full document load (address bar, link click, reload)
  Navigate,
  #[default]
  NoCors,
  Cors,
}

/// What the requested resource will be used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  Document,
  Image,
  Audio,
  Script,
  Style,
  Manifest,
  #[default]
  Empty,
}

/// Whether the request may be answered by intermediate HTTP caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
  #[default]
  Default,
  /// Revalidate with the origin before using any HTTP cache
  NoCache,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub destination: Destination,
  pub cache: CacheMode,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      destination: Destination::default(),
      cache: CacheMode::default(),
    }
  }

  /// A top-level document load.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      ..Self::get(url)
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_cache_mode(mut self, cache: CacheMode) -> Self {
    self.cache = cache;
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }

  /// Key under which this request's response is stored.
  pub fn cache_key(&self) -> CacheKey {
    CacheKey {
      method: self.method.as_str().to_string(),
      url: self.url.to_string(),
    }
  }
}

/// Request descriptor used as the cache key (URL + method).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub method: String,
  pub url: String,
}

/// A response, whether live, cached, or synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string(),
      headers: Vec::new(),
      body: body.into(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Returned for a navigation when neither network nor cache can answer.
  pub fn offline() -> Self {
    Self {
      status_text: "Offline".to_string(),
      ..Self::new(503, "Offline")
    }
  }

  /// Returned for a sub-resource when neither network nor cache can answer.
  pub fn not_found() -> Self {
    Self::new(404, Vec::new())
  }

  /// True for 2xx statuses.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
