//! The offline cache agent: reacts to install, activate, fetch and message events.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{AssetOutcome, CacheLayer, CacheStorage, CacheVersion};
use crate::config::Config;
use crate::http::{CacheMode, Request};
use crate::lifecycle::{Lifecycle, WorkerState};
use crate::network::Network;
use crate::strategy::Dispatcher;

/// Control messages accepted from pages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
  /// Leave the waiting phase without waiting for old pages to close
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
}

impl Message {
  /// Parse a posted message. Any unrecognised shape yields None.
  pub fn parse(data: &serde_json::Value) -> Option<Self> {
    serde_json::from_value(data.clone()).ok()
  }
}

/// Per-asset results of the install pass.
#[derive(Debug, Clone)]
pub struct InstallReport {
  pub store: String,
  pub assets: Vec<AssetOutcome>,
}

impl InstallReport {
  pub fn cached(&self) -> usize {
    self.assets.iter().filter(|a| a.is_cached()).count()
  }

  pub fn skipped(&self) -> impl Iterator<Item = &AssetOutcome> {
    self.assets.iter().filter(|a| !a.is_cached())
  }
}

#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
  /// Superseded stores that were removed
  pub deleted: Vec<String>,
  /// Superseded stores that could not be removed; retried on the next activation
  pub failed: Vec<String>,
}

/// Everything the agent needs to know about the app it serves.
#[derive(Debug, Clone)]
pub struct AgentSettings {
  pub version: CacheVersion,
  pub core_assets: Vec<Url>,
  pub boot_page: Url,
  pub skip_waiting_on_install: bool,
}

impl AgentSettings {
  /// Resolve the configured relative paths against the scope.
  pub fn from_config(config: &Config, scope: &Url) -> Result<Self> {
    let resolve = |path: &str| {
      scope
        .join(path)
        .map_err(|e| eyre!("Invalid asset path {}: {}", path, e))
    };

    Ok(Self {
      version: config.version(),
      core_assets: config
        .core_assets
        .iter()
        .map(|p| resolve(p))
        .collect::<Result<_>>()?,
      boot_page: resolve(&config.boot_page)?,
      skip_waiting_on_install: config.skip_waiting_on_install,
    })
  }
}

pub struct OfflineAgent<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  layer: CacheLayer<S, N>,
  settings: AgentSettings,
  lifecycle: Lifecycle,
}

impl<S: CacheStorage, N: Network> OfflineAgent<S, N> {
  /// A freshly registered worker, about to install.
  pub fn new(storage: Arc<S>, network: Arc<N>, settings: AgentSettings) -> Result<Self> {
    let layer = CacheLayer::open(Arc::clone(&storage), network, &settings.version.store_name())?;
    Ok(Self {
      storage,
      layer,
      settings,
      lifecycle: Lifecycle::new(),
    })
  }

  /// The worker that a previous run already installed and activated.
  pub fn resume(storage: Arc<S>, network: Arc<N>, settings: AgentSettings) -> Result<Self> {
    let mut agent = Self::new(storage, network, settings)?;
    agent.lifecycle.installed()?;
    agent.lifecycle.begin_activation()?;
    agent.lifecycle.claim_clients()?;
    agent.lifecycle.activated()?;
    Ok(agent)
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle.state()
  }

  pub fn lifecycle(&self) -> &Lifecycle {
    &self.lifecycle
  }

  /// Answers fetches against the current store.
  pub fn dispatcher(&self) -> Dispatcher<S, N> {
    Dispatcher::new(self.layer.clone(), self.settings.boot_page.clone())
  }

  /// Precache the core assets, best-effort, then ask to skip waiting.
  ///
  /// Never fails because of a missing asset; each one is reported as cached
  /// or skipped. Only an invalid lifecycle state is an error.
  pub async fn install(&mut self) -> Result<InstallReport> {
    if self.lifecycle.state() != WorkerState::Installing {
      return Err(eyre!("Cannot install while {}", self.lifecycle.state()));
    }

    let requests = self
      .settings
      .core_assets
      .iter()
      .map(|url| Request::get(url.clone()).with_cache_mode(CacheMode::NoCache))
      .collect();
    let assets = self.layer.add_all(requests).await;

    let report = InstallReport {
      store: self.layer.name().to_string(),
      assets,
    };
    for skipped in report.skipped() {
      if let AssetOutcome::Skipped { url, reason } = skipped {
        warn!(%url, %reason, "core asset not cached");
      }
    }
    info!(
      store = %report.store,
      cached = report.cached(),
      total = report.assets.len(),
      "installed"
    );

    self.lifecycle.installed()?;
    if self.settings.skip_waiting_on_install {
      self.lifecycle.skip_waiting();
    }

    Ok(report)
  }

  /// Delete every superseded store of this app, then claim open pages.
  ///
  /// Cleanup is best-effort: a store that cannot be listed or deleted is
  /// logged and reported, and the worker still becomes active.
  pub async fn activate(&mut self) -> Result<ActivateReport> {
    self.lifecycle.begin_activation()?;

    let mut report = ActivateReport::default();
    let names = self.storage.keys().unwrap_or_else(|e| {
      warn!(error = %e, "failed to list stores");
      Vec::new()
    });
    for name in names {
      if !self.settings.version.is_superseded(&name) {
        continue;
      }
      match self.storage.delete(&name) {
        Ok(true) => {
          info!(store = %name, "deleted superseded store");
          report.deleted.push(name);
        }
        Ok(false) => {}
        Err(e) => {
          warn!(store = %name, error = %e, "failed to delete superseded store");
          report.failed.push(name);
        }
      }
    }

    self.lifecycle.claim_clients()?;
    self.lifecycle.activated()?;
    info!(
      store = self.layer.name(),
      clients_claimed = self.lifecycle.clients_claimed(),
      "activated"
    );

    Ok(report)
  }

  /// Handle a posted message. Returns true when it asked to skip waiting.
  pub fn handle_message(&mut self, data: &serde_json::Value) -> bool {
    match Message::parse(data) {
      Some(Message::SkipWaiting) => {
        info!(state = %self.lifecycle.state(), "skip waiting requested");
        self.lifecycle.skip_waiting();
        true
      }
      None => false,
    }
  }
}
