use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::agent::{ActivateReport, InstallReport, OfflineAgent};
use crate::cache::CacheStorage;
use crate::http::Request;
use crate::lifecycle::WorkerState;
use crate::network::Network;
use crate::strategy::Handled;

/// Lifecycle and request events delivered to the worker
#[derive(Debug)]
pub enum Event {
  Install {
    reply: oneshot::Sender<Result<Boot>>,
  },
  /// Intercepted request
  Fetch {
    request: Request,
    reply: oneshot::Sender<Option<Handled>>,
  },
  /// Control message posted by a page
  Message {
    data: serde_json::Value,
    reply: oneshot::Sender<Result<Option<ActivateReport>>>,
  },
  /// Every page controlled by the previous worker was closed
  ClientsClosed {
    reply: oneshot::Sender<Result<Option<ActivateReport>>>,
  },
  State {
    reply: oneshot::Sender<WorkerState>,
  },
}

/// Install results, plus activation if the worker did not have to wait.
#[derive(Debug)]
pub struct Boot {
  pub install: InstallReport,
  pub activation: Option<ActivateReport>,
}

/// Runs the worker the way a browser would: one event at a time, with each
/// fetch answered by its own task.
pub struct WorkerHost<S: CacheStorage, N: Network> {
  agent: OfflineAgent<S, N>,
  rx: mpsc::UnboundedReceiver<Event>,
  /// Pages still controlled by the previous worker
  open_clients: usize,
}

impl<S: CacheStorage, N: Network> WorkerHost<S, N> {
  /// Start the event loop and return a handle for posting events.
  pub fn spawn(agent: OfflineAgent<S, N>, open_clients: usize) -> HostHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let host = Self {
      agent,
      rx,
      open_clients,
    };
    tokio::spawn(host.run());
    HostHandle { tx }
  }

  async fn run(mut self) {
    while let Some(event) = self.rx.recv().await {
      match event {
        Event::Install { reply } => {
          let result = self.install().await;
          let _ = reply.send(result);
        }
        Event::Fetch { request, reply } => {
          if !self.agent.lifecycle().is_active() {
            // Not controlling pages yet; the browser handles it
            let _ = reply.send(None);
            continue;
          }
          let dispatcher = self.agent.dispatcher();
          tokio::spawn(async move {
            let handled = dispatcher.handle(&request).await;
            let _ = reply.send(handled);
          });
        }
        Event::Message { data, reply } => {
          let result = if self.agent.handle_message(&data) {
            self.try_activate().await
          } else {
            Ok(None)
          };
          let _ = reply.send(result);
        }
        Event::ClientsClosed { reply } => {
          self.open_clients = 0;
          let _ = reply.send(self.try_activate().await);
        }
        Event::State { reply } => {
          let _ = reply.send(self.agent.state());
        }
      }
    }
    debug!("worker host stopped");
  }

  async fn install(&mut self) -> Result<Boot> {
    let install = self.agent.install().await?;
    let activation = self.try_activate().await?;
    Ok(Boot {
      install,
      activation,
    })
  }

  /// Activate a waiting worker if nothing holds it back.
  async fn try_activate(&mut self) -> Result<Option<ActivateReport>> {
    if !self.agent.lifecycle().can_activate(self.open_clients) {
      if self.agent.lifecycle().is_waiting() {
        info!(
          open_clients = self.open_clients,
          skip_waiting = self.agent.lifecycle().skip_waiting_requested(),
          "waiting for old clients to close"
        );
      }
      return Ok(None);
    }
    self.agent.activate().await.map(Some)
  }
}

/// Sends events to a running [`WorkerHost`].
#[derive(Clone)]
pub struct HostHandle {
  tx: mpsc::UnboundedSender<Event>,
}

impl HostHandle {
  pub async fn install(&self) -> Result<Boot> {
    self.call(|reply| Event::Install { reply }).await?
  }

  /// Dispatch a request. None means the worker left it to the browser.
  pub async fn fetch(&self, request: Request) -> Result<Option<Handled>> {
    self.call(|reply| Event::Fetch { request, reply }).await
  }

  pub async fn post_message(&self, data: serde_json::Value) -> Result<Option<ActivateReport>> {
    self.call(|reply| Event::Message { data, reply }).await?
  }

  pub async fn clients_closed(&self) -> Result<Option<ActivateReport>> {
    self.call(|reply| Event::ClientsClosed { reply }).await?
  }

  pub async fn state(&self) -> Result<WorkerState> {
    self.call(|reply| Event::State { reply }).await
  }

  async fn call<T>(&self, event: impl FnOnce(oneshot::Sender<T>) -> Event) -> Result<T> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(event(reply))
      .map_err(|_| eyre!("Worker host stopped"))?;
    rx.await.map_err(|_| eyre!("Worker host dropped the reply"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::agent::AgentSettings;
  use crate::cache::{MemoryStorage, ServedFrom};
  use crate::config::Config;
  use crate::http::{Destination, Response};
  use crate::network::fake::FakeNetwork;
  use serde_json::json;
  use std::sync::Arc;
  use url::Url;

  const SCOPE: &str = "https://games.test/sfg/";

  fn settings(skip_waiting_on_install: bool) -> AgentSettings {
    let config = Config {
      skip_waiting_on_install,
      ..Config::default()
    };
    AgentSettings::from_config(&config, &Url::parse(SCOPE).unwrap()).unwrap()
  }

  fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
  }

  fn network() -> FakeNetwork {
    FakeNetwork::new()
      .route(&format!("{SCOPE}index.html"), Response::new(200, "boot"))
      .route(&format!("{SCOPE}icons/app-icon-192.png"), Response::new(200, "icon"))
  }

  fn spawn(
    network: FakeNetwork,
    skip_waiting_on_install: bool,
    open_clients: usize,
  ) -> (HostHandle, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let agent = OfflineAgent::new(
      Arc::clone(&storage),
      Arc::new(network),
      settings(skip_waiting_on_install),
    )
    .unwrap();
    (WorkerHost::spawn(agent, open_clients), storage)
  }

  #[tokio::test]
  async fn test_install_skips_waiting_and_activates() {
    let (host, _) = spawn(network(), true, 3);
    let boot = host.install().await.unwrap();
    assert!(boot.activation.is_some());
    assert_eq!(host.state().await.unwrap(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_skip_waiting_message_activates_waiting_worker() {
    let storage = Arc::new(MemoryStorage::new());
    storage.open("sfg-cache-sfg-v0.1.0").unwrap();
    let agent = OfflineAgent::new(Arc::clone(&storage), Arc::new(network()), settings(false)).unwrap();
    let host = WorkerHost::spawn(agent, 1);

    let boot = host.install().await.unwrap();
    assert!(boot.activation.is_none());
    assert_eq!(host.state().await.unwrap(), WorkerState::Waiting);

    // Ignored shapes leave it waiting
    assert!(host.post_message(json!({ "type": "HELLO" })).await.unwrap().is_none());
    assert_eq!(host.state().await.unwrap(), WorkerState::Waiting);

    let activation = host
      .post_message(json!({ "type": "SKIP_WAITING" }))
      .await
      .unwrap()
      .expect("activation");
    assert_eq!(activation.deleted, vec!["sfg-cache-sfg-v0.1.0"]);
    assert_eq!(host.state().await.unwrap(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_closing_clients_activates_waiting_worker() {
    let (host, _) = spawn(network(), false, 2);
    host.install().await.unwrap();
    assert_eq!(host.state().await.unwrap(), WorkerState::Waiting);

    assert!(host.clients_closed().await.unwrap().is_some());
    assert_eq!(host.state().await.unwrap(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_fetch_before_activation_is_left_to_browser() {
    let (host, _) = spawn(network(), false, 1);
    host.install().await.unwrap();
    assert!(host
      .fetch(Request::navigate(url("index.html")))
      .await
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_offline_after_boot() {
    let network = network();
    let (host, _) = spawn(network.clone(), true, 0);
    host.install().await.unwrap();
    network.set_offline(true);

    let page = host
      .fetch(Request::navigate(url("play")))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(page.served.source, ServedFrom::BootPage);
    assert_eq!(page.served.response.body, b"boot");

    let icon = host
      .fetch(Request::get(url("icons/app-icon-192.png")).with_destination(Destination::Image))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(icon.served.source, ServedFrom::Cache);

    let clip = host
      .fetch(Request::get(url("audio/cat.mp3")).with_destination(Destination::Audio))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(clip.served.response.status, 404);
  }
}
