mod agent;
mod cache;
mod config;
mod event;
mod http;
mod lifecycle;
mod network;
mod strategy;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::agent::{AgentSettings, OfflineAgent};
use crate::cache::{AssetOutcome, CacheStorage, MemoryStorage, ServedFrom, SqliteStorage};
use crate::event::WorkerHost;
use crate::http::{Destination, Request, RequestMode};
use crate::network::HttpNetwork;

#[derive(Parser, Debug)]
#[command(name = "sfg-offline")]
#[command(about = "Offline cache agent for the Speech Fun Games web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/sfg-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Base URL of the app, overrides the config file
  #[arg(short, long)]
  scope: Option<Url>,

  /// Keep the cache in memory instead of the SQLite database
  #[arg(long)]
  memory: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current version and activate it once allowed
  Boot {
    /// Pages still controlled by the previous worker
    #[arg(long, default_value_t = 0)]
    clients: usize,

    /// JSON control message to post after install, e.g. '{"type":"SKIP_WAITING"}'
    #[arg(long)]
    message: Option<String>,

    /// Close the previous worker's pages after install, letting a waiting worker activate
    #[arg(long)]
    close_clients: bool,
  },
  /// Dispatch requests through the active worker
  Fetch {
    /// URLs or paths relative to the scope
    #[arg(required = true)]
    urls: Vec<String>,

    #[arg(long, value_enum, default_value_t = Kind::Other)]
    kind: Kind,

    #[arg(long, default_value = "GET")]
    method: String,
  },
  /// List cache stores
  Caches,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
  Navigate,
  Image,
  Audio,
  Script,
  Style,
  Manifest,
  Other,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override scope if specified on command line
  let config = if let Some(scope) = args.scope.clone() {
    config::Config {
      scope: Some(scope),
      ..config
    }
  } else {
    config
  };

  let _guard = init_tracing(config.log_file.as_deref())?;

  if args.memory {
    run(Arc::new(MemoryStorage::new()), &config, args.command).await
  } else {
    let storage = SqliteStorage::open(config.database.as_deref())?;
    run(Arc::new(storage), &config, args.command).await
  }
}

async fn run<S: CacheStorage>(storage: Arc<S>, config: &config::Config, command: Command) -> Result<()> {
  match command {
    Command::Boot {
      clients,
      message,
      close_clients,
    } => boot(storage, config, clients, message, close_clients).await,
    Command::Fetch { urls, kind, method } => fetch(storage, config, urls, kind, &method).await,
    Command::Caches => {
      let current = config.version().store_name();
      for name in storage.keys()? {
        let marker = if name == current { "*" } else { " " };
        println!("{} {}", marker, name);
      }
      Ok(())
    }
  }
}

async fn boot<S: CacheStorage>(
  storage: Arc<S>,
  config: &config::Config,
  clients: usize,
  message: Option<String>,
  close_clients: bool,
) -> Result<()> {
  let settings = AgentSettings::from_config(config, config.scope()?)?;
  let agent = OfflineAgent::new(storage, Arc::new(HttpNetwork::new()?), settings)?;
  let host = WorkerHost::spawn(agent, clients);

  let boot = host.install().await?;
  println!(
    "installed {}: {}/{} core assets",
    boot.install.store,
    boot.install.cached(),
    boot.install.assets.len()
  );
  for asset in &boot.install.assets {
    match asset {
      AssetOutcome::Cached { url } => println!("  cached  {}", url),
      AssetOutcome::Skipped { url, reason } => println!("  skipped {} ({})", url, reason),
    }
  }

  let mut activation = boot.activation;
  if let Some(message) = message {
    let data: serde_json::Value = serde_json::from_str(&message)
      .map_err(|e| eyre!("Invalid message JSON {}: {}", message, e))?;
    if let Some(report) = host.post_message(data).await? {
      activation = Some(report);
    }
  }

  if close_clients {
    if let Some(report) = host.clients_closed().await? {
      activation = Some(report);
    }
  }

  if let Some(report) = activation {
    for name in &report.deleted {
      println!("deleted {}", name);
    }
    for name in &report.failed {
      println!("could not delete {}", name);
    }
  }
  println!("state: {}", host.state().await?);

  Ok(())
}

async fn fetch<S: CacheStorage>(
  storage: Arc<S>,
  config: &config::Config,
  urls: Vec<String>,
  kind: Kind,
  method: &str,
) -> Result<()> {
  let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
  let scope = config.scope()?;
  let settings = AgentSettings::from_config(config, scope)?;
  let agent = OfflineAgent::resume(storage, Arc::new(HttpNetwork::new()?), settings)?;
  let host = WorkerHost::spawn(agent, 0);

  let mut refreshes = Vec::new();
  let mut unanswered = 0;
  for target in &urls {
    let url = scope
      .join(target)
      .map_err(|e| eyre!("Invalid URL {}: {}", target, e))?;
    let request = build_request(url, kind).with_method(method.clone());

    let Some(handled) = host.fetch(request).await? else {
      println!("--- {} not handled", target);
      continue;
    };

    let served = &handled.served;
    println!(
      "{} {} {} via {} ({} bytes, {})",
      served.response.status,
      target,
      served.source,
      handled.strategy,
      served.response.body.len(),
      served.response.header("content-type").unwrap_or("no content-type")
    );
    if let Some(cached_at) = served.cached_at {
      println!("    cached at {}", cached_at.to_rfc3339());
    }
    if served.source == ServedFrom::Synthesized {
      unanswered += 1;
    }
    refreshes.extend(handled.refresh);
  }

  for refresh in refreshes {
    refresh
      .await
      .map_err(|e| eyre!("Background refresh panicked: {}", e))?;
  }

  if unanswered > 0 {
    println!("{} of {} requests had neither network nor cache", unanswered, urls.len());
  }

  Ok(())
}

fn build_request(url: Url, kind: Kind) -> Request {
  match kind {
    Kind::Navigate => Request::navigate(url),
    Kind::Image => Request::get(url).with_destination(Destination::Image),
    Kind::Audio => Request::get(url).with_destination(Destination::Audio),
    Kind::Script => Request::get(url).with_destination(Destination::Script),
    Kind::Style => Request::get(url).with_destination(Destination::Style),
    Kind::Manifest => Request::get(url)
      .with_destination(Destination::Manifest)
      .with_mode(RequestMode::Cors),
    Kind::Other => Request::get(url),
  }
}

/// Log to stderr, or to a daily-rolled file when one is configured.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let Some(path) = log_file else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  };

  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_boot_parses_close_clients() {
    let args = Args::try_parse_from(["sfg-offline", "boot", "--clients", "2", "--close-clients"]).unwrap();
    match args.command {
      Command::Boot {
        clients,
        message,
        close_clients,
      } => {
        assert_eq!(clients, 2);
        assert!(message.is_none());
        assert!(close_clients);
      }
      other => panic!("unexpected command {:?}", other),
    }
  }
}
