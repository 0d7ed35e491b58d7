use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::CacheVersion;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL the worker controls; relative asset paths resolve against it
  pub scope: Option<Url>,
  pub cache: CacheConfig,
  /// Paths needed to boot offline, precached at install
  pub core_assets: Vec<String>,
  /// Page served for navigations that have no cached entry of their own
  pub boot_page: String,
  /// Request the waiting phase be skipped as soon as install completes
  pub skip_waiting_on_install: bool,
  /// SQLite database path (default: $XDG_DATA_HOME/sfg-offline/cache.db)
  pub database: Option<PathBuf>,
  /// Write logs to this file instead of stderr
  pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix shared by every version's store name
  pub family: String,
  pub version: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      family: "sfg-cache-".to_string(),
      version: "sfg-v1.0.0".to_string(),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      scope: None,
      cache: CacheConfig::default(),
      core_assets: [
        "./",
        "./index.html",
        "./manifest.json",
        "./icons/speaker_darkpink_32px.png",
        "./icons/speaker_darkpink_48px.png",
        "./icons/speaker_darkpink_64px.png",
        "./icons/app-icon-192.png",
        "./icons/app-icon-512.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      boot_page: "./index.html".to_string(),
      skip_waiting_on_install: true,
      database: None,
      log_file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./sfg-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/sfg-offline/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("sfg-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("sfg-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  pub fn version(&self) -> CacheVersion {
    CacheVersion::new(&self.cache.family, &self.cache.version)
  }

  /// The scope, which must be set either in the file or on the command line.
  pub fn scope(&self) -> Result<&Url> {
    self
      .scope
      .as_ref()
      .ok_or_else(|| eyre!("No scope configured. Pass --scope or set `scope` in the config file."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.version().store_name(), "sfg-cache-sfg-v1.0.0");
    assert_eq!(config.core_assets.len(), 8);
    assert_eq!(config.core_assets[0], "./");
    assert_eq!(config.boot_page, "./index.html");
    assert!(config.skip_waiting_on_install);
    assert!(config.scope().is_err());
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse(
      "scope: https://games.test/sfg/\n\
       cache:\n  version: sfg-v2.0.0\n",
    )
    .unwrap();

    assert_eq!(config.scope().unwrap().as_str(), "https://games.test/sfg/");
    assert_eq!(config.version().store_name(), "sfg-cache-sfg-v2.0.0");
    assert_eq!(config.core_assets.len(), 8);
  }

  #[test]
  fn test_asset_list_override() {
    let config = Config::parse("core_assets: ['./', './app.js']\nskip_waiting_on_install: false\n").unwrap();
    assert_eq!(config.core_assets, vec!["./", "./app.js"]);
    assert!(!config.skip_waiting_on_install);
  }

  #[test]
  fn test_missing_explicit_path_errors() {
    assert!(Config::load(Some(Path::new("/nonexistent/sfg-offline.yaml"))).is_err());
  }
}
