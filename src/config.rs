use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default Story API base URL.
pub const DEFAULT_API_BASE: &str = "https://story-api.dicoding.dev/v1";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  /// Optional external command printing the current position (JSON with
  /// lat/lon, or a "lat lon" pair). Used when `add` is run with --locate.
  pub geolocate_command: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_API_BASE.to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Cache generation. Bumping it retags both namespaces; stale-tagged
  /// namespaces are deleted on the next activation.
  pub version: u32,
  /// Minutes before locally cached stories are considered stale.
  pub stale_minutes: i64,
  /// Application shell document served to offline navigation requests.
  pub shell_url: Option<String>,
  /// Fixed assets pre-populated into the static namespace by `cache warm`.
  pub assets: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: 1,
      stale_minutes: 5,
      shell_url: None,
      assets: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub backoff_base_secs: u64,
  pub backoff_max_secs: u64,
  pub max_attempts: u32,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      backoff_base_secs: 30,
      backoff_max_secs: 30 * 60,
      max_attempts: 8,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./storycat.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/storycat/config.yaml
  ///
  /// A missing file is not an error; every setting has a default.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Other(format!("config file not found: {}", p.display())));
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
    let local = PathBuf::from("storycat.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("storycat").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)?;
    Self::from_str(&contents)
      .map_err(|e| Error::Other(format!("failed to parse config {}: {}", path.display(), e)))
  }

  fn from_str(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Data directory holding the local store, cache, and log file.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Other("could not determine data directory".into()))?;

    Ok(data_dir.join("storycat"))
  }

  /// Session token from the environment, overriding any stored session.
  pub fn env_token() -> Option<String> {
    std::env::var("STORYCAT_TOKEN").ok().filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.api.base_url, DEFAULT_API_BASE);
    assert_eq!(config.cache.stale_minutes, 5);
    assert_eq!(config.sync.max_attempts, 8);
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_str(
      "cache:\n  version: 3\nsync:\n  max_attempts: 4\n",
    )
    .unwrap();

    assert_eq!(config.cache.version, 3);
    assert_eq!(config.sync.max_attempts, 4);
    assert_eq!(config.api.base_url, DEFAULT_API_BASE);
  }

  #[test]
  fn test_empty_yaml_is_default() {
    // serde_yaml maps an empty document to null, which #[serde(default)]
    // does not cover, so make sure load() tolerates a blank file.
    let config = Config::from_str("{}").unwrap();
    assert_eq!(config.api.base_url, DEFAULT_API_BASE);
  }
}
