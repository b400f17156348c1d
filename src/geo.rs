//! Geolocation collaborator with a bounded wait.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{Error, Result};

/// How long a position request may take before it fails distinguishably.
pub const LOCATE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
  pub lat: f64,
  pub lon: f64,
}

/// A source of the current position. Optional capability: consumers hold
/// `Option<Box<dyn Locator>>` and skip location entirely when absent.
#[async_trait]
pub trait Locator: Send + Sync {
  async fn locate(&self) -> Result<Coordinates>;
}

/// Locator backed by an external command (e.g. `termux-location`,
/// `corelocationcli`) printing either JSON with lat/lon fields or a bare
/// "lat lon" pair.
pub struct CommandLocator {
  command: String,
}

impl CommandLocator {
  pub fn new(command: impl Into<String>) -> Self {
    Self {
      command: command.into(),
    }
  }
}

#[async_trait]
impl Locator for CommandLocator {
  async fn locate(&self) -> Result<Coordinates> {
    let output = Command::new("sh").arg("-c").arg(&self.command).output().await?;
    if !output.status.success() {
      return Err(Error::Other(format!(
        "locator command exited with {}",
        output.status
      )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_coordinates(&stdout)
  }
}

/// Resolve the current position, giving up after `timeout` with an error
/// the caller can tell apart from an unavailable locator.
pub async fn resolve_location(locator: &dyn Locator, timeout: Duration) -> Result<Coordinates> {
  match tokio::time::timeout(timeout, locator.locate()).await {
    Ok(result) => result,
    Err(_) => Err(Error::GeoTimeout(timeout.as_secs())),
  }
}

fn parse_coordinates(output: &str) -> Result<Coordinates> {
  let trimmed = output.trim();

  if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
    let lat = value
      .get("lat")
      .or_else(|| value.get("latitude"))
      .and_then(|v| v.as_f64());
    let lon = value
      .get("lon")
      .or_else(|| value.get("lng"))
      .or_else(|| value.get("longitude"))
      .and_then(|v| v.as_f64());
    if let (Some(lat), Some(lon)) = (lat, lon) {
      return Ok(Coordinates { lat, lon });
    }
  }

  let mut parts = trimmed.split_whitespace();
  if let (Some(lat), Some(lon)) = (parts.next(), parts.next()) {
    if let (Ok(lat), Ok(lon)) = (lat.parse(), lon.parse()) {
      return Ok(Coordinates { lat, lon });
    }
  }

  Err(Error::Other(format!("could not parse locator output: {:?}", trimmed)))
}

#[cfg(test)]
mod tests {
  use super::*;

  struct FixedLocator(Coordinates);

  #[async_trait]
  impl Locator for FixedLocator {
    async fn locate(&self) -> Result<Coordinates> {
      Ok(self.0)
    }
  }

  struct StuckLocator;

  #[async_trait]
  impl Locator for StuckLocator {
    async fn locate(&self) -> Result<Coordinates> {
      tokio::time::sleep(Duration::from_secs(3600)).await;
      unreachable!()
    }
  }

  #[test]
  fn test_parse_json_output() {
    let coords = parse_coordinates(r#"{"latitude": -6.2, "longitude": 106.8, "accuracy": 12}"#)
      .unwrap();
    assert_eq!(coords, Coordinates { lat: -6.2, lon: 106.8 });

    let coords = parse_coordinates(r#"{"lat": 1.5, "lon": 2.5}"#).unwrap();
    assert_eq!(coords, Coordinates { lat: 1.5, lon: 2.5 });
  }

  #[test]
  fn test_parse_pair_output() {
    let coords = parse_coordinates("-6.2 106.8\n").unwrap();
    assert_eq!(coords, Coordinates { lat: -6.2, lon: 106.8 });
  }

  #[test]
  fn test_parse_garbage_fails() {
    assert!(parse_coordinates("no location fix").is_err());
  }

  #[tokio::test]
  async fn test_resolve_within_timeout() {
    let locator = FixedLocator(Coordinates { lat: 1.0, lon: 2.0 });
    let coords = resolve_location(&locator, Duration::from_secs(1)).await.unwrap();
    assert_eq!(coords.lat, 1.0);
  }

  #[tokio::test]
  async fn test_timeout_is_distinguishable() {
    let result = resolve_location(&StuckLocator, Duration::from_millis(10)).await;
    assert!(matches!(result, Err(Error::GeoTimeout(_))));
  }
}
