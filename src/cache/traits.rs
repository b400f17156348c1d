//! Request/response model for the edge cache.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::Result;

/// Offline message served when an API request cannot be satisfied.
pub const OFFLINE_MESSAGE: &str = "You are offline. Please check your connection.";

/// How a request is treated by the cache layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Fixed assets (shell files, images): cache-first.
  StaticAsset,
  /// Story API calls: network-first with a structured JSON fallback.
  Api,
  /// Document loads: network-first, falling back to the cached shell.
  Navigation,
  /// Everything else: network-first with a plain-text fallback.
  Other,
}

/// An outgoing request as seen by the cache layer.
#[derive(Debug, Clone)]
pub struct CacheRequest {
  pub method: String,
  pub url: Url,
  /// Whether the requester accepts an HTML document (navigation).
  pub accept_html: bool,
}

impl CacheRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".into(),
      url,
      accept_html: false,
    }
  }

  #[allow(dead_code)]
  pub fn navigation(url: Url) -> Self {
    Self {
      method: "GET".into(),
      url,
      accept_html: true,
    }
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }
}

/// A response snapshot as stored in (and served from) the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub status: u16,
  pub content_type: String,
  pub body: Vec<u8>,
}

impl CachedResponse {
  pub fn new(status: u16, content_type: impl Into<String>, body: Vec<u8>) -> Self {
    Self {
      status,
      content_type: content_type.into(),
      body,
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == 200
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
    Ok(serde_json::from_slice(&self.body)?)
  }

  /// Structured offline error for API requests: machine-readable, never a
  /// raw network failure.
  pub fn offline_json() -> Self {
    let body = serde_json::json!({
      "error": true,
      "message": OFFLINE_MESSAGE,
    });
    Self::new(503, "application/json", body.to_string().into_bytes())
  }

  /// Plain-text offline fallback for non-API requests.
  pub fn offline_text() -> Self {
    Self::new(
      503,
      "text/plain",
      b"Offline - No cached content available".to_vec(),
    )
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network.
  Network,
  /// Cache hit while the network was never consulted (cache-first).
  Cache,
  /// Cached copy served because the network failed.
  OfflineCache,
  /// Synthesized offline fallback; nothing cached matched.
  Synthesized,
}

/// The result of routing a request through the cache layer.
#[derive(Debug, Clone)]
pub struct CacheOutcome {
  pub response: CachedResponse,
  pub source: ResponseSource,
  pub cached_at: Option<DateTime<Utc>>,
}

impl CacheOutcome {
  pub fn from_network(response: CachedResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(response: CachedResponse, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  pub fn offline(response: CachedResponse, cached_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ResponseSource::OfflineCache,
      cached_at: Some(cached_at),
    }
  }

  pub fn synthesized(response: CachedResponse) -> Self {
    Self {
      response,
      source: ResponseSource::Synthesized,
      cached_at: None,
    }
  }

  /// True when the response was not produced by a live network fetch.
  pub fn served_offline(&self) -> bool {
    matches!(
      self.source,
      ResponseSource::OfflineCache | ResponseSource::Synthesized
    )
  }
}
