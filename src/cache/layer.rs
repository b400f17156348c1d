//! Edge cache that orchestrates caching strategy with network fetching.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use super::storage::CacheStorage;
use super::traits::{CacheOutcome, CacheRequest, CachedResponse, RequestClass};
use crate::error::Result;

/// File extensions treated as immutable static assets.
const STATIC_EXTENSIONS: &[&str] = &[
  "css", "js", "png", "jpg", "jpeg", "webp", "gif", "svg", "ico", "woff", "woff2",
];

/// Intercepts GET requests and applies a per-class caching strategy.
///
/// Only GET is cached; every other method passes straight through to the
/// network, uninterpreted. Write semantics belong to the sync engine.
pub struct EdgeCache<S: CacheStorage> {
  storage: Arc<S>,
  /// Prefix identifying Story API requests.
  api_prefix: String,
  static_ns: String,
  dynamic_ns: String,
  /// Application shell served to offline navigation requests, if cached.
  shell_url: Option<String>,
}

impl<S: CacheStorage> EdgeCache<S> {
  pub fn new(storage: Arc<S>, api_base: &Url, version: u32) -> Self {
    Self {
      storage,
      api_prefix: api_base.as_str().trim_end_matches('/').to_string(),
      static_ns: format!("storycat-static-v{}", version),
      dynamic_ns: format!("storycat-dynamic-v{}", version),
      shell_url: None,
    }
  }

  pub fn with_shell(mut self, shell_url: Option<String>) -> Self {
    self.shell_url = shell_url;
    self
  }

  pub fn static_namespace(&self) -> &str {
    &self.static_ns
  }

  pub fn dynamic_namespace(&self) -> &str {
    &self.dynamic_ns
  }

  /// Classify a request by its URL and headers.
  pub fn classify(&self, request: &CacheRequest) -> RequestClass {
    if request.url.as_str().starts_with(&self.api_prefix) {
      return RequestClass::Api;
    }
    if request.accept_html {
      return RequestClass::Navigation;
    }

    let path = request.url.path();
    let extension = path.rsplit('/').next().and_then(|f| f.rsplit_once('.')).map(|(_, ext)| ext);
    match extension {
      Some(ext) if STATIC_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => {
        RequestClass::StaticAsset
      }
      Some("html") | None => RequestClass::Navigation,
      _ => RequestClass::Other,
    }
  }

  /// Route a request through the cache.
  ///
  /// `fetch` performs the actual network call; it is only invoked when
  /// the strategy for the request class requires the network.
  pub async fn handle<F, Fut>(&self, request: &CacheRequest, fetch: F) -> Result<CacheOutcome>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    if !request.is_get() {
      // Pass through uncached; offline write handling is not our concern.
      let response = fetch().await?;
      return Ok(CacheOutcome::from_network(response));
    }

    let class = self.classify(request);
    debug!(url = %request.url, ?class, "handling request");

    match class {
      RequestClass::StaticAsset => self.cache_first(request, fetch).await,
      RequestClass::Api => {
        self
          .network_first(request, fetch, &self.dynamic_ns, CachedResponse::offline_json)
          .await
      }
      RequestClass::Navigation => {
        let outcome = self
          .network_first(request, fetch, &self.dynamic_ns, CachedResponse::offline_text)
          .await?;
        Ok(self.with_shell_fallback(outcome))
      }
      RequestClass::Other => {
        self
          .network_first(request, fetch, &self.dynamic_ns, CachedResponse::offline_text)
          .await
      }
    }
  }

  /// Cache-first: once cached, the asset is served without a network
  /// check until its namespace is purged.
  async fn cache_first<F, Fut>(&self, request: &CacheRequest, fetch: F) -> Result<CacheOutcome>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let url = request.url.as_str();
    if let Some((cached, cached_at)) = self.storage.get(&self.static_ns, url)? {
      return Ok(CacheOutcome::from_cache(cached, cached_at));
    }

    match fetch().await {
      Ok(response) => {
        if response.is_success() {
          self.store(&self.static_ns, url, &response);
        }
        Ok(CacheOutcome::from_network(response))
      }
      Err(e) if e.is_retryable() => {
        debug!(url, "static asset unavailable offline");
        Ok(CacheOutcome::synthesized(CachedResponse::offline_text()))
      }
      Err(e) => Err(e),
    }
  }

  /// Network-first: always try the network, copy successful responses
  /// into the cache, and fall back to the most recent cached copy. With
  /// nothing cached, serve the synthesized offline response.
  async fn network_first<F, Fut>(
    &self,
    request: &CacheRequest,
    fetch: F,
    namespace: &str,
    fallback: fn() -> CachedResponse,
  ) -> Result<CacheOutcome>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let url = request.url.as_str();
    match fetch().await {
      Ok(response) => {
        // Only successful responses are worth replaying offline.
        if response.is_success() {
          self.store(namespace, url, &response);
        }
        Ok(CacheOutcome::from_network(response))
      }
      Err(e) if e.is_retryable() => match self.storage.get(namespace, url)? {
        Some((cached, cached_at)) => {
          debug!(url, "serving cached response while offline");
          Ok(CacheOutcome::offline(cached, cached_at))
        }
        None => Ok(CacheOutcome::synthesized(fallback())),
      },
      Err(e) => Err(e),
    }
  }

  /// Swap a synthesized navigation fallback for the cached application
  /// shell when one is available.
  fn with_shell_fallback(&self, outcome: CacheOutcome) -> CacheOutcome {
    if !matches!(outcome.source, super::traits::ResponseSource::Synthesized) {
      return outcome;
    }
    let Some(shell_url) = &self.shell_url else {
      return outcome;
    };
    match self.storage.get(&self.static_ns, shell_url) {
      Ok(Some((shell, cached_at))) => CacheOutcome::offline(shell, cached_at),
      _ => outcome,
    }
  }

  /// Pre-populate the static namespace, fetching assets concurrently. A
  /// failing asset is skipped so one dead URL cannot abort the whole
  /// install; returns how many were cached.
  pub async fn install<F, Fut>(&self, assets: &[Url], fetch: F) -> Result<usize>
  where
    F: Fn(Url) -> Fut,
    Fut: Future<Output = Result<CachedResponse>>,
  {
    let results = join_all(assets.iter().cloned().map(|url| {
      let response = fetch(url.clone());
      async move { (url, response.await) }
    }))
    .await;

    let mut cached = 0;
    for (url, result) in results {
      match result {
        Ok(response) if response.is_success() => {
          self.storage.put(&self.static_ns, url.as_str(), &response)?;
          cached += 1;
        }
        Ok(response) => {
          warn!(url = %url, status = response.status, "skipping asset");
        }
        Err(e) => {
          warn!(url = %url, error = %e, "failed to pre-cache asset");
        }
      }
    }
    info!(cached, total = assets.len(), "static cache installed");
    Ok(cached)
  }

  /// Purge every namespace whose version tag is not in the current set.
  /// Returns the names of the deleted namespaces.
  pub fn activate(&self) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for namespace in self.storage.namespaces()? {
      if namespace != self.static_ns && namespace != self.dynamic_ns {
        info!(%namespace, "deleting stale cache namespace");
        self.storage.drop_namespace(&namespace)?;
        removed.push(namespace);
      }
    }
    Ok(removed)
  }

  /// Cache failures must not fail the request being served.
  fn store(&self, namespace: &str, url: &str, response: &CachedResponse) {
    if let Err(e) = self.storage.put(namespace, url, response) {
      warn!(url, error = %e, "failed to cache response");
    }
  }
}

impl<S: CacheStorage> Clone for EdgeCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      api_prefix: self.api_prefix.clone(),
      static_ns: self.static_ns.clone(),
      dynamic_ns: self.dynamic_ns.clone(),
      shell_url: self.shell_url.clone(),
    }
  }
}
