//! Story client with edge-cache-mediated reads.
//!
//! Wraps the underlying API client with the same surface, but routes GET
//! requests through the edge cache so reads keep working offline. Writes
//! pass straight through; queueing them is the sync engine's job.

use async_trait::async_trait;
use url::Url;

use crate::cache::{CacheRequest, EdgeCache, ResponseSource, SqliteCacheStorage};
use crate::domain::{Story, StoryDraft};
use crate::error::{Error, Result};

use super::client::{StoryApiClient, StoryBackend};
use super::types::ApiStoryListResponse;

pub struct CachedStoryClient {
  inner: StoryApiClient,
  edge: EdgeCache<SqliteCacheStorage>,
}

impl CachedStoryClient {
  pub fn new(inner: StoryApiClient, edge: EdgeCache<SqliteCacheStorage>) -> Self {
    Self { inner, edge }
  }

  pub fn edge(&self) -> &EdgeCache<SqliteCacheStorage> {
    &self.edge
  }

  /// List stories through the edge cache. The second element reports
  /// where the payload came from, so callers can flag offline data.
  pub async fn list_stories(
    &self,
    page: Option<u32>,
    size: Option<u32>,
  ) -> Result<(Vec<Story>, ResponseSource)> {
    let url = self.inner.stories_url(page, size)?;
    let request = CacheRequest::get(url.clone());

    let inner = self.inner.clone();
    let outcome = self
      .edge
      .handle(&request, move || async move { inner.fetch_raw(url).await })
      .await?;

    let parsed: ApiStoryListResponse = outcome.response.json()?;
    if parsed.error {
      // A synthesized offline payload means the network is down and the
      // cache is empty; report it as such so callers fall back to the
      // local store instead of treating it as a server rejection.
      return Err(match outcome.source {
        ResponseSource::Synthesized => Error::Offline(parsed.message),
        _ => Error::Api(parsed.message),
      });
    }

    if outcome.served_offline() {
      tracing::info!("serving stories from the offline response cache");
    }

    let stories = parsed.list_story.into_iter().map(|s| s.into_story()).collect();
    Ok((stories, outcome.source))
  }

  /// Pre-populate the static namespace with story photos and configured
  /// shell assets. Returns how many responses were cached.
  pub async fn warm_static_cache(&self, stories: &[Story], extra: &[String]) -> Result<usize> {
    let mut assets: Vec<Url> = Vec::new();
    for story in stories {
      if let Some(photo_url) = &story.photo_url {
        if let Ok(url) = Url::parse(photo_url) {
          assets.push(url);
        }
      }
    }
    for asset in extra {
      match Url::parse(asset) {
        Ok(url) => assets.push(url),
        Err(e) => tracing::warn!(asset, error = %e, "skipping unparseable asset URL"),
      }
    }

    let inner = self.inner.clone();
    self
      .edge
      .install(&assets, move |url| {
        let inner = inner.clone();
        async move { inner.fetch_raw(url).await }
      })
      .await
  }
}

#[async_trait]
impl StoryBackend for CachedStoryClient {
  async fn fetch_stories(&self, page: Option<u32>, size: Option<u32>) -> Result<Vec<Story>> {
    let (stories, _) = self.list_stories(page, size).await?;
    Ok(stories)
  }

  async fn submit_story(&self, draft: &StoryDraft) -> Result<()> {
    self.inner.add_story(draft).await
  }
}
