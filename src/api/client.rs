use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use url::Url;

use crate::cache::CachedResponse;
use crate::domain::{PushSubscription, Story, StoryDraft};
use crate::error::{Error, Result};

use super::types::{ApiEnvelope, ApiLoginResponse, LoginResult};

/// Remote capability the sync engine depends on. Implemented by the real
/// client and by in-memory fakes in tests.
#[async_trait]
pub trait StoryBackend: Send + Sync {
  /// Fetch the story list from the remote.
  async fn fetch_stories(&self, page: Option<u32>, size: Option<u32>) -> Result<Vec<Story>>;

  /// Submit one story. Ok(()) means the server confirmed the write.
  async fn submit_story(&self, draft: &StoryDraft) -> Result<()>;
}

/// Story API client wrapper
#[derive(Clone)]
pub struct StoryApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl StoryApiClient {
  pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
    // Trailing slash so Url::join keeps the /v1 path segment.
    let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;

    Ok(Self {
      http: reqwest::Client::new(),
      base_url,
      token,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.token = token;
    self
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    Ok(self.base_url.join(path)?)
  }

  /// URL of the story list, exposed so the edge cache can key on it.
  pub fn stories_url(&self, page: Option<u32>, size: Option<u32>) -> Result<Url> {
    let mut url = self.endpoint("stories")?;
    if page.is_some() || size.is_some() {
      let mut query = url.query_pairs_mut();
      if let Some(page) = page {
        query.append_pair("page", &page.to_string());
      }
      if let Some(size) = size {
        query.append_pair("size", &size.to_string());
      }
    }
    Ok(url)
  }

  fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  /// Perform a raw GET, preserving status and body for the edge cache.
  /// HTTP error statuses are data here, not failures; only transport
  /// errors map to `Error::Network`.
  pub async fn fetch_raw(&self, url: Url) -> Result<CachedResponse> {
    let response = self.authorize(self.http.get(url)).send().await?;
    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or("application/octet-stream")
      .to_string();
    let body = response.bytes().await?.to_vec();

    Ok(CachedResponse::new(status, content_type, body))
  }

  /// Submit a new story as a multipart form.
  pub async fn add_story(&self, draft: &StoryDraft) -> Result<()> {
    let url = self.endpoint("stories")?;

    let photo = Part::bytes(draft.photo.clone())
      .file_name(draft.photo_name.clone())
      .mime_str(guess_mime(&draft.photo_name))?;

    let mut form = Form::new()
      .text("description", draft.description.clone())
      .part("photo", photo);
    if let Some(lat) = draft.lat {
      form = form.text("lat", lat.to_string());
    }
    if let Some(lon) = draft.lon {
      form = form.text("lon", lon.to_string());
    }

    let response = self.authorize(self.http.post(url)).multipart(form).send().await?;
    let response = Self::check_auth(response)?;

    let parsed: ApiEnvelope = response.json().await?;
    if parsed.error {
      return Err(Error::Api(parsed.message));
    }

    Ok(())
  }

  /// Exchange credentials for a bearer token.
  pub async fn login(&self, email: &str, password: &str) -> Result<LoginResult> {
    let url = self.endpoint("login")?;
    let body = serde_json::json!({ "email": email, "password": password });

    let response = self.http.post(url).json(&body).send().await?;
    if response.status() == StatusCode::UNAUTHORIZED {
      return Err(Error::Auth("invalid credentials".into()));
    }

    let parsed: ApiLoginResponse = response.json().await?;
    if parsed.error {
      return Err(Error::Auth(parsed.message));
    }

    parsed
      .login_result
      .ok_or_else(|| Error::Api("login succeeded but no loginResult returned".into()))
  }

  /// Create an account.
  pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<()> {
    let url = self.endpoint("register")?;
    let body = serde_json::json!({ "name": name, "email": email, "password": password });

    let response = self.http.post(url).json(&body).send().await?;
    let parsed: ApiEnvelope = response.json().await?;
    if parsed.error {
      return Err(Error::Api(parsed.message));
    }

    Ok(())
  }

  /// Register a web-push subscription with the server.
  pub async fn subscribe_push(&self, subscription: &PushSubscription) -> Result<()> {
    let url = self.endpoint("notifications/subscribe")?;

    let response = self
      .authorize(self.http.post(url))
      .json(subscription)
      .send()
      .await?;
    let response = Self::check_auth(response)?;

    let parsed: ApiEnvelope = response.json().await?;
    if parsed.error {
      return Err(Error::Api(parsed.message));
    }

    Ok(())
  }

  /// Remove a previously registered subscription.
  pub async fn unsubscribe_push(&self, endpoint: &str) -> Result<()> {
    let url = self.endpoint("notifications/subscribe")?;
    let body = serde_json::json!({ "endpoint": endpoint });

    let response = self
      .authorize(self.http.delete(url))
      .json(&body)
      .send()
      .await?;
    let response = Self::check_auth(response)?;

    let parsed: ApiEnvelope = response.json().await?;
    if parsed.error {
      return Err(Error::Api(parsed.message));
    }

    Ok(())
  }

  fn check_auth(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status() == StatusCode::UNAUTHORIZED {
      return Err(Error::Auth("session expired, please log in again".into()));
    }
    Ok(response)
  }
}

/// Content type for an uploaded photo, from its file name.
fn guess_mime(file_name: &str) -> &'static str {
  match file_name.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()) {
    Some(ext) if ext == "png" => "image/png",
    Some(ext) if ext == "gif" => "image/gif",
    Some(ext) if ext == "webp" => "image/webp",
    _ => "image/jpeg",
  }
}
