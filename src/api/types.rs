//! Serde-deserializable types matching Story API responses.
//!
//! These types are separate from domain types to allow clean
//! deserialization while keeping domain types focused on application
//! needs.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::Story;

// ============================================================================
// Common envelope
// ============================================================================

/// Every Story API response carries this pair.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
  pub error: bool,
  #[serde(default)]
  pub message: String,
}

// ============================================================================
// Stories
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiStoryListResponse {
  pub error: bool,
  #[serde(default)]
  pub message: String,
  #[serde(rename = "listStory", default)]
  pub list_story: Vec<ApiStory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiStory {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(rename = "photoUrl")]
  pub photo_url: Option<String>,
  #[serde(rename = "createdAt")]
  pub created_at: Option<String>,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
}

impl ApiStory {
  pub fn into_story(self) -> Story {
    let created_at = self
      .created_at
      .as_deref()
      .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
      .map(|dt| dt.with_timezone(&Utc))
      .unwrap_or_else(Utc::now);

    Story {
      id: self.id,
      name: self.name,
      description: self.description,
      photo_url: self.photo_url,
      photo: None,
      lat: self.lat,
      lon: self.lon,
      created_at,
      is_offline: false,
      sync_pending: false,
    }
  }
}

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiLoginResponse {
  pub error: bool,
  #[serde(default)]
  pub message: String,
  #[serde(rename = "loginResult")]
  pub login_result: Option<LoginResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResult {
  #[serde(rename = "userId")]
  pub user_id: String,
  pub name: String,
  pub token: String,
}
