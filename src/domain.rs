//! Domain types shared across the store, sync engine, and API client.
//!
//! These are separate from the serde wire types in `api::types` so the
//! application works with one canonical shape regardless of whether a
//! story came from the server or was created offline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Minimum description length accepted for a submission.
pub const MIN_DESCRIPTION_LEN: usize = 10;

/// How many leading words of the description become the story name.
const NAME_WORDS: usize = 5;

/// A story, either fetched from the server or created locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
  /// Server-assigned id, or a locally-generated UUID for stories created
  /// while disconnected.
  pub id: String,
  pub name: String,
  pub description: String,
  /// Remote photo location; None for offline-created stories.
  pub photo_url: Option<String>,
  /// Captured photo bytes for offline-created stories; None otherwise.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub photo: Option<Vec<u8>>,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
  pub created_at: DateTime<Utc>,
  /// True while the story only exists locally and the server has not
  /// confirmed it.
  #[serde(default)]
  pub is_offline: bool,
  /// True while a queued write for this story awaits remote confirmation.
  #[serde(default)]
  pub sync_pending: bool,
}

/// A validated story submission, as collected from the add-story flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryDraft {
  pub description: String,
  pub photo: Vec<u8>,
  pub photo_name: String,
  pub lat: Option<f64>,
  pub lon: Option<f64>,
}

impl StoryDraft {
  /// Reject malformed submissions before they reach the queue.
  pub fn validate(&self) -> Result<()> {
    if self.description.trim().len() < MIN_DESCRIPTION_LEN {
      return Err(Error::Validation(format!(
        "description must be at least {} characters",
        MIN_DESCRIPTION_LEN
      )));
    }
    if self.photo.is_empty() {
      return Err(Error::Validation("a photo is required".into()));
    }
    if let Some(lat) = self.lat {
      if !(-90.0..=90.0).contains(&lat) {
        return Err(Error::Validation(format!("latitude {} out of range", lat)));
      }
    }
    if let Some(lon) = self.lon {
      if !(-180.0..=180.0).contains(&lon) {
        return Err(Error::Validation(format!("longitude {} out of range", lon)));
      }
    }
    Ok(())
  }

  /// Story name derived from the first words of the description.
  pub fn derived_name(&self) -> String {
    self
      .description
      .trim()
      .split_whitespace()
      .take(NAME_WORDS)
      .collect::<Vec<_>>()
      .join(" ")
  }
}

/// A favorited story: unique per story id, carrying a denormalized
/// snapshot so it can be displayed without a network round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteEntry {
  pub story_id: String,
  pub added_at: DateTime<Utc>,
  pub story_data: Story,
}

/// The kind of a queued offline write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
  CreateStory,
}

impl WriteKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      WriteKind::CreateStory => "create-story",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "create-story" => Ok(WriteKind::CreateStory),
      other => Err(Error::Other(format!("unknown write kind: {}", other))),
    }
  }
}

/// A queued, not-yet-confirmed user write awaiting remote acknowledgment.
/// Owned and mutated exclusively by the sync engine.
#[derive(Debug, Clone)]
pub struct PendingWrite {
  /// Monotonic queue id; ascending order is FIFO order.
  pub id: i64,
  pub kind: WriteKind,
  /// Local id of the story row this write will confirm.
  pub story_id: String,
  pub draft: StoryDraft,
  pub created_at: DateTime<Utc>,
  /// Failed submission attempts so far.
  pub attempts: u32,
  /// Backoff gate; automatic flushes skip the entry until this instant.
  pub not_before: Option<DateTime<Utc>>,
}

/// Approximate local storage usage, for display.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbStats {
  pub total_size: u64,
  pub stories: u64,
  pub favorites: u64,
  pub pending_writes: u64,
}

/// A web-push subscription as registered with the platform push service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
  pub endpoint: String,
  pub keys: PushKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushKeys {
  pub p256dh: String,
  pub auth: String,
}
