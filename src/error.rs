//! Error taxonomy for storycat.
//!
//! Failures are classified by how the sync lifecycle reacts to them:
//! storage and network failures are absorbed and retried, auth and
//! validation failures propagate to the user immediately.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The local persistence layer is unavailable (quota, permissions,
  /// corruption). Callers degrade to cached-only behavior.
  #[error("storage unavailable: {0}")]
  Storage(#[from] rusqlite::Error),

  /// A network request failed in transit.
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  /// The remote is unreachable or we are known to be offline.
  #[error("offline: {0}")]
  Offline(String),

  /// The server answered with an error envelope or a 5xx.
  #[error("server error: {0}")]
  Api(String),

  /// Missing, rejected, or expired credentials. Surfaced for
  /// re-authentication; never corrupts the pending-write queue.
  #[error("authentication required: {0}")]
  Auth(String),

  /// A malformed submission, rejected before anything is queued.
  #[error("invalid submission: {0}")]
  Validation(String),

  /// The geolocation collaborator did not answer within the bounded wait.
  #[error("geolocation timed out after {0} seconds")]
  GeoTimeout(u64),

  #[error("invalid URL: {0}")]
  InvalidUrl(#[from] url::ParseError),

  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("{0}")]
  Other(String),
}

impl Error {
  /// Whether the sync lifecycle should absorb this failure and retry it
  /// later (queue the write, serve the cache) rather than surface it.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Error::Network(_) | Error::Offline(_) | Error::Api(_))
  }

  pub fn is_auth(&self) -> bool {
    matches!(self, Error::Auth(_))
  }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_retryable_classification() {
    assert!(Error::Offline("down".into()).is_retryable());
    assert!(Error::Api("500".into()).is_retryable());
    assert!(!Error::Auth("expired".into()).is_retryable());
    assert!(!Error::Validation("too short".into()).is_retryable());
  }
}
