//! Bounded exponential backoff for queued writes.
//!
//! The retry schedule doubles the delay after every failed attempt, caps
//! it at a maximum, and stops automatic retries entirely once the attempt
//! cap is reached. A forced flush ignores both gates; entries are never
//! deleted by the policy.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::SyncConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub base: Duration,
  pub max_delay: Duration,
  pub max_attempts: u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      base: Duration::from_secs(30),
      max_delay: Duration::from_secs(30 * 60),
      max_attempts: 8,
    }
  }
}

impl RetryPolicy {
  pub fn from_config(config: &SyncConfig) -> Self {
    Self {
      base: Duration::from_secs(config.backoff_base_secs),
      max_delay: Duration::from_secs(config.backoff_max_secs),
      max_attempts: config.max_attempts,
    }
  }

  /// Delay before the next attempt, given how many have failed so far.
  pub fn delay_after(&self, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let factor = 2u32.saturating_pow(exponent);
    self
      .base
      .checked_mul(factor)
      .unwrap_or(self.max_delay)
      .min(self.max_delay)
  }

  /// Instant at which the entry becomes eligible again.
  pub fn next_eligible(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(self.delay_after(attempts))
      .unwrap_or_else(|_| chrono::Duration::seconds(self.max_delay.as_secs() as i64));
    now + delay
  }

  /// Whether automatic retries are over for this entry.
  pub fn exhausted(&self, attempts: u32) -> bool {
    attempts >= self.max_attempts
  }
}
