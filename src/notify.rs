//! Notification dispatcher: terminal messages for sync events, and the
//! web-push subscription lifecycle.
//!
//! Strictly a consumer of the sync engine's events; nothing here may
//! block or fail the core read/write flows.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::StoryApiClient;
use crate::domain::PushSubscription;
use crate::error::Result;
use crate::event::SyncEvent;
use crate::store::LocalStore;

/// User-facing message for a sync event, or None when the event needs no
/// announcement.
pub fn describe(event: &SyncEvent) -> Option<String> {
  match event {
    SyncEvent::Online => Some("Connection restored! Synchronizing data...".into()),
    SyncEvent::Offline => Some("No connection. Offline mode active.".into()),
    SyncEvent::SyncComplete { synced } if *synced > 0 => {
      Some(format!("{} stories synchronized successfully", synced))
    }
    SyncEvent::SyncComplete { .. } => None,
    SyncEvent::SyncError { message } => Some(format!("Failed to synchronize data: {}", message)),
  }
}

/// Print sync events to stderr for the duration of the process.
pub fn spawn_event_printer(mut rx: broadcast::Receiver<SyncEvent>) -> JoinHandle<()> {
  tokio::spawn(async move {
    loop {
      match rx.recv().await {
        Ok(event) => {
          if let Some(message) = describe(&event) {
            eprintln!("{}", message);
          }
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          debug!(skipped, "event printer lagged");
        }
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  })
}

/// Push subscription lifecycle against the Story API. Constructed only
/// when a session token exists; callers hold it as `Option<PushGateway>`.
pub struct PushGateway {
  api: StoryApiClient,
  store: Arc<LocalStore>,
}

impl PushGateway {
  pub fn new(api: StoryApiClient, store: Arc<LocalStore>) -> Self {
    Self { api, store }
  }

  /// Register a subscription with the server and persist it locally.
  pub async fn subscribe(&self, subscription: PushSubscription) -> Result<()> {
    self.api.subscribe_push(&subscription).await?;
    self.store.set_push_subscription(Some(&subscription))?;
    Ok(())
  }

  /// Remove the stored subscription, server-side first. Returns false
  /// when there was nothing to remove.
  pub async fn unsubscribe(&self) -> Result<bool> {
    let Some(subscription) = self.store.push_subscription()? else {
      return Ok(false);
    };
    self.api.unsubscribe_push(&subscription.endpoint).await?;
    self.store.set_push_subscription(None)?;
    Ok(true)
  }

  pub fn status(&self) -> Result<Option<PushSubscription>> {
    self.store.push_subscription()
  }

  /// Re-register the stored subscription after a session change. Best
  /// effort: a failure is logged, never surfaced.
  pub async fn resubscribe(&self) -> bool {
    match self.store.push_subscription() {
      Ok(Some(subscription)) => match self.api.subscribe_push(&subscription).await {
        Ok(()) => true,
        Err(e) => {
          warn!(error = %e, "push re-subscription failed");
          false
        }
      },
      Ok(None) => false,
      Err(e) => {
        warn!(error = %e, "could not read stored push subscription");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_describe_messages() {
    assert_eq!(
      describe(&SyncEvent::Online).unwrap(),
      "Connection restored! Synchronizing data..."
    );
    assert_eq!(describe(&SyncEvent::Offline).unwrap(), "No connection. Offline mode active.");
    assert_eq!(
      describe(&SyncEvent::SyncComplete { synced: 3 }).unwrap(),
      "3 stories synchronized successfully"
    );
    assert!(describe(&SyncEvent::SyncComplete { synced: 0 }).is_none());
    assert!(describe(&SyncEvent::SyncError { message: "boom".into() })
      .unwrap()
      .contains("boom"));
  }
}
