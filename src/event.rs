//! Typed sync event bus.
//!
//! Cross-component notification goes through this bus instead of ad-hoc
//! listener lists, so the sync engine's event vocabulary is statically
//! known to every consumer.

use tokio::sync::broadcast;

/// Events published by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  /// Connectivity was restored.
  Online,
  /// Connectivity was lost.
  Offline,
  /// A flush cycle confirmed this many queued writes.
  SyncComplete { synced: usize },
  /// A flush cycle left failures behind.
  SyncError { message: String },
}

/// Publish/subscribe channel for [`SyncEvent`].
///
/// Emitting without subscribers is fine; events are simply dropped, and
/// the notification side stays optional to the core read/write flows.
#[derive(Debug, Clone)]
pub struct EventBus {
  tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
  pub fn new() -> Self {
    let (tx, _) = broadcast::channel(64);
    Self { tx }
  }

  pub fn emit(&self, event: SyncEvent) {
    let _ = self.tx.send(event);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.tx.subscribe()
  }
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_subscribers_receive_emitted_events() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();

    bus.emit(SyncEvent::SyncComplete { synced: 2 });

    assert_eq!(rx.recv().await.unwrap(), SyncEvent::SyncComplete { synced: 2 });
  }

  #[test]
  fn test_emit_without_subscribers_is_harmless() {
    let bus = EventBus::new();
    bus.emit(SyncEvent::Offline);
  }

  #[tokio::test]
  async fn test_multiple_subscribers_see_the_same_event() {
    let bus = EventBus::new();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();

    bus.emit(SyncEvent::Online);

    assert_eq!(a.recv().await.unwrap(), SyncEvent::Online);
    assert_eq!(b.recv().await.unwrap(), SyncEvent::Online);
  }
}
