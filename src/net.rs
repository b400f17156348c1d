//! Network connectivity monitor.
//!
//! Single source of truth for whether the application believes it is
//! online. The state is a heuristic fed by the composition root (flags,
//! explicit sync requests), not a reachability guarantee; consumers that
//! need certainty must still handle request failures.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
  Online,
  Offline,
}

/// Tracks online/offline state and notifies subscribers on transition
/// edges only. There is no polling; whoever owns the platform
/// connectivity signal pushes it in via [`NetworkMonitor::set_online`].
pub struct NetworkMonitor {
  online: AtomicBool,
  tx: broadcast::Sender<NetworkStatus>,
}

impl NetworkMonitor {
  pub fn new(initially_online: bool) -> Self {
    let (tx, _) = broadcast::channel(16);
    Self {
      online: AtomicBool::new(initially_online),
      tx,
    }
  }

  /// Connectivity state as of the last pushed signal.
  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  /// Record a connectivity signal. Subscribers are notified only when the
  /// state actually changes; redundant sets are silent.
  pub fn set_online(&self, online: bool) {
    let was = self.online.swap(online, Ordering::SeqCst);
    if was != online {
      let status = if online {
        NetworkStatus::Online
      } else {
        NetworkStatus::Offline
      };
      tracing::info!(?status, "connectivity changed");
      let _ = self.tx.send(status);
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatus> {
    self.tx.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::sync::broadcast::error::TryRecvError;

  #[test]
  fn test_initial_state() {
    assert!(NetworkMonitor::new(true).is_online());
    assert!(!NetworkMonitor::new(false).is_online());
  }

  #[tokio::test]
  async fn test_transition_notifies_subscribers() {
    let monitor = NetworkMonitor::new(true);
    let mut rx = monitor.subscribe();

    monitor.set_online(false);
    assert_eq!(rx.recv().await.unwrap(), NetworkStatus::Offline);

    monitor.set_online(true);
    assert_eq!(rx.recv().await.unwrap(), NetworkStatus::Online);
  }

  #[tokio::test]
  async fn test_redundant_set_fires_no_event() {
    let monitor = NetworkMonitor::new(true);
    let mut rx = monitor.subscribe();

    monitor.set_online(true);
    monitor.set_online(true);

    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    assert!(monitor.is_online());
  }
}
