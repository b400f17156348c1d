//! Sync engine: reconciles local and remote story state.
//!
//! Every user-visible write either reaches the server or lands in the
//! durable pending-write queue; it is never silently lost. Queued writes
//! are flushed on reconnect, in FIFO order, one cycle at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::StoryBackend;
use crate::domain::{Story, StoryDraft, WriteKind};
use crate::error::Result;
use crate::event::{EventBus, SyncEvent};
use crate::net::{NetworkMonitor, NetworkStatus};
use crate::store::LocalStore;

use super::backoff::RetryPolicy;

/// What happened to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
  /// The server confirmed the write immediately.
  Submitted,
  /// The write was persisted locally and queued for a later flush; the
  /// id is the story's temporary local id.
  Queued(String),
}

/// Result of one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
  /// Entries actually submitted this cycle.
  pub attempted: usize,
  /// Entries confirmed and removed from the queue.
  pub synced: usize,
  /// Entries that failed and stay queued.
  pub failed: usize,
  /// Entries skipped because their backoff gate or attempt cap applied.
  pub deferred: usize,
}

enum FlushMode {
  /// Respect backoff gates and the attempt cap.
  Auto,
  /// Retry everything, including exhausted entries.
  Forced,
}

pub struct SyncEngine<B: StoryBackend> {
  store: Arc<LocalStore>,
  network: Arc<NetworkMonitor>,
  backend: B,
  events: EventBus,
  retry: RetryPolicy,
  stale_after: chrono::Duration,
  last_refresh: Mutex<Option<DateTime<Utc>>>,
  /// At most one flush cycle may run at a time.
  flushing: AtomicBool,
}

impl<B: StoryBackend + 'static> SyncEngine<B> {
  pub fn new(
    store: Arc<LocalStore>,
    network: Arc<NetworkMonitor>,
    backend: B,
    events: EventBus,
  ) -> Self {
    Self {
      store,
      network,
      backend,
      events,
      retry: RetryPolicy::default(),
      stale_after: chrono::Duration::minutes(5),
      last_refresh: Mutex::new(None),
      flushing: AtomicBool::new(false),
    }
  }

  pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_stale_after(mut self, stale_after: chrono::Duration) -> Self {
    self.stale_after = stale_after;
    self
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  pub fn events(&self) -> &EventBus {
    &self.events
  }

  /// Submit a story: try the remote when online, queue on any network or
  /// server failure, and always queue when offline. Validation failures
  /// are rejected before anything is persisted.
  pub async fn submit_story(&self, draft: StoryDraft) -> Result<SubmitOutcome> {
    draft.validate()?;

    if self.network.is_online() {
      match self.backend.submit_story(&draft).await {
        Ok(()) => {
          info!("story submitted");
          return Ok(SubmitOutcome::Submitted);
        }
        Err(e) if e.is_retryable() => {
          warn!(error = %e, "online submission failed, falling back to offline queue");
        }
        Err(e) => return Err(e),
      }
    }

    let story = self.store.add_story_offline(&draft)?;
    self.store.enqueue_write(WriteKind::CreateStory, &story.id, &draft)?;
    info!(story_id = %story.id, "story queued for sync");
    Ok(SubmitOutcome::Queued(story.id))
  }

  /// Read the story list: remote when forced or when online with a stale
  /// local copy (write-through on success), local store otherwise.
  pub async fn get_stories(&self, force_refresh: bool) -> Result<Vec<Story>> {
    if force_refresh || (self.network.is_online() && self.is_stale()) {
      match self.backend.fetch_stories(None, Some(100)).await {
        Ok(stories) => {
          self.store.replace_synced_stories(&stories)?;
          if let Ok(mut last) = self.last_refresh.lock() {
            *last = Some(Utc::now());
          }
          return self.store.all_stories();
        }
        Err(e) if e.is_retryable() => {
          warn!(error = %e, "remote fetch failed, serving local store");
        }
        Err(e) => return Err(e),
      }
    }

    self.store.all_stories()
  }

  pub fn has_pending_changes(&self) -> Result<bool> {
    Ok(self.store.pending_count()? > 0)
  }

  /// One automatic flush cycle: FIFO over the entries queued at start,
  /// respecting backoff gates and the attempt cap.
  pub async fn flush(&self) -> Result<FlushSummary> {
    self.flush_with(FlushMode::Auto).await
  }

  /// Flush ignoring backoff gates and the attempt cap (explicit user
  /// request).
  pub async fn force_flush(&self) -> Result<FlushSummary> {
    self.flush_with(FlushMode::Forced).await
  }

  async fn flush_with(&self, mode: FlushMode) -> Result<FlushSummary> {
    if self
      .flushing
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .is_err()
    {
      debug!("flush already in progress");
      return Ok(FlushSummary::default());
    }

    let result = self.run_flush_cycle(mode).await;
    self.flushing.store(false, Ordering::SeqCst);

    match &result {
      Ok(summary) => {
        if summary.synced > 0 {
          self.events.emit(SyncEvent::SyncComplete { synced: summary.synced });
        }
        if summary.failed > 0 {
          self.events.emit(SyncEvent::SyncError {
            message: format!("{} queued stories failed to sync", summary.failed),
          });
        }
      }
      Err(e) => {
        self.events.emit(SyncEvent::SyncError { message: e.to_string() });
      }
    }

    result
  }

  async fn run_flush_cycle(&self, mode: FlushMode) -> Result<FlushSummary> {
    // Snapshot the queue: entries enqueued while this cycle runs are
    // deferred to the next one.
    let snapshot = self.store.pending_writes()?;
    let mut summary = FlushSummary::default();
    if snapshot.is_empty() {
      return Ok(summary);
    }

    info!(queued = snapshot.len(), "starting flush cycle");
    let now = Utc::now();

    for entry in snapshot {
      if matches!(mode, FlushMode::Auto) {
        let gated = entry.not_before.is_some_and(|t| t > now);
        if gated || self.retry.exhausted(entry.attempts) {
          debug!(write_id = entry.id, attempts = entry.attempts, "deferring queued write");
          summary.deferred += 1;
          continue;
        }
      }

      summary.attempted += 1;
      let attempt = match entry.kind {
        WriteKind::CreateStory => self.backend.submit_story(&entry.draft).await,
      };
      match attempt {
        Ok(()) => {
          self.store.remove_write(entry.id)?;
          self.store.mark_synced(&entry.story_id)?;
          summary.synced += 1;
          info!(
            write_id = entry.id,
            story_id = %entry.story_id,
            queued_at = %entry.created_at,
            "queued write confirmed"
          );
        }
        Err(e) if e.is_auth() => {
          // No point retrying the rest of the queue with bad credentials;
          // entries stay untouched for after re-authentication.
          warn!(error = %e, "flush aborted: authentication required");
          return Err(e);
        }
        Err(e) => {
          let attempts = entry.attempts + 1;
          let gate = self.retry.next_eligible(attempts, now);
          self.store.record_attempt(entry.id, Some(gate))?;
          summary.failed += 1;
          warn!(write_id = entry.id, attempts, error = %e, "queued write failed");
          if self.retry.exhausted(attempts) {
            warn!(write_id = entry.id, "automatic retries exhausted; use a forced sync");
          }
        }
      }
    }

    info!(
      synced = summary.synced,
      failed = summary.failed,
      deferred = summary.deferred,
      "flush cycle finished"
    );
    Ok(summary)
  }

  fn is_stale(&self) -> bool {
    match self.last_refresh.lock() {
      Ok(last) => match *last {
        Some(at) => Utc::now() - at > self.stale_after,
        None => true,
      },
      Err(_) => true,
    }
  }

  /// Watch connectivity transitions: publish them as sync events and run
  /// a flush on every offline-to-online edge.
  pub fn spawn_connectivity_watcher(self: &Arc<Self>) -> JoinHandle<()> {
    let engine = Arc::clone(self);
    let mut rx = engine.network.subscribe();

    tokio::spawn(async move {
      loop {
        match rx.recv().await {
          Ok(NetworkStatus::Online) => {
            engine.events.emit(SyncEvent::Online);
            if let Err(e) = engine.flush().await {
              warn!(error = %e, "reconnect flush failed");
            }
          }
          Ok(NetworkStatus::Offline) => {
            engine.events.emit(SyncEvent::Offline);
          }
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            debug!(skipped, "connectivity watcher lagged");
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    })
  }
}

impl FlushSummary {
  pub fn is_empty(&self) -> bool {
    self.attempted == 0 && self.deferred == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::collections::VecDeque;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;

  use crate::error::Error;

  /// In-memory backend with scripted outcomes.
  struct MockBackend {
    submit_script: Mutex<VecDeque<Result<()>>>,
    fetch_script: Mutex<VecDeque<Result<Vec<Story>>>>,
    submitted: Mutex<Vec<String>>,
    fetch_calls: AtomicUsize,
    submit_delay: Option<Duration>,
    on_submit: Mutex<Option<Box<dyn FnMut() + Send>>>,
  }

  impl MockBackend {
    fn new() -> Self {
      Self {
        submit_script: Mutex::new(VecDeque::new()),
        fetch_script: Mutex::new(VecDeque::new()),
        submitted: Mutex::new(Vec::new()),
        fetch_calls: AtomicUsize::new(0),
        submit_delay: None,
        on_submit: Mutex::new(None),
      }
    }

    fn script_submit(self, outcomes: Vec<Result<()>>) -> Self {
      *self.submit_script.lock().unwrap() = outcomes.into();
      self
    }

    fn script_fetch(self, outcomes: Vec<Result<Vec<Story>>>) -> Self {
      *self.fetch_script.lock().unwrap() = outcomes.into();
      self
    }

    fn submitted(&self) -> Vec<String> {
      self.submitted.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl StoryBackend for MockBackend {
    async fn fetch_stories(&self, _page: Option<u32>, _size: Option<u32>) -> Result<Vec<Story>> {
      self.fetch_calls.fetch_add(1, Ordering::SeqCst);
      self
        .fetch_script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn submit_story(&self, draft: &StoryDraft) -> Result<()> {
      if let Some(delay) = self.submit_delay {
        tokio::time::sleep(delay).await;
      }
      if let Some(hook) = self.on_submit.lock().unwrap().as_mut() {
        hook();
      }
      let outcome = self.submit_script.lock().unwrap().pop_front().unwrap_or(Ok(()));
      if outcome.is_ok() {
        self.submitted.lock().unwrap().push(draft.description.clone());
      }
      outcome
    }
  }

  fn draft(description: &str) -> StoryDraft {
    StoryDraft {
      description: description.to_string(),
      photo: vec![1],
      photo_name: "p.jpg".into(),
      lat: None,
      lon: None,
    }
  }

  fn server_story(id: &str) -> Story {
    Story {
      id: id.to_string(),
      name: id.to_string(),
      description: "from the server, long enough".into(),
      photo_url: None,
      photo: None,
      lat: None,
      lon: None,
      created_at: Utc::now(),
      is_offline: false,
      sync_pending: false,
    }
  }

  fn engine_with(
    backend: MockBackend,
    online: bool,
  ) -> (Arc<SyncEngine<MockBackend>>, Arc<LocalStore>, Arc<NetworkMonitor>) {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let network = Arc::new(NetworkMonitor::new(online));
    let engine = Arc::new(SyncEngine::new(
      Arc::clone(&store),
      Arc::clone(&network),
      backend,
      EventBus::new(),
    ));
    (engine, store, network)
  }

  #[tokio::test]
  async fn test_offline_submit_queues_and_flags() {
    let (engine, store, _) = engine_with(MockBackend::new(), false);

    let outcome = engine.submit_story(draft("written far from any signal")).await.unwrap();
    let SubmitOutcome::Queued(story_id) = outcome else {
      panic!("expected a queued outcome");
    };

    let story = store.get_story(&story_id).unwrap().unwrap();
    assert!(story.is_offline);
    assert!(story.sync_pending);
    assert!(engine.has_pending_changes().unwrap());
  }

  #[tokio::test]
  async fn test_online_submit_confirms_without_queueing() {
    let (engine, store, _) = engine_with(MockBackend::new(), true);

    let outcome = engine.submit_story(draft("posted with a good connection")).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Submitted);
    assert_eq!(store.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_online_submit_failure_falls_back_to_queue() {
    let backend =
      MockBackend::new().script_submit(vec![Err(Error::Offline("connection reset".into()))]);
    let (engine, store, _) = engine_with(backend, true);

    let outcome = engine.submit_story(draft("posted right as the link died")).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued(_)));
    assert_eq!(store.pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_validation_failure_never_reaches_the_queue() {
    let (engine, store, _) = engine_with(MockBackend::new(), false);

    let result = engine.submit_story(draft("too short")).await;
    assert!(matches!(result, Err(Error::Validation(_))));
    assert_eq!(store.pending_count().unwrap(), 0);
    assert!(store.all_stories().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_reconnect_scenario_clears_pending() {
    let (engine, store, _network) = engine_with(MockBackend::new(), false);

    let SubmitOutcome::Queued(story_id) =
      engine.submit_story(draft("queued until the network returns")).await.unwrap()
    else {
      panic!("expected a queued outcome");
    };
    assert!(engine.has_pending_changes().unwrap());

    let before: Vec<String> =
      store.all_stories().unwrap().iter().map(|s| s.id.clone()).collect();

    let summary = engine.flush().await.unwrap();
    assert_eq!(summary.synced, 1);
    assert!(!engine.has_pending_changes().unwrap());

    // Same id, flags cleared, no duplicate row.
    let after = store.all_stories().unwrap();
    assert_eq!(after.len(), before.len());
    let story = store.get_story(&story_id).unwrap().unwrap();
    assert!(!story.sync_pending);
    assert!(!story.is_offline);
  }

  #[tokio::test]
  async fn test_flush_is_fifo_and_continues_past_failures() {
    let backend = MockBackend::new().script_submit(vec![
      Ok(()),
      Err(Error::Offline("still flaky".into())),
      Ok(()),
    ]);
    let (engine, store, _) = engine_with(backend, false);

    engine.submit_story(draft("first story in the queue")).await.unwrap();
    engine.submit_story(draft("second story in the queue")).await.unwrap();
    engine.submit_story(draft("third story in the queue")).await.unwrap();

    let summary = engine.flush().await.unwrap();
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.synced, 2);
    assert_eq!(summary.failed, 1);

    assert_eq!(
      engine.backend().submitted(),
      vec!["first story in the queue", "third story in the queue"]
    );

    let remaining = store.pending_writes().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].draft.description, "second story in the queue");
    assert_eq!(remaining[0].attempts, 1);
    assert!(remaining[0].not_before.is_some());
  }

  #[tokio::test]
  async fn test_entries_enqueued_mid_flush_wait_for_the_next_cycle() {
    let backend = MockBackend::new();
    let (engine, store, _) = engine_with(backend, false);

    engine.submit_story(draft("story A, queued before the flush")).await.unwrap();
    engine.submit_story(draft("story B, queued before the flush")).await.unwrap();

    // While the flush submits A and B, a hook sneaks C into the queue.
    let hook_store = Arc::clone(&store);
    let once = std::sync::Once::new();
    *engine.backend().on_submit.lock().unwrap() = Some(Box::new(move || {
      once.call_once(|| {
        hook_store
          .enqueue_write(WriteKind::CreateStory, "c", &draft("story C, enqueued mid-flush"))
          .unwrap();
      });
    }));

    let summary = engine.flush().await.unwrap();
    assert_eq!(summary.attempted, 2);
    assert_eq!(summary.synced, 2);

    let remaining = store.pending_writes().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].draft.description, "story C, enqueued mid-flush");
  }

  #[tokio::test]
  async fn test_only_one_flush_cycle_at_a_time() {
    let mut backend = MockBackend::new();
    backend.submit_delay = Some(Duration::from_millis(50));
    let (engine, _, _) = engine_with(backend, false);

    engine.submit_story(draft("slow enough to overlap calls")).await.unwrap();

    let first = tokio::spawn({
      let engine = Arc::clone(&engine);
      async move { engine.flush().await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Re-entrant call returns immediately without touching the queue.
    let second = engine.flush().await.unwrap();
    assert!(second.is_empty());

    let first = first.await.unwrap();
    assert_eq!(first.synced, 1);
  }

  #[tokio::test]
  async fn test_auto_flush_respects_backoff_gate() {
    let backend =
      MockBackend::new().script_submit(vec![Err(Error::Offline("first try fails".into()))]);
    let (engine, store, _) = engine_with(backend, false);

    engine.submit_story(draft("will be gated after one failure")).await.unwrap();
    assert_eq!(engine.flush().await.unwrap().failed, 1);

    // The gate is half a minute out; an immediate auto flush skips it.
    let summary = engine.flush().await.unwrap();
    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.deferred, 1);

    // A forced flush retries it regardless.
    let summary = engine.force_flush().await.unwrap();
    assert_eq!(summary.synced, 1);
    assert_eq!(store.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_auth_error_aborts_flush_and_keeps_queue() {
    let backend = MockBackend::new().script_submit(vec![Err(Error::Auth("expired".into()))]);
    let (engine, store, _) = engine_with(backend, false);

    engine.submit_story(draft("queued behind a dead session")).await.unwrap();
    engine.submit_story(draft("second one never attempted")).await.unwrap();

    let result = engine.flush().await;
    assert!(matches!(result, Err(Error::Auth(_))));

    let remaining = store.pending_writes().unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].attempts, 0);
  }

  #[tokio::test]
  async fn test_get_stories_writes_through_and_falls_back() {
    let backend = MockBackend::new().script_fetch(vec![
      Ok(vec![server_story("s1"), server_story("s2")]),
      Err(Error::Offline("gone again".into())),
    ]);
    let (engine, _, network) = engine_with(backend, true);

    let stories = engine.get_stories(false).await.unwrap();
    assert_eq!(stories.len(), 2);

    // Offline: the forced refresh fails and the local copy is served.
    network.set_online(false);
    let stories = engine.get_stories(true).await.unwrap();
    assert_eq!(stories.len(), 2);
  }

  #[tokio::test]
  async fn test_get_stories_serves_local_within_stale_window() {
    let backend = MockBackend::new().script_fetch(vec![Ok(vec![server_story("s1")])]);
    let (engine, _, _) = engine_with(backend, true);

    engine.get_stories(false).await.unwrap();
    engine.get_stories(false).await.unwrap();

    assert_eq!(engine.backend().fetch_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_reconnect_edge_triggers_flush_and_events() {
    let (engine, _, network) = engine_with(MockBackend::new(), false);
    let mut events = engine.events().subscribe();

    engine.submit_story(draft("waiting for the reconnect edge")).await.unwrap();
    let _watcher = engine.spawn_connectivity_watcher();

    network.set_online(true);

    assert_eq!(events.recv().await.unwrap(), SyncEvent::Online);
    assert_eq!(events.recv().await.unwrap(), SyncEvent::SyncComplete { synced: 1 });
    assert!(!engine.has_pending_changes().unwrap());
  }
}
