use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{debug, info};

use crate::api::{CachedStoryClient, StoryApiClient};
use crate::cache::{EdgeCache, SqliteCacheStorage};
use crate::config::Config;
use crate::domain::{PushKeys, PushSubscription, Story, StoryDraft};
use crate::error::Error;
use crate::event::EventBus;
use crate::geo::{self, CommandLocator};
use crate::net::NetworkMonitor;
use crate::notify::{self, PushGateway};
use crate::store::LocalStore;
use crate::sync::{RetryPolicy, SubmitOutcome, SyncEngine};

/// Composition root: constructs the store, network monitor, edge cache,
/// API client, and sync engine once, and wires every consumer through
/// explicit references.
pub struct App {
  config: Config,
  store: Arc<LocalStore>,
  network: Arc<NetworkMonitor>,
  engine: Arc<SyncEngine<CachedStoryClient>>,
  api: StoryApiClient,
  push: Option<PushGateway>,
}

impl App {
  pub async fn new(config: Config, offline: bool) -> Result<Self> {
    let store = Arc::new(LocalStore::open()?);
    let token = Config::env_token().or(store.token()?);

    let api = StoryApiClient::new(&config.api.base_url, token.clone())?;
    let storage = Arc::new(SqliteCacheStorage::open()?);
    let edge = EdgeCache::new(storage, api.base_url(), config.cache.version)
      .with_shell(config.cache.shell_url.clone());

    // New cache generation takes effect immediately: stale-tagged
    // namespaces are purged before any request is served.
    let removed = edge.activate()?;
    if !removed.is_empty() {
      debug!(?removed, "purged stale cache namespaces");
    }

    let network = Arc::new(NetworkMonitor::new(!offline));
    let events = EventBus::new();
    let backend = CachedStoryClient::new(api.clone(), edge);
    let engine = Arc::new(
      SyncEngine::new(Arc::clone(&store), Arc::clone(&network), backend, events.clone())
        .with_retry_policy(RetryPolicy::from_config(&config.sync))
        .with_stale_after(chrono::Duration::minutes(config.cache.stale_minutes)),
    );

    engine.spawn_connectivity_watcher();
    notify::spawn_event_printer(engine.events().subscribe());

    let push = token.is_some().then(|| PushGateway::new(api.clone(), Arc::clone(&store)));

    Ok(Self {
      config,
      store,
      network,
      engine,
      api,
      push,
    })
  }

  /// List stories, flagging offline/pending entries and favorites. With
  /// pending writes and connectivity, a flush runs opportunistically
  /// afterwards.
  pub async fn stories(&self, refresh: bool) -> Result<()> {
    let stories = self.engine.get_stories(refresh).await?;

    if stories.is_empty() {
      println!("No stories yet.");
    }
    for story in &stories {
      self.print_story(story)?;
    }

    if self.network.is_online() && self.engine.has_pending_changes()? {
      let summary = self.engine.flush().await?;
      if summary.synced > 0 {
        info!(synced = summary.synced, "opportunistic sync finished");
      }
    }

    Ok(())
  }

  fn print_story(&self, story: &Story) -> Result<()> {
    let mut flags = Vec::new();
    if story.is_offline {
      flags.push("offline");
    }
    if story.sync_pending {
      flags.push("pending sync");
    }
    if self.store.is_favorite(&story.id)? {
      flags.push("favorite");
    }

    let flags = if flags.is_empty() {
      String::new()
    } else {
      format!(" [{}]", flags.join(", "))
    };

    println!(
      "{}  {}{}\n    {}",
      story.created_at.format("%Y-%m-%d %H:%M"),
      story.name,
      flags,
      story.description
    );
    Ok(())
  }

  /// Submit a new story from a photo on disk, with coordinates from
  /// flags or the configured locator.
  pub async fn add(
    &self,
    description: String,
    photo_path: &Path,
    lat: Option<f64>,
    lon: Option<f64>,
    locate: bool,
  ) -> Result<()> {
    let photo = std::fs::read(photo_path)?;
    let photo_name = photo_path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| "photo.jpg".to_string());

    let (lat, lon) = if lat.is_none() && lon.is_none() && locate {
      match self.locate().await {
        Ok(coords) => (Some(coords.lat), Some(coords.lon)),
        Err(e) => {
          eprintln!("Could not determine location: {}", e);
          (None, None)
        }
      }
    } else {
      (lat, lon)
    };

    let draft = StoryDraft {
      description,
      photo,
      photo_name,
      lat,
      lon,
    };

    match self.engine.submit_story(draft).await? {
      SubmitOutcome::Submitted => println!("Story added successfully!"),
      SubmitOutcome::Queued(_) => {
        println!("Story saved offline! It will be synchronized when connection is restored.");
      }
    }
    Ok(())
  }

  async fn locate(&self) -> crate::error::Result<geo::Coordinates> {
    let Some(command) = &self.config.geolocate_command else {
      return Err(Error::Other("no geolocate_command configured".into()));
    };
    let locator = CommandLocator::new(command.clone());
    geo::resolve_location(&locator, Duration::from_secs(geo::LOCATE_TIMEOUT_SECS)).await
  }

  /// Assert connectivity and flush the queue, retrying even gated and
  /// exhausted entries.
  pub async fn sync(&self) -> Result<()> {
    self.network.set_online(true);
    let summary = self.engine.force_flush().await?;

    if summary.is_empty() && self.engine.has_pending_changes()? {
      // A reconnect-triggered flush already holds the running flag.
      println!("Sync already in progress.");
    } else if summary.attempted == 0 {
      println!("Nothing to synchronize.");
    } else {
      println!("Synchronized {} of {} queued stories.", summary.synced, summary.attempted);
    }
    Ok(())
  }

  pub fn favorites_list(&self) -> Result<()> {
    let favorites = self.store.favorites()?;
    if favorites.is_empty() {
      println!("No favorites saved.");
    }
    for entry in favorites {
      println!(
        "{}  {} (added {})",
        entry.story_id,
        entry.story_data.name,
        entry.added_at.format("%Y-%m-%d")
      );
    }
    Ok(())
  }

  pub fn favorites_add(&self, story_id: &str) -> Result<()> {
    match self.store.get_story(story_id)? {
      Some(story) => {
        self.store.add_to_favorites(&story)?;
        println!("Added to favorites: {}", story.name);
      }
      None => println!("No cached story with id {}; fetch stories first.", story_id),
    }
    Ok(())
  }

  pub fn favorites_remove(&self, story_id: &str) -> Result<()> {
    if self.store.remove_from_favorites(story_id)? {
      println!("Removed from favorites.");
    } else {
      println!("Not in favorites.");
    }
    Ok(())
  }

  pub async fn login(&mut self, email: &str, password: &str) -> Result<()> {
    let result = self.api.login(email, password).await?;
    self.store.set_token(&result.token)?;
    self.api = self.api.clone().with_token(Some(result.token));
    println!("Logged in as {}.", result.name);

    // A fresh session invalidates the old push registration server-side.
    let gateway = PushGateway::new(self.api.clone(), Arc::clone(&self.store));
    if gateway.resubscribe().await {
      debug!("push subscription refreshed");
    }
    self.push = Some(gateway);
    Ok(())
  }

  pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<()> {
    self.api.register(name, email, password).await?;
    println!("Account created. You can log in now.");
    Ok(())
  }

  pub fn logout(&mut self) -> Result<()> {
    self.store.clear_token()?;
    self.push = None;
    println!("Logged out.");
    Ok(())
  }

  pub async fn notify_subscribe(&self, endpoint: String, p256dh: String, auth: String) -> Result<()> {
    let Some(gateway) = &self.push else {
      println!("Push notifications need a session; log in first.");
      return Ok(());
    };
    let subscription = PushSubscription {
      endpoint,
      keys: PushKeys { p256dh, auth },
    };
    gateway.subscribe(subscription).await?;
    println!("Push notifications enabled.");
    Ok(())
  }

  pub async fn notify_unsubscribe(&self) -> Result<()> {
    let Some(gateway) = &self.push else {
      println!("Push notifications need a session; log in first.");
      return Ok(());
    };
    if gateway.unsubscribe().await? {
      println!("Push notifications disabled.");
    } else {
      println!("No active push subscription.");
    }
    Ok(())
  }

  pub fn notify_status(&self) -> Result<()> {
    match &self.push {
      Some(gateway) => match gateway.status()? {
        Some(sub) => println!("Subscribed: {}", sub.endpoint),
        None => println!("Not subscribed."),
      },
      None => println!("Push notifications need a session; log in first."),
    }
    Ok(())
  }

  pub fn stats(&self) -> Result<()> {
    let stats = self.store.db_stats()?;
    println!("Local storage: {} KB", stats.total_size / 1024);
    println!("  stories:        {}", stats.stories);
    println!("  favorites:      {}", stats.favorites);
    println!("  pending writes: {}", stats.pending_writes);
    Ok(())
  }

  /// Pre-populate the static cache with story photos and configured
  /// shell assets so they display offline.
  pub async fn cache_warm(&self) -> Result<()> {
    let stories = self.store.all_stories()?;
    let cached = self
      .engine
      .backend()
      .warm_static_cache(&stories, &self.config.cache.assets)
      .await?;
    println!("Cached {} static assets.", cached);
    Ok(())
  }

  pub fn cache_activate(&self) -> Result<()> {
    let removed = self.engine.backend().edge().activate()?;
    if removed.is_empty() {
      println!("Cache namespaces are current.");
    } else {
      for namespace in &removed {
        println!("Deleted stale cache namespace {}", namespace);
      }
    }
    Ok(())
  }

  /// Let spawned notification tasks drain, then remind about leftovers.
  pub async fn shutdown(self) {
    // Broadcast receivers wake on the next yield; one tick is enough for
    // queued messages to print.
    tokio::task::yield_now().await;
    let pending = self.store.pending_count().unwrap_or(0);
    if pending > 0 {
      eprintln!("{} stories still queued; run `storycat sync` when back online.", pending);
    }
  }
}
