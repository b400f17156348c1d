//! Durable local store for stories, favorites, and the pending-write
//! queue. Survives restarts and works entirely without the network.

pub mod schema;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::config::Config;
use crate::domain::{
  DbStats, FavoriteEntry, PendingWrite, PushSubscription, Story, StoryDraft, WriteKind,
};
use crate::error::{Error, Result};

const META_SCHEMA_VERSION: &str = "schema_version";
const META_TOKEN: &str = "session_token";
const META_PUSH_SUBSCRIPTION: &str = "push_subscription";

pub struct LocalStore {
  conn: Mutex<Connection>,
}

impl LocalStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    let dir = Config::data_dir()?;
    std::fs::create_dir_all(&dir)?;
    Self::open_at(&dir.join("store.db"))
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    Self::init(Connection::open(path)?)
  }

  /// Transient store for tests.
  pub fn open_in_memory() -> Result<Self> {
    Self::init(Connection::open_in_memory()?)
  }

  fn init(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.migrate()?;
    Ok(store)
  }

  /// Create tables and enforce the schema version. A database written by
  /// a different schema version is reset rather than reinterpreted.
  fn migrate(&self) -> Result<()> {
    let conn = self.conn()?;
    conn.execute_batch(schema::SCHEMA)?;

    let on_disk: Option<i64> = conn
      .query_row(
        "SELECT value FROM meta WHERE key = ?",
        params![META_SCHEMA_VERSION],
        |row| row.get::<_, String>(0),
      )
      .optional()?
      .and_then(|v| v.parse().ok());

    match on_disk {
      Some(v) if v == schema::SCHEMA_VERSION => {}
      Some(v) => {
        tracing::warn!(found = v, expected = schema::SCHEMA_VERSION, "resetting local store");
        conn.execute_batch(schema::RESET)?;
        conn.execute_batch(schema::SCHEMA)?;
        set_meta(&conn, META_SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
      }
      None => {
        set_meta(&conn, META_SCHEMA_VERSION, &schema::SCHEMA_VERSION.to_string())?;
      }
    }

    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|_| Error::Other("store lock poisoned".into()))
  }

  // ==========================================================================
  // Stories
  // ==========================================================================

  pub fn all_stories(&self) -> Result<Vec<Story>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT id, name, description, photo_url, photo, lat, lon, created_at,
              is_offline, sync_pending
       FROM stories ORDER BY created_at DESC",
    )?;

    let rows = stmt
      .query_map([], story_from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(finish_story).collect()
  }

  pub fn get_story(&self, id: &str) -> Result<Option<Story>> {
    let conn = self.conn()?;
    let row = conn
      .query_row(
        "SELECT id, name, description, photo_url, photo, lat, lon, created_at,
                is_offline, sync_pending
         FROM stories WHERE id = ?",
        params![id],
        story_from_row,
      )
      .optional()?;

    row.map(finish_story).transpose()
  }

  pub fn put_story(&self, story: &Story) -> Result<()> {
    let conn = self.conn()?;
    upsert_story(&conn, story)
  }

  /// Write-through target for a successful remote fetch: every synced row
  /// is replaced wholesale, while rows still awaiting confirmation are
  /// kept (they are owned by the pending queue, and the server does not
  /// know about them yet).
  pub fn replace_synced_stories(&self, stories: &[Story]) -> Result<()> {
    let conn = self.conn()?;

    conn.execute("BEGIN TRANSACTION", [])?;
    let result = (|| -> Result<()> {
      conn.execute("DELETE FROM stories WHERE sync_pending = 0", [])?;
      for story in stories {
        upsert_story(&conn, story)?;
      }
      Ok(())
    })();

    match result {
      Ok(()) => {
        conn.execute("COMMIT", [])?;
        Ok(())
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  /// Persist a story created while disconnected: local UUID, offline and
  /// pending flags set. Never touches the network.
  pub fn add_story_offline(&self, draft: &StoryDraft) -> Result<Story> {
    let story = Story {
      id: uuid::Uuid::new_v4().to_string(),
      name: draft.derived_name(),
      description: draft.description.trim().to_string(),
      photo_url: None,
      photo: Some(draft.photo.clone()),
      lat: draft.lat,
      lon: draft.lon,
      created_at: Utc::now(),
      is_offline: true,
      sync_pending: true,
    };
    self.put_story(&story)?;
    Ok(story)
  }

  /// Clear the offline/pending flags after a confirmed remote submission.
  pub fn mark_synced(&self, story_id: &str) -> Result<()> {
    let conn = self.conn()?;
    conn.execute(
      "UPDATE stories SET is_offline = 0, sync_pending = 0 WHERE id = ?",
      params![story_id],
    )?;
    Ok(())
  }

  // ==========================================================================
  // Favorites
  // ==========================================================================

  pub fn favorites(&self) -> Result<Vec<FavoriteEntry>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT story_id, added_at, story_data FROM favorites ORDER BY added_at DESC",
    )?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, Vec<u8>>(2)?,
        ))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows
      .into_iter()
      .map(|(story_id, added_at, data)| {
        Ok(FavoriteEntry {
          story_id,
          added_at: parse_ts(&added_at)?,
          story_data: serde_json::from_slice(&data)?,
        })
      })
      .collect()
  }

  /// Set semantics: adding an already-favorited story refreshes its
  /// snapshot and keeps the original added_at; it never duplicates.
  pub fn add_to_favorites(&self, story: &Story) -> Result<()> {
    let conn = self.conn()?;
    let snapshot = serde_json::to_vec(story)?;
    conn.execute(
      "INSERT INTO favorites (story_id, added_at, story_data) VALUES (?, ?, ?)
       ON CONFLICT(story_id) DO UPDATE SET story_data = excluded.story_data",
      params![story.id, Utc::now().to_rfc3339(), snapshot],
    )?;
    Ok(())
  }

  /// Returns true when an entry was actually removed.
  pub fn remove_from_favorites(&self, story_id: &str) -> Result<bool> {
    let conn = self.conn()?;
    let changed = conn.execute("DELETE FROM favorites WHERE story_id = ?", params![story_id])?;
    Ok(changed > 0)
  }

  pub fn is_favorite(&self, story_id: &str) -> Result<bool> {
    let conn = self.conn()?;
    let exists: i64 = conn.query_row(
      "SELECT EXISTS(SELECT 1 FROM favorites WHERE story_id = ?)",
      params![story_id],
      |row| row.get(0),
    )?;
    Ok(exists != 0)
  }

  // ==========================================================================
  // Pending-write queue
  // ==========================================================================

  /// Append a write to the queue. Returns the queue id; ascending ids are
  /// FIFO order.
  pub fn enqueue_write(&self, kind: WriteKind, story_id: &str, draft: &StoryDraft) -> Result<i64> {
    let conn = self.conn()?;
    conn.execute(
      "INSERT INTO pending_writes
         (kind, story_id, description, photo, photo_name, lat, lon, created_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        kind.as_str(),
        story_id,
        draft.description,
        draft.photo,
        draft.photo_name,
        draft.lat,
        draft.lon,
        Utc::now().to_rfc3339(),
      ],
    )?;
    Ok(conn.last_insert_rowid())
  }

  /// The full queue in FIFO order.
  pub fn pending_writes(&self) -> Result<Vec<PendingWrite>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT id, kind, story_id, description, photo, photo_name, lat, lon,
              created_at, attempts, not_before
       FROM pending_writes ORDER BY id ASC",
    )?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, Vec<u8>>(4)?,
          row.get::<_, String>(5)?,
          row.get::<_, Option<f64>>(6)?,
          row.get::<_, Option<f64>>(7)?,
          row.get::<_, String>(8)?,
          row.get::<_, u32>(9)?,
          row.get::<_, Option<String>>(10)?,
        ))
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    rows
      .into_iter()
      .map(
        |(id, kind, story_id, description, photo, photo_name, lat, lon, created_at, attempts, not_before)| {
          Ok(PendingWrite {
            id,
            kind: WriteKind::parse(&kind)?,
            story_id,
            draft: StoryDraft {
              description,
              photo,
              photo_name,
              lat,
              lon,
            },
            created_at: parse_ts(&created_at)?,
            attempts,
            not_before: not_before.as_deref().map(parse_ts).transpose()?,
          })
        },
      )
      .collect()
  }

  pub fn pending_count(&self) -> Result<u64> {
    let conn = self.conn()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_writes", [], |row| row.get(0))?;
    Ok(count as u64)
  }

  /// Remove a confirmed write. Only called after the remote acknowledged
  /// the submission.
  pub fn remove_write(&self, id: i64) -> Result<()> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM pending_writes WHERE id = ?", params![id])?;
    Ok(())
  }

  /// Record a failed attempt and set the backoff gate for the next one.
  pub fn record_attempt(&self, id: i64, not_before: Option<DateTime<Utc>>) -> Result<()> {
    let conn = self.conn()?;
    conn.execute(
      "UPDATE pending_writes SET attempts = attempts + 1, not_before = ? WHERE id = ?",
      params![not_before.map(|t| t.to_rfc3339()), id],
    )?;
    Ok(())
  }

  // ==========================================================================
  // Meta / session
  // ==========================================================================

  pub fn token(&self) -> Result<Option<String>> {
    self.get_meta(META_TOKEN)
  }

  pub fn set_token(&self, token: &str) -> Result<()> {
    let conn = self.conn()?;
    set_meta(&conn, META_TOKEN, token)
  }

  pub fn clear_token(&self) -> Result<()> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM meta WHERE key = ?", params![META_TOKEN])?;
    Ok(())
  }

  pub fn push_subscription(&self) -> Result<Option<PushSubscription>> {
    match self.get_meta(META_PUSH_SUBSCRIPTION)? {
      Some(json) => Ok(Some(serde_json::from_str(&json)?)),
      None => Ok(None),
    }
  }

  pub fn set_push_subscription(&self, subscription: Option<&PushSubscription>) -> Result<()> {
    let conn = self.conn()?;
    match subscription {
      Some(sub) => set_meta(&conn, META_PUSH_SUBSCRIPTION, &serde_json::to_string(sub)?),
      None => {
        conn.execute("DELETE FROM meta WHERE key = ?", params![META_PUSH_SUBSCRIPTION])?;
        Ok(())
      }
    }
  }

  fn get_meta(&self, key: &str) -> Result<Option<String>> {
    let conn = self.conn()?;
    Ok(
      conn
        .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| row.get(0))
        .optional()?,
    )
  }

  // ==========================================================================
  // Stats
  // ==========================================================================

  /// Approximate storage usage for display.
  pub fn db_stats(&self) -> Result<DbStats> {
    let conn = self.conn()?;
    let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    let stories: i64 = conn.query_row("SELECT COUNT(*) FROM stories", [], |row| row.get(0))?;
    let favorites: i64 = conn.query_row("SELECT COUNT(*) FROM favorites", [], |row| row.get(0))?;
    let pending: i64 =
      conn.query_row("SELECT COUNT(*) FROM pending_writes", [], |row| row.get(0))?;

    Ok(DbStats {
      total_size: (page_count * page_size) as u64,
      stories: stories as u64,
      favorites: favorites as u64,
      pending_writes: pending as u64,
    })
  }
}

fn upsert_story(conn: &Connection, story: &Story) -> Result<()> {
  conn.execute(
    "INSERT OR REPLACE INTO stories
       (id, name, description, photo_url, photo, lat, lon, created_at, is_offline, sync_pending)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    params![
      story.id,
      story.name,
      story.description,
      story.photo_url,
      story.photo,
      story.lat,
      story.lon,
      story.created_at.to_rfc3339(),
      story.is_offline,
      story.sync_pending,
    ],
  )?;
  Ok(())
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
  conn.execute(
    "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
    params![key, value],
  )?;
  Ok(())
}

type StoryRow = (
  String,
  String,
  String,
  Option<String>,
  Option<Vec<u8>>,
  Option<f64>,
  Option<f64>,
  String,
  bool,
  bool,
);

fn story_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoryRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
    row.get(6)?,
    row.get(7)?,
    row.get(8)?,
    row.get(9)?,
  ))
}

fn finish_story(row: StoryRow) -> Result<Story> {
  let (id, name, description, photo_url, photo, lat, lon, created_at, is_offline, sync_pending) =
    row;
  Ok(Story {
    id,
    name,
    description,
    photo_url,
    photo,
    lat,
    lon,
    created_at: parse_ts(&created_at)?,
    is_offline,
    sync_pending,
  })
}

/// Parse an RFC 3339 timestamp as written by this store.
fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Other(format!("failed to parse timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn draft(description: &str) -> StoryDraft {
    StoryDraft {
      description: description.to_string(),
      photo: vec![0xAB, 0xCD],
      photo_name: "photo.jpg".into(),
      lat: Some(-6.2),
      lon: Some(106.8),
    }
  }

  fn server_story(id: &str) -> Story {
    Story {
      id: id.to_string(),
      name: format!("story {}", id),
      description: "a story fetched from the server".into(),
      photo_url: Some(format!("https://story-api.dicoding.dev/images/{}.jpg", id)),
      photo: None,
      lat: None,
      lon: None,
      created_at: Utc::now(),
      is_offline: false,
      sync_pending: false,
    }
  }

  #[test]
  fn test_add_story_offline_sets_flags() {
    let store = LocalStore::open_in_memory().unwrap();
    let story = store.add_story_offline(&draft("written on the train with no signal")).unwrap();

    assert!(story.is_offline);
    assert!(story.sync_pending);

    let loaded = store.get_story(&story.id).unwrap().unwrap();
    assert!(loaded.is_offline);
    assert!(loaded.sync_pending);
    assert_eq!(loaded.photo.as_deref(), Some(&[0xAB, 0xCD][..]));
  }

  #[test]
  fn test_mark_synced_clears_flags() {
    let store = LocalStore::open_in_memory().unwrap();
    let story = store.add_story_offline(&draft("written on the train with no signal")).unwrap();

    store.mark_synced(&story.id).unwrap();

    let loaded = store.get_story(&story.id).unwrap().unwrap();
    assert!(!loaded.is_offline);
    assert!(!loaded.sync_pending);
  }

  #[test]
  fn test_favorites_are_a_set() {
    let store = LocalStore::open_in_memory().unwrap();
    let mut story = server_story("s1");

    store.add_to_favorites(&story).unwrap();
    story.description = "updated description".into();
    store.add_to_favorites(&story).unwrap();

    let favorites = store.favorites().unwrap();
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].story_data.description, "updated description");
    assert!(store.is_favorite("s1").unwrap());
  }

  #[test]
  fn test_remove_from_favorites() {
    let store = LocalStore::open_in_memory().unwrap();
    store.add_to_favorites(&server_story("s1")).unwrap();

    assert!(store.remove_from_favorites("s1").unwrap());
    assert!(!store.remove_from_favorites("s1").unwrap());
    assert!(!store.is_favorite("s1").unwrap());
    assert!(store.favorites().unwrap().is_empty());
  }

  #[test]
  fn test_queue_is_fifo() {
    let store = LocalStore::open_in_memory().unwrap();
    store.enqueue_write(WriteKind::CreateStory, "a", &draft("first story in the queue")).unwrap();
    store.enqueue_write(WriteKind::CreateStory, "b", &draft("second story in the queue")).unwrap();
    store.enqueue_write(WriteKind::CreateStory, "c", &draft("third story in the queue")).unwrap();

    let writes = store.pending_writes().unwrap();
    let order: Vec<&str> = writes.iter().map(|w| w.story_id.as_str()).collect();
    assert_eq!(order, ["a", "b", "c"]);
    assert_eq!(store.pending_count().unwrap(), 3);
  }

  #[test]
  fn test_record_attempt_and_remove() {
    let store = LocalStore::open_in_memory().unwrap();
    let id = store.enqueue_write(WriteKind::CreateStory, "a", &draft("a story that will fail")).unwrap();

    let gate = Utc::now() + chrono::Duration::minutes(1);
    store.record_attempt(id, Some(gate)).unwrap();

    let writes = store.pending_writes().unwrap();
    assert_eq!(writes[0].attempts, 1);
    assert!(writes[0].not_before.is_some());

    store.remove_write(id).unwrap();
    assert_eq!(store.pending_count().unwrap(), 0);
  }

  #[test]
  fn test_replace_synced_keeps_pending_rows() {
    let store = LocalStore::open_in_memory().unwrap();
    store.put_story(&server_story("old")).unwrap();
    let local = store.add_story_offline(&draft("written while offline, not yet synced")).unwrap();

    store.replace_synced_stories(&[server_story("new1"), server_story("new2")]).unwrap();

    let stories = store.all_stories().unwrap();
    let ids: Vec<&str> = stories.iter().map(|s| s.id.as_str()).collect();
    assert!(ids.contains(&"new1"));
    assert!(ids.contains(&"new2"));
    assert!(ids.contains(&local.id.as_str()));
    assert!(!ids.contains(&"old"));
  }

  #[test]
  fn test_token_round_trip() {
    let store = LocalStore::open_in_memory().unwrap();
    assert_eq!(store.token().unwrap(), None);

    store.set_token("bearer-123").unwrap();
    assert_eq!(store.token().unwrap().as_deref(), Some("bearer-123"));

    store.clear_token().unwrap();
    assert_eq!(store.token().unwrap(), None);
  }

  #[test]
  fn test_push_subscription_round_trip() {
    let store = LocalStore::open_in_memory().unwrap();
    let sub = PushSubscription {
      endpoint: "https://push.example/abc".into(),
      keys: crate::domain::PushKeys {
        p256dh: "p".into(),
        auth: "a".into(),
      },
    };

    store.set_push_subscription(Some(&sub)).unwrap();
    assert_eq!(
      store.push_subscription().unwrap().unwrap().endpoint,
      "https://push.example/abc"
    );

    store.set_push_subscription(None).unwrap();
    assert!(store.push_subscription().unwrap().is_none());
  }

  #[test]
  fn test_db_stats_counts() {
    let store = LocalStore::open_in_memory().unwrap();
    store.put_story(&server_story("s1")).unwrap();
    store.add_to_favorites(&server_story("s1")).unwrap();
    store.enqueue_write(WriteKind::CreateStory, "x", &draft("queued while disconnected")).unwrap();

    let stats = store.db_stats().unwrap();
    assert_eq!(stats.stories, 1);
    assert_eq!(stats.favorites, 1);
    assert_eq!(stats.pending_writes, 1);
    assert!(stats.total_size > 0);
  }

  #[test]
  fn test_schema_version_mismatch_resets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    {
      let store = LocalStore::open_at(&path).unwrap();
      store.put_story(&server_story("s1")).unwrap();
      let conn = store.conn().unwrap();
      set_meta(&conn, META_SCHEMA_VERSION, "0").unwrap();
    }

    let store = LocalStore::open_at(&path).unwrap();
    assert!(store.all_stories().unwrap().is_empty());
    assert_eq!(
      store.get_meta(META_SCHEMA_VERSION).unwrap().as_deref(),
      Some(&schema::SCHEMA_VERSION.to_string()[..]),
    );
  }
}
