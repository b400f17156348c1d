//! SQL schema for the local store.

/// Bump when the table shapes change. An on-disk database with a
/// different version is reset (no in-place migrations yet).
pub const SCHEMA_VERSION: i64 = 1;

pub const SCHEMA: &str = r#"
-- Cached and locally-created stories
CREATE TABLE IF NOT EXISTS stories (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    photo_url TEXT,
    photo BLOB,
    lat REAL,
    lon REAL,
    created_at TEXT NOT NULL,
    is_offline INTEGER NOT NULL DEFAULT 0,
    sync_pending INTEGER NOT NULL DEFAULT 0
);

-- Favorites: one row per story id, with a denormalized snapshot
CREATE TABLE IF NOT EXISTS favorites (
    story_id TEXT PRIMARY KEY,
    added_at TEXT NOT NULL,
    story_data BLOB NOT NULL
);

-- FIFO queue of offline writes; id order is submission order
CREATE TABLE IF NOT EXISTS pending_writes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    story_id TEXT NOT NULL,
    description TEXT NOT NULL,
    photo BLOB NOT NULL,
    photo_name TEXT NOT NULL,
    lat REAL,
    lon REAL,
    created_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    not_before TEXT
);

-- Schema version, session token, push subscription
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Dropped (in reverse dependency order) when the schema version on disk
/// does not match [`SCHEMA_VERSION`].
pub const RESET: &str = r#"
DROP TABLE IF EXISTS pending_writes;
DROP TABLE IF EXISTS favorites;
DROP TABLE IF EXISTS stories;
DROP TABLE IF EXISTS meta;
"#;
