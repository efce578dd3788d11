//! Entity store backed by libsql.
//!
//! The store owns one long-lived connection for point lookups and scans, and
//! hands out short-lived connections for multi-statement transactions (toggles
//! and cascades) so two requests never share an open transaction.

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database, Value, params, params::Params};

use crate::id::EntityId;

pub mod comments;
pub mod likes;
pub mod playlists;
pub mod subscriptions;
pub mod tweets;
pub mod users;
pub mod videos;

pub const DATABASE_FILE: &str = "vidhub.db";

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        PRAGMA busy_timeout=5000;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            avatar TEXT NOT NULL,
            cover_image TEXT NOT NULL DEFAULT '',
            password_hash TEXT NOT NULL,
            refresh_token_digest TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS watch_history (
            user_id TEXT NOT NULL,
            video_id TEXT NOT NULL,
            watched_at TEXT NOT NULL,
            PRIMARY KEY (user_id, video_id)
        );

        CREATE TABLE IF NOT EXISTS videos (
            id TEXT PRIMARY KEY,
            video_file TEXT NOT NULL,
            thumbnail TEXT NOT NULL,
            title TEXT NOT NULL,
            search_title TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            duration REAL NOT NULL DEFAULT 0,
            views INTEGER NOT NULL DEFAULT 0,
            is_published INTEGER NOT NULL DEFAULT 1,
            owner TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS comments (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            video_id TEXT NOT NULL,
            owner TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS likes (
            id TEXT PRIMARY KEY,
            liked_by TEXT NOT NULL,
            target_kind TEXT NOT NULL CHECK (target_kind IN ('video', 'comment', 'tweet')),
            target_id TEXT NOT NULL,
            liked INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            UNIQUE (liked_by, target_kind, target_id)
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            subscriber TEXT NOT NULL,
            channel TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (subscriber, channel)
        );

        CREATE TABLE IF NOT EXISTS tweets (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            owner TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS playlists (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            owner TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS playlist_videos (
            playlist_id TEXT NOT NULL,
            video_id TEXT NOT NULL,
            added_at TEXT NOT NULL,
            PRIMARY KEY (playlist_id, video_id)
        );

        CREATE INDEX IF NOT EXISTS idx_videos_owner ON videos(owner);
        CREATE INDEX IF NOT EXISTS idx_videos_created ON videos(created_at);
        CREATE INDEX IF NOT EXISTS idx_comments_video ON comments(video_id);
        CREATE INDEX IF NOT EXISTS idx_likes_target ON likes(target_kind, target_id);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_channel ON subscriptions(channel);
        CREATE INDEX IF NOT EXISTS idx_tweets_owner ON tweets(owner);
        CREATE INDEX IF NOT EXISTS idx_playlists_owner ON playlists(owner);
        CREATE INDEX IF NOT EXISTS idx_playlist_videos_video ON playlist_videos(video_id);
        CREATE INDEX IF NOT EXISTS idx_watch_history_video ON watch_history(video_id);
        "#,
    )
    .await?;
    Ok(())
}

/// Handle to the vidhub database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    conn: Connection,
}

impl Store {
    /// Opens (and if necessary creates) the database and ensures the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening database {}", path.display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Dedicated connection for a transaction; dropped once it commits.
    pub(crate) async fn transaction_connection(&self) -> Result<Connection> {
        let conn = self.db.connect()?;
        configure_connection(&conn).await?;
        Ok(conn)
    }

    /// Runs `SELECT COUNT(*)`-style statements that yield one integer.
    pub(crate) async fn scalar(&self, sql: &str, values: Vec<Value>) -> Result<i64> {
        let mut rows = self.conn.query(sql, Params::Positional(values)).await?;
        let row = rows.next().await?.context("scalar query returned no row")?;
        Ok(row.get::<Option<i64>>(0)?.unwrap_or(0))
    }
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Fixed-width RFC 3339 so lexical order matches chronological order.
pub(crate) fn timestamp_text(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("parsing stored timestamp {value:?}"))?
        .with_timezone(&Utc))
}

/// `?, ?, ?` for an `IN (...)` clause of `count` values.
pub(crate) fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

pub(crate) fn id_values(ids: &[EntityId]) -> Vec<Value> {
    ids.iter()
        .map(|id| Value::from(id.as_str().to_string()))
        .collect()
}

/// Removes duplicates while keeping first-seen order.
pub(crate) fn unique_ids<'a>(ids: impl IntoIterator<Item = &'a EntityId>) -> Vec<EntityId> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

/// Groups rows by a key while preserving row order inside each group.
pub(crate) fn group_by_key<T>(
    rows: impl IntoIterator<Item = (EntityId, T)>,
) -> HashMap<EntityId, Vec<T>> {
    let mut grouped: HashMap<EntityId, Vec<T>> = HashMap::new();
    for (key, row) in rows {
        grouped.entry(key).or_default().push(row);
    }
    grouped
}

#[cfg(test)]
pub(crate) async fn table_count(store: &Store, table: &str) -> Result<i64> {
    store
        .scalar(&format!("SELECT COUNT(*) FROM {table}"), Vec::new())
        .await
}
