//! Reactions on videos, comments and tweets.
//!
//! A like row is keyed by `(liked_by, target_kind, target_id)`; the unique
//! index makes the toggle a conditional upsert instead of read-then-write.

use std::collections::HashMap;
use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use libsql::{Row, Value, params, params::Params};
use serde::Serialize;

use super::{
    Store, group_by_key, id_values, now, parse_timestamp, placeholders, timestamp_text,
    unique_ids,
};
use crate::id::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Video,
    Comment,
    Tweet,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Comment => "comment",
            Self::Tweet => "tweet",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "video" => Some(Self::Video),
            "comment" => Some(Self::Comment),
            "tweet" => Some(Self::Tweet),
            _ => None,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRecord {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub liked_by: EntityId,
    pub target_kind: TargetKind,
    pub target_id: EntityId,
    pub liked: bool,
    pub created_at: DateTime<Utc>,
}

/// State of the caller's reaction after a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionState {
    Liked,
    Disliked,
    Cleared,
}

impl Store {
    /// Toggles a like (`liked = true`) or dislike on a target.
    ///
    /// Repeating the current reaction clears it; the opposite reaction flips
    /// the existing row's polarity.
    pub async fn toggle_reaction(
        &self,
        user: &EntityId,
        kind: TargetKind,
        target: &EntityId,
        liked: bool,
    ) -> Result<ReactionState> {
        let conn = self.transaction_connection().await?;
        let tx = conn.transaction().await?;

        let cleared = tx
            .execute(
                "DELETE FROM likes WHERE liked_by = ?1 AND target_kind = ?2 AND target_id = ?3 AND liked = ?4",
                params![user.as_str(), kind.as_str(), target.as_str(), i64::from(liked)],
            )
            .await?;

        let state = if cleared > 0 {
            ReactionState::Cleared
        } else {
            tx.execute(
                r#"
                INSERT INTO likes (id, liked_by, target_kind, target_id, liked, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(liked_by, target_kind, target_id) DO UPDATE SET
                    liked = excluded.liked,
                    created_at = excluded.created_at
                "#,
                params![
                    EntityId::generate().as_str(),
                    user.as_str(),
                    kind.as_str(),
                    target.as_str(),
                    i64::from(liked),
                    timestamp_text(&now())
                ],
            )
            .await?;
            if liked {
                ReactionState::Liked
            } else {
                ReactionState::Disliked
            }
        };

        tx.commit().await.context("committing reaction toggle")?;
        Ok(state)
    }

    /// Every like record for the given targets, grouped by target id.
    /// Targets without likes are absent from the map.
    pub async fn likes_for(
        &self,
        kind: TargetKind,
        targets: &[EntityId],
    ) -> Result<HashMap<EntityId, Vec<LikeRecord>>> {
        let targets = unique_ids(targets);
        if targets.is_empty() {
            return Ok(HashMap::new());
        }
        let mut values = vec![Value::from(kind.as_str().to_string())];
        values.extend(id_values(&targets));
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT id, liked_by, target_kind, target_id, liked, created_at FROM likes WHERE target_kind = ? AND target_id IN ({}) ORDER BY created_at",
                    placeholders(targets.len())
                ),
                Params::Positional(values),
            )
            .await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let record = row_to_like(&row)?;
            records.push((record.target_id.clone(), record));
        }
        Ok(group_by_key(records))
    }

    /// Videos the user liked (positive polarity only), latest like first.
    pub async fn liked_video_ids(&self, user: &EntityId) -> Result<Vec<EntityId>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT target_id FROM likes WHERE liked_by = ?1 AND target_kind = 'video' AND liked = 1 ORDER BY created_at DESC, rowid DESC",
                params![user.as_str()],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(EntityId::from_store(row.get(0)?));
        }
        Ok(ids)
    }
}

fn row_to_like(row: &Row) -> Result<LikeRecord> {
    let kind: String = row.get(2)?;
    let created_at: String = row.get(5)?;
    Ok(LikeRecord {
        id: EntityId::from_store(row.get(0)?),
        liked_by: EntityId::from_store(row.get(1)?),
        target_kind: TargetKind::parse(&kind)
            .with_context(|| format!("unknown like target kind {kind:?}"))?,
        target_id: EntityId::from_store(row.get(3)?),
        liked: row.get::<i64>(4)? != 0,
        created_at: parse_timestamp(&created_at)?,
    })
}
