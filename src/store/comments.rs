use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use libsql::{Row, Value, params, params::Params};
use serde::Serialize;

use super::{Store, id_values, now, parse_timestamp, placeholders, timestamp_text, unique_ids};
use crate::id::EntityId;
use crate::pipeline::Page;

const COMMENT_COLUMNS: &str = "id, content, video_id, owner, created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub content: String,
    pub video: EntityId,
    pub owner: EntityId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Store {
    pub async fn insert_comment(
        &self,
        video: &EntityId,
        owner: &EntityId,
        content: &str,
    ) -> Result<CommentRecord> {
        let id = EntityId::generate();
        self.conn()
            .execute(
                "INSERT INTO comments (id, content, video_id, owner, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    id.as_str(),
                    content.trim(),
                    video.as_str(),
                    owner.as_str(),
                    timestamp_text(&now())
                ],
            )
            .await
            .context("inserting comment")?;
        self.comment_by_id(&id)
            .await?
            .context("inserted comment vanished")
    }

    pub async fn comment_by_id(&self, id: &EntityId) -> Result<Option<CommentRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = ?1"),
                params![id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_comment(&row)?)),
            None => Ok(None),
        }
    }

    /// One page of a video's comments, newest first, plus the total count.
    pub async fn comments_for_video(
        &self,
        video: &EntityId,
        page: Page,
    ) -> Result<(Vec<CommentRecord>, u64)> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {COMMENT_COLUMNS} FROM comments WHERE video_id = ?1 ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
                    page.limit,
                    page.offset()
                ),
                params![video.as_str()],
            )
            .await?;
        let mut comments = Vec::new();
        while let Some(row) = rows.next().await? {
            comments.push(row_to_comment(&row)?);
        }
        let total = self
            .scalar(
                "SELECT COUNT(*) FROM comments WHERE video_id = ?1",
                vec![Value::from(video.as_str().to_string())],
            )
            .await?;
        Ok((comments, total.max(0) as u64))
    }

    pub async fn comment_counts(
        &self,
        videos: &[EntityId],
    ) -> Result<HashMap<EntityId, i64>> {
        let videos = unique_ids(videos);
        let mut counts = HashMap::new();
        if videos.is_empty() {
            return Ok(counts);
        }
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT video_id, COUNT(*) FROM comments WHERE video_id IN ({}) GROUP BY video_id",
                    placeholders(videos.len())
                ),
                Params::Positional(id_values(&videos)),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            counts.insert(EntityId::from_store(row.get(0)?), row.get::<i64>(1)?);
        }
        Ok(counts)
    }

    pub async fn update_comment_content(
        &self,
        id: &EntityId,
        content: &str,
    ) -> Result<Option<CommentRecord>> {
        self.conn()
            .execute(
                "UPDATE comments SET content = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.as_str(), content.trim(), timestamp_text(&now())],
            )
            .await?;
        self.comment_by_id(id).await
    }

    /// Deletes the comment and its likes together.
    pub async fn delete_comment_with_likes(&self, id: &EntityId) -> Result<bool> {
        let conn = self.transaction_connection().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "DELETE FROM likes WHERE target_kind = 'comment' AND target_id = ?1",
            params![id.as_str()],
        )
        .await?;
        let removed = tx
            .execute("DELETE FROM comments WHERE id = ?1", params![id.as_str()])
            .await?;
        tx.commit().await.context("committing comment delete")?;
        Ok(removed > 0)
    }
}

fn row_to_comment(row: &Row) -> Result<CommentRecord> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(CommentRecord {
        id: EntityId::from_store(row.get(0)?),
        content: row.get(1)?,
        video: EntityId::from_store(row.get(2)?),
        owner: EntityId::from_store(row.get(3)?),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::likes::TargetKind;
    use crate::store::test_support::temp_store;
    use crate::store::users::fixtures::seed_user;
    use crate::store::videos::fixtures::seed_video;

    #[tokio::test]
    async fn comments_page_newest_first() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = seed_user(&store, "owner").await?;
        let video = seed_video(&store, &owner.id, "Talk").await?;
        for text in ["one", "two", "three"] {
            store.insert_comment(&video.id, &owner.id, text).await?;
        }

        let page = Page::new(Some(1), Some(2)).map_err(anyhow::Error::from)?;
        let (comments, total) = store.comments_for_video(&video.id, page).await?;
        assert_eq!(total, 3);
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].content, "three");

        let counts = store.comment_counts(&[video.id.clone()]).await?;
        assert_eq!(counts[&video.id], 3);
        Ok(())
    }

    #[tokio::test]
    async fn update_and_delete_comment() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = seed_user(&store, "owner").await?;
        let video = seed_video(&store, &owner.id, "Talk").await?;
        let comment = store.insert_comment(&video.id, &owner.id, " first ").await?;
        assert_eq!(comment.content, "first");

        let edited = store
            .update_comment_content(&comment.id, "edited")
            .await?
            .context("edited comment")?;
        assert_eq!(edited.content, "edited");

        store
            .toggle_reaction(&owner.id, TargetKind::Comment, &comment.id, true)
            .await?;
        assert!(store.delete_comment_with_likes(&comment.id).await?);
        assert!(store.comment_by_id(&comment.id).await?.is_none());
        assert!(
            store
                .likes_for(TargetKind::Comment, &[comment.id.clone()])
                .await?
                .is_empty()
        );
        assert!(!store.delete_comment_with_likes(&comment.id).await?);
        Ok(())
    }
}
