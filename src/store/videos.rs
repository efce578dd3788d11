//! Video rows, view counters, dashboard aggregates and the delete cascade.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use libsql::{Row, Value, params, params::Params};
use serde::Serialize;

use super::{Store, id_values, now, parse_timestamp, placeholders, timestamp_text, unique_ids};
use crate::id::EntityId;
use crate::pipeline::{VIDEO_COLUMNS, VideoPipeline};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub video_file: String,
    pub thumbnail: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub owner: EntityId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewVideo {
    pub id: EntityId,
    pub video_file: String,
    pub thumbnail: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub owner: EntityId,
}

/// Aggregates over one channel; every figure is zero for an empty channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub total_views: i64,
    pub total_videos: i64,
    pub total_subscribers: i64,
    pub total_likes: i64,
}

/// Title as matched by search: SQLite's `lower()` only folds ASCII, so the
/// Unicode-lowered form is stored next to the display title.
fn search_title(title: &str) -> String {
    title.trim().to_lowercase()
}

impl Store {
    pub async fn insert_video(&self, video: &NewVideo) -> Result<VideoRecord> {
        let stamp = timestamp_text(&now());
        self.conn()
            .execute(
                r#"
                INSERT INTO videos (
                    id, video_file, thumbnail, title, search_title, description, duration,
                    views, is_published, owner, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 1, ?8, ?9, ?9)
                "#,
                params![
                    video.id.as_str(),
                    video.video_file.as_str(),
                    video.thumbnail.as_str(),
                    video.title.trim(),
                    search_title(&video.title),
                    video.description.trim(),
                    video.duration,
                    video.owner.as_str(),
                    stamp,
                ],
            )
            .await
            .context("inserting video")?;
        self.video_by_id(&video.id)
            .await?
            .context("inserted video vanished")
    }

    /// Point lookup that ignores publication state.
    pub async fn video_by_id(&self, id: &EntityId) -> Result<Option<VideoRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"),
                params![id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row)?)),
            None => Ok(None),
        }
    }

    /// Runs a compiled pipeline. The total ignores paging.
    pub async fn query_videos(&self, pipeline: &VideoPipeline) -> Result<(Vec<VideoRecord>, u64)> {
        let compiled = pipeline.compile();
        let mut rows = self
            .conn()
            .query(&compiled.select_sql, Params::Positional(compiled.select_values))
            .await
            .context("querying videos")?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video(&row)?);
        }
        let total = self
            .scalar(&compiled.count_sql, compiled.count_values)
            .await?;
        Ok((videos, total.max(0) as u64))
    }

    pub async fn videos_by_ids(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, VideoRecord>> {
        let ids = unique_ids(ids);
        let mut videos = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(videos);
        }
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {VIDEO_COLUMNS} FROM videos WHERE id IN ({})",
                    placeholders(ids.len())
                ),
                Params::Positional(id_values(&ids)),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let video = row_to_video(&row)?;
            videos.insert(video.id.clone(), video);
        }
        Ok(videos)
    }

    pub async fn update_video_details(
        &self,
        id: &EntityId,
        title: Option<&str>,
        description: Option<&str>,
        thumbnail: Option<&str>,
    ) -> Result<Option<VideoRecord>> {
        self.conn()
            .execute(
                r#"
                UPDATE videos SET
                    title = COALESCE(?2, title),
                    search_title = COALESCE(?3, search_title),
                    description = COALESCE(?4, description),
                    thumbnail = COALESCE(?5, thumbnail),
                    updated_at = ?6
                WHERE id = ?1
                "#,
                params![
                    id.as_str(),
                    title.map(str::trim),
                    title.map(search_title),
                    description.map(str::trim),
                    thumbnail,
                    timestamp_text(&now())
                ],
            )
            .await?;
        self.video_by_id(id).await
    }

    pub async fn toggle_published(&self, id: &EntityId) -> Result<Option<VideoRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE videos SET is_published = 1 - is_published, updated_at = ?2 WHERE id = ?1 RETURNING {VIDEO_COLUMNS}"
                ),
                params![id.as_str(), timestamp_text(&now())],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row)?)),
            None => Ok(None),
        }
    }

    /// Single-statement increment; unpublished videos are not counted.
    pub async fn increment_views(&self, id: &EntityId) -> Result<Option<VideoRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "UPDATE videos SET views = views + 1 WHERE id = ?1 AND is_published = 1 RETURNING {VIDEO_COLUMNS}"
                ),
                params![id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_video(&row)?)),
            None => Ok(None),
        }
    }

    /// Removes only the row. Used to undo an abandoned publish, where nothing
    /// can reference the video yet.
    pub async fn delete_video_row(&self, id: &EntityId) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM videos WHERE id = ?1", params![id.as_str()])
            .await?;
        Ok(removed > 0)
    }

    /// Deletes the video and everything that references it in one
    /// transaction. Returns `false` when the video did not exist.
    pub async fn delete_video_with_dependents(&self, id: &EntityId) -> Result<bool> {
        let conn = self.transaction_connection().await?;
        let tx = conn.transaction().await?;
        let video = id.as_str();

        tx.execute(
            r#"
            DELETE FROM likes WHERE target_kind = 'comment'
              AND target_id IN (SELECT id FROM comments WHERE video_id = ?1)
            "#,
            params![video],
        )
        .await?;
        tx.execute(
            "DELETE FROM likes WHERE target_kind = 'video' AND target_id = ?1",
            params![video],
        )
        .await?;
        tx.execute("DELETE FROM comments WHERE video_id = ?1", params![video])
            .await?;
        tx.execute(
            "DELETE FROM playlist_videos WHERE video_id = ?1",
            params![video],
        )
        .await?;
        tx.execute(
            "DELETE FROM watch_history WHERE video_id = ?1",
            params![video],
        )
        .await?;
        let removed = tx
            .execute("DELETE FROM videos WHERE id = ?1", params![video])
            .await?;

        tx.commit().await.context("committing video cascade")?;
        Ok(removed > 0)
    }

    /// Every video of a channel, unpublished included, newest first.
    pub async fn channel_videos(&self, owner: &EntityId) -> Result<Vec<VideoRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {VIDEO_COLUMNS} FROM videos WHERE owner = ?1 ORDER BY created_at DESC, id DESC"
                ),
                params![owner.as_str()],
            )
            .await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_video(&row)?);
        }
        Ok(videos)
    }

    pub async fn channel_stats(&self, owner: &EntityId) -> Result<ChannelStats> {
        let owner_value = || vec![Value::from(owner.as_str().to_string())];
        Ok(ChannelStats {
            total_views: self
                .scalar(
                    "SELECT COALESCE(SUM(views), 0) FROM videos WHERE owner = ?1",
                    owner_value(),
                )
                .await?,
            total_videos: self
                .scalar("SELECT COUNT(*) FROM videos WHERE owner = ?1", owner_value())
                .await?,
            total_subscribers: self
                .scalar(
                    "SELECT COUNT(*) FROM subscriptions WHERE channel = ?1",
                    owner_value(),
                )
                .await?,
            total_likes: self
                .scalar(
                    r#"
                    SELECT COUNT(*) FROM likes
                    JOIN videos ON videos.id = likes.target_id
                    WHERE likes.target_kind = 'video' AND likes.liked = 1 AND videos.owner = ?1
                    "#,
                    owner_value(),
                )
                .await?,
        })
    }
}

pub(crate) fn row_to_video(row: &Row) -> Result<VideoRecord> {
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok(VideoRecord {
        id: EntityId::from_store(row.get(0)?),
        video_file: row.get(1)?,
        thumbnail: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        duration: row.get(5)?,
        views: row.get(6)?,
        is_published: row.get::<i64>(7)? != 0,
        owner: EntityId::from_store(row.get(8)?),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) async fn seed_video(store: &Store, owner: &EntityId, title: &str) -> Result<VideoRecord> {
        let id = EntityId::generate();
        store
            .insert_video(&NewVideo {
                video_file: format!("http://localhost/assets/videos/{id}.mp4"),
                thumbnail: format!("http://localhost/assets/images/{id}.png"),
                id,
                title: title.to_string(),
                description: format!("about {title}"),
                duration: 12.5,
                owner: owner.clone(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::seed_video;
    use super::*;
    use crate::pipeline::{Page, SearchTerms, VideoFilter};
    use crate::store::likes::TargetKind;
    use crate::store::test_support::temp_store;
    use crate::store::users::fixtures::seed_user;

    #[tokio::test]
    async fn insert_and_toggle_publish() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = seed_user(&store, "owner").await?;
        let video = seed_video(&store, &owner.id, "First").await?;
        assert!(video.is_published);
        assert_eq!(video.views, 0);

        let hidden = store
            .toggle_published(&video.id)
            .await?
            .context("toggle")?;
        assert!(!hidden.is_published);
        assert!(store.increment_views(&video.id).await?.is_none());

        store.toggle_published(&video.id).await?;
        let viewed = store
            .increment_views(&video.id)
            .await?
            .context("views")?;
        assert_eq!(viewed.views, 1);
        assert!(store.toggle_published(&EntityId::generate()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn query_filters_search_and_pages() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = seed_user(&store, "owner").await?;
        let other = seed_user(&store, "other").await?;
        seed_video(&store, &owner.id, "Rust async deep dive").await?;
        seed_video(&store, &owner.id, "Cooking pasta").await?;
        let hidden = seed_video(&store, &owner.id, "Rust secrets").await?;
        store.toggle_published(&hidden.id).await?;
        seed_video(&store, &other.id, "Async rust for beginners").await?;

        let pipeline = VideoPipeline::new()
            .filter(VideoFilter::Published(true))
            .search(SearchTerms::parse("rust async"));
        let (found, total) = store.query_videos(&pipeline).await?;
        assert_eq!(total, 2);
        assert!(found.iter().all(|video| video.title.to_lowercase().contains("rust")));

        let pipeline = VideoPipeline::new()
            .filter(VideoFilter::Published(true))
            .filter(VideoFilter::Owner(owner.id.clone()))
            .page(Page::new(Some(1), Some(1)).map_err(anyhow::Error::from)?);
        let (page, total) = store.query_videos(&pipeline).await?;
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn search_folds_non_ascii_titles() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = seed_user(&store, "owner").await?;
        let video = seed_video(&store, &owner.id, "École du code").await?;
        seed_video(&store, &owner.id, "Straße bauen").await?;

        let search = |query: &str| VideoPipeline::new().search(SearchTerms::parse(query));
        let (found, _) = store.query_videos(&search("école")).await?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, video.id);
        let (found, _) = store.query_videos(&search("STRASSE")).await?;
        assert!(found.is_empty());
        let (found, _) = store.query_videos(&search("STRAßE")).await?;
        assert_eq!(found.len(), 1);

        store
            .update_video_details(&video.id, Some("ÉTÉ en montagne"), None, None)
            .await?;
        let (found, _) = store.query_videos(&search("été")).await?;
        assert_eq!(found.len(), 1);
        let (found, _) = store.query_videos(&search("école")).await?;
        assert!(found.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn cascade_removes_every_dependent() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = seed_user(&store, "owner").await?;
        let fan = seed_user(&store, "fan").await?;
        let video = seed_video(&store, &owner.id, "Doomed").await?;
        let keep = seed_video(&store, &owner.id, "Survivor").await?;

        let comment = store.insert_comment(&video.id, &fan.id, "nice").await?;
        store
            .toggle_reaction(&fan.id, TargetKind::Video, &video.id, true)
            .await?;
        store
            .toggle_reaction(&owner.id, TargetKind::Comment, &comment.id, true)
            .await?;
        store
            .toggle_reaction(&fan.id, TargetKind::Video, &keep.id, true)
            .await?;
        let playlist = store.create_playlist(&fan.id, "mix", "").await?;
        store.add_video_to_playlist(&playlist.id, &video.id).await?;
        store.add_video_to_playlist(&playlist.id, &keep.id).await?;
        store.record_watch(&fan.id, &video.id).await?;

        assert!(store.delete_video_with_dependents(&video.id).await?);

        assert!(store.video_by_id(&video.id).await?.is_none());
        assert!(store.comment_by_id(&comment.id).await?.is_none());
        let likes = store.likes_for(TargetKind::Video, &[video.id.clone()]).await?;
        assert!(likes.is_empty());
        let comment_likes = store
            .likes_for(TargetKind::Comment, &[comment.id.clone()])
            .await?;
        assert!(comment_likes.is_empty());
        assert_eq!(
            store.playlist_video_ids(&playlist.id).await?,
            vec![keep.id.clone()]
        );
        assert!(store.watch_history(&fan.id).await?.is_empty());
        assert_eq!(
            store.likes_for(TargetKind::Video, &[keep.id.clone()]).await?[&keep.id].len(),
            1
        );

        assert!(!store.delete_video_with_dependents(&video.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn channel_stats_default_to_zero() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let lonely = seed_user(&store, "lonely").await?;
        assert_eq!(store.channel_stats(&lonely.id).await?, ChannelStats::default());
        Ok(())
    }

    #[tokio::test]
    async fn channel_stats_count_positive_likes_only() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = seed_user(&store, "owner").await?;
        let fan = seed_user(&store, "fan").await?;
        let hater = seed_user(&store, "hater").await?;
        let video = seed_video(&store, &owner.id, "Stats").await?;
        store.increment_views(&video.id).await?;
        store.increment_views(&video.id).await?;
        store
            .toggle_reaction(&fan.id, TargetKind::Video, &video.id, true)
            .await?;
        store
            .toggle_reaction(&hater.id, TargetKind::Video, &video.id, false)
            .await?;
        store.toggle_subscription(&fan.id, &owner.id).await?;

        let stats = store.channel_stats(&owner.id).await?;
        assert_eq!(
            stats,
            ChannelStats {
                total_views: 2,
                total_videos: 1,
                total_subscribers: 1,
                total_likes: 1,
            }
        );
        Ok(())
    }
}
