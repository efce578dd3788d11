use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use libsql::{Row, params, params::Params};
use serde::Serialize;

use super::{
    Store, group_by_key, id_values, now, parse_timestamp, placeholders, timestamp_text,
    unique_ids,
};
use crate::id::EntityId;

const PLAYLIST_COLUMNS: &str = "id, name, description, owner, created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistRecord {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub owner: EntityId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Store {
    pub async fn create_playlist(
        &self,
        owner: &EntityId,
        name: &str,
        description: &str,
    ) -> Result<PlaylistRecord> {
        let id = EntityId::generate();
        self.conn()
            .execute(
                "INSERT INTO playlists (id, name, description, owner, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    id.as_str(),
                    name.trim(),
                    description.trim(),
                    owner.as_str(),
                    timestamp_text(&now())
                ],
            )
            .await
            .context("inserting playlist")?;
        self.playlist_by_id(&id)
            .await?
            .context("inserted playlist vanished")
    }

    pub async fn playlist_by_id(&self, id: &EntityId) -> Result<Option<PlaylistRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE id = ?1"),
                params![id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_playlist(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn playlists_by_owner(&self, owner: &EntityId) -> Result<Vec<PlaylistRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE owner = ?1 ORDER BY created_at DESC, rowid DESC"
                ),
                params![owner.as_str()],
            )
            .await?;
        let mut playlists = Vec::new();
        while let Some(row) = rows.next().await? {
            playlists.push(row_to_playlist(&row)?);
        }
        Ok(playlists)
    }

    pub async fn update_playlist(
        &self,
        id: &EntityId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<PlaylistRecord>> {
        self.conn()
            .execute(
                r#"
                UPDATE playlists SET
                    name = COALESCE(?2, name),
                    description = COALESCE(?3, description),
                    updated_at = ?4
                WHERE id = ?1
                "#,
                params![
                    id.as_str(),
                    name.map(str::trim),
                    description.map(str::trim),
                    timestamp_text(&now())
                ],
            )
            .await?;
        self.playlist_by_id(id).await
    }

    /// Deletes the playlist and its video references together.
    pub async fn delete_playlist(&self, id: &EntityId) -> Result<bool> {
        let conn = self.transaction_connection().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "DELETE FROM playlist_videos WHERE playlist_id = ?1",
            params![id.as_str()],
        )
        .await?;
        let removed = tx
            .execute("DELETE FROM playlists WHERE id = ?1", params![id.as_str()])
            .await?;
        tx.commit().await.context("committing playlist delete")?;
        Ok(removed > 0)
    }

    /// Appends a video; returns `false` when it was already present.
    pub async fn add_video_to_playlist(
        &self,
        playlist: &EntityId,
        video: &EntityId,
    ) -> Result<bool> {
        let stamp = timestamp_text(&now());
        let added = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO playlist_videos (playlist_id, video_id, added_at) VALUES (?1, ?2, ?3)",
                params![playlist.as_str(), video.as_str(), stamp.as_str()],
            )
            .await?;
        if added > 0 {
            self.touch_playlist(playlist, &stamp).await?;
        }
        Ok(added > 0)
    }

    pub async fn remove_video_from_playlist(
        &self,
        playlist: &EntityId,
        video: &EntityId,
    ) -> Result<bool> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM playlist_videos WHERE playlist_id = ?1 AND video_id = ?2",
                params![playlist.as_str(), video.as_str()],
            )
            .await?;
        if removed > 0 {
            self.touch_playlist(playlist, &timestamp_text(&now())).await?;
        }
        Ok(removed > 0)
    }

    async fn touch_playlist(&self, playlist: &EntityId, stamp: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE playlists SET updated_at = ?2 WHERE id = ?1",
                params![playlist.as_str(), stamp],
            )
            .await?;
        Ok(())
    }

    /// Video references of one playlist in insertion order.
    pub async fn playlist_video_ids(&self, playlist: &EntityId) -> Result<Vec<EntityId>> {
        Ok(self
            .playlist_video_ids_for(std::slice::from_ref(playlist))
            .await?
            .remove(playlist)
            .unwrap_or_default())
    }

    pub async fn playlist_video_ids_for(
        &self,
        playlists: &[EntityId],
    ) -> Result<HashMap<EntityId, Vec<EntityId>>> {
        let playlists = unique_ids(playlists);
        if playlists.is_empty() {
            return Ok(HashMap::new());
        }
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT playlist_id, video_id FROM playlist_videos WHERE playlist_id IN ({}) ORDER BY rowid",
                    placeholders(playlists.len())
                ),
                Params::Positional(id_values(&playlists)),
            )
            .await?;
        let mut pairs = Vec::new();
        while let Some(row) = rows.next().await? {
            pairs.push((
                EntityId::from_store(row.get(0)?),
                EntityId::from_store(row.get(1)?),
            ));
        }
        Ok(group_by_key(pairs))
    }
}

fn row_to_playlist(row: &Row) -> Result<PlaylistRecord> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(PlaylistRecord {
        id: EntityId::from_store(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        owner: EntityId::from_store(row.get(3)?),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
