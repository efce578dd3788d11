//! Deleting parents together with their dependents.
//!
//! Row deletions happen in one store transaction. Media files are removed
//! afterwards; a file that cannot be removed is logged and counted, never
//! turned into a failed request, because the rows are already gone.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::assets::LocalAssetHost;
use crate::id::EntityId;
use crate::store::Store;
use crate::store::videos::VideoRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub assets_removed: usize,
    pub assets_failed: usize,
}

/// Deletes a video the caller has already been authorized for.
/// Returns `None` when the row vanished before the transaction ran.
pub async fn delete_video(
    store: &Store,
    assets: &LocalAssetHost,
    video: &VideoRecord,
) -> Result<Option<DeleteReport>> {
    if !store.delete_video_with_dependents(&video.id).await? {
        return Ok(None);
    }

    let mut report = DeleteReport {
        id: video.id.clone(),
        assets_removed: 0,
        assets_failed: 0,
    };
    for url in [&video.video_file, &video.thumbnail] {
        match assets.delete_by_url(url).await {
            Ok(_) => report.assets_removed += 1,
            Err(err) => {
                report.assets_failed += 1;
                warn!(video = %video.id, url = %url, error = %err, "could not remove video asset");
            }
        }
    }
    info!(video = %video.id, removed = report.assets_removed, "video deleted");
    Ok(Some(report))
}

pub async fn delete_comment(store: &Store, comment: &EntityId) -> Result<bool> {
    let removed = store.delete_comment_with_likes(comment).await?;
    if removed {
        info!(comment = %comment, "comment deleted");
    }
    Ok(removed)
}

pub async fn delete_tweet(store: &Store, tweet: &EntityId) -> Result<bool> {
    let removed = store.delete_tweet_with_likes(tweet).await?;
    if removed {
        info!(tweet = %tweet, "tweet deleted");
    }
    Ok(removed)
}

pub async fn delete_playlist(store: &Store, playlist: &EntityId) -> Result<bool> {
    let removed = store.delete_playlist(playlist).await?;
    if removed {
        info!(playlist = %playlist, "playlist deleted");
    }
    Ok(removed)
}
