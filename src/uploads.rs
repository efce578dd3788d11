//! Video publishing with undo.
//!
//! Publishing is three side effects in a row: store the media file, store the
//! thumbnail, insert the row. Each completed effect pushes its inverse onto a
//! [`CompensationLog`]. When the caller's [`CancellationToken`] fires (the
//! client went away) or a later step fails, the log is replayed newest first.

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assets::{AssetError, AssetKind, LocalAssetHost, UploadedFile};
use crate::id::EntityId;
use crate::store::Store;
use crate::store::videos::{NewVideo, VideoRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    DeleteAsset(String),
    DeleteVideoRow(EntityId),
}

#[derive(Debug, Default)]
pub struct CompensationLog {
    steps: Vec<Compensation>,
}

impl CompensationLog {
    pub fn record(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every recorded undo in reverse. Failures are logged and skipped;
    /// returns how many steps succeeded.
    pub async fn unwind(self, store: &Store, assets: &LocalAssetHost) -> usize {
        let mut undone = 0;
        for step in self.steps.into_iter().rev() {
            let result = match &step {
                Compensation::DeleteAsset(url) => {
                    assets.delete_by_url(url).await.map(|_| ()).map_err(anyhow::Error::from)
                }
                Compensation::DeleteVideoRow(id) => store.delete_video_row(id).await.map(|_| ()),
            };
            match result {
                Ok(()) => undone += 1,
                Err(err) => warn!(?step, error = %err, "compensation step failed"),
            }
        }
        undone
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub owner: EntityId,
    pub title: String,
    pub description: String,
    pub video: UploadedFile,
    pub thumbnail: UploadedFile,
}

#[derive(Debug)]
pub enum PublishOutcome {
    Published(VideoRecord),
    Cancelled,
}

/// Points at which the token is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStep {
    VideoUploaded,
    ThumbnailUploaded,
    RowInserted,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub async fn publish_video(
    store: &Store,
    assets: &LocalAssetHost,
    request: PublishRequest,
    cancel: &CancellationToken,
) -> Result<PublishOutcome, PublishError> {
    publish_with_checkpoints(store, assets, request, cancel, |_| {}).await
}

pub(crate) async fn publish_with_checkpoints(
    store: &Store,
    assets: &LocalAssetHost,
    request: PublishRequest,
    cancel: &CancellationToken,
    mut checkpoint: impl FnMut(PublishStep),
) -> Result<PublishOutcome, PublishError> {
    let mut log = CompensationLog::default();
    if cancel.is_cancelled() {
        return Ok(PublishOutcome::Cancelled);
    }

    let video_file = assets.upload(AssetKind::Video, &request.video).await?;
    log.record(Compensation::DeleteAsset(video_file.url.clone()));
    checkpoint(PublishStep::VideoUploaded);
    if cancel.is_cancelled() {
        return Ok(abandon(log, store, assets, PublishStep::VideoUploaded).await);
    }

    let thumbnail = match assets.upload(AssetKind::Image, &request.thumbnail).await {
        Ok(stored) => stored,
        Err(err) => {
            log.unwind(store, assets).await;
            return Err(err.into());
        }
    };
    log.record(Compensation::DeleteAsset(thumbnail.url.clone()));
    checkpoint(PublishStep::ThumbnailUploaded);
    if cancel.is_cancelled() {
        return Ok(abandon(log, store, assets, PublishStep::ThumbnailUploaded).await);
    }

    let new_video = NewVideo {
        id: EntityId::generate(),
        video_file: video_file.url,
        thumbnail: thumbnail.url,
        title: request.title,
        description: request.description,
        duration: video_file.duration.unwrap_or(0.0),
        owner: request.owner,
    };
    log.record(Compensation::DeleteVideoRow(new_video.id.clone()));
    let video = match store.insert_video(&new_video).await {
        Ok(video) => video,
        Err(err) => {
            log.unwind(store, assets).await;
            return Err(err.into());
        }
    };
    checkpoint(PublishStep::RowInserted);
    if cancel.is_cancelled() {
        return Ok(abandon(log, store, assets, PublishStep::RowInserted).await);
    }

    info!(video = %video.id, owner = %video.owner, "video published");
    Ok(PublishOutcome::Published(video))
}

async fn abandon(
    log: CompensationLog,
    store: &Store,
    assets: &LocalAssetHost,
    step: PublishStep,
) -> PublishOutcome {
    let recorded = log.len();
    let undone = log.unwind(store, assets).await;
    info!(?step, recorded, undone, "publish cancelled by client, side effects undone");
    PublishOutcome::Cancelled
}
