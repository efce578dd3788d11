//! Video listing, publishing, editing and deletion.

use anyhow::anyhow;
use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{MultipartForm, parse_id, parse_page, require_fields};
use crate::api::{ApiError, ApiResponse, ApiResult, AppState};
use crate::assets::AssetKind;
use crate::auth::{CurrentUser, Viewer};
use crate::cascade::{self, DeleteReport};
use crate::id::EntityId;
use crate::pipeline::{SearchTerms, Sort, VideoFilter, VideoPipeline};
use crate::store::users::UserRecord;
use crate::store::videos::VideoRecord;
use crate::uploads::{PublishOutcome, PublishRequest, publish_video};
use crate::views::{self, VideoDetail, VideoList};

pub(crate) fn routes(max_upload: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(list_videos)
                .post(publish)
                .layer(DefaultBodyLimit::max(max_upload)),
        )
        .route(
            "/{video_id}",
            get(get_video)
                .patch(update_video)
                .delete(delete_video)
                .layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/{video_id}/publish", patch(toggle_publish))
        .route("/{video_id}/view", patch(record_view))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub query: Option<String>,
    pub sort_by: Option<String>,
    pub sort_type: Option<String>,
    pub user_id: Option<String>,
}

pub async fn list_videos(
    State(state): State<AppState>,
    viewer: Viewer,
    Query(params): Query<VideoListQuery>,
) -> ApiResult<ApiResponse<VideoList>> {
    let page = parse_page(params.page.as_deref(), params.limit.as_deref())?;
    let sort = Sort::from_query(params.sort_by.as_deref(), params.sort_type.as_deref())?;
    let mut pipeline = VideoPipeline::new().sort(sort).page(page);
    if let Some(query) = params.query.as_deref() {
        pipeline = pipeline.search(SearchTerms::parse(query));
    }
    if let Some(user_id) = params.user_id.as_deref().filter(|value| !value.trim().is_empty()) {
        pipeline = pipeline.filter(VideoFilter::Owner(parse_id(user_id, "user")?));
    }

    let list = views::list_videos(&state.store, pipeline, viewer.id()).await?;
    Ok(ApiResponse::ok(list, "videos fetched successfully"))
}

pub async fn publish(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let mut form = MultipartForm::read(multipart).await?;
    let [title, description] = require_fields([
        ("title", form.text("title")),
        ("description", form.text("description")),
    ])?;
    let (title, description) = (title.to_string(), description.to_string());
    let request = PublishRequest {
        owner: user.id.clone(),
        title,
        description,
        video: form.require_file("videoFile")?,
        thumbnail: form.require_file("thumbnail")?,
    };

    // Dropping this handler (client went away) drops the guard and cancels
    // the task, which then undoes whatever it already stored.
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let task = tokio::spawn({
        let state = state.clone();
        async move { publish_video(&state.store, &state.assets, request, &cancel).await }
    });
    let outcome = task
        .await
        .map_err(|err| anyhow!("publish task failed: {err}"))??;
    guard.disarm();

    match outcome {
        PublishOutcome::Published(video) => {
            Ok(ApiResponse::created(video, "video published successfully"))
        }
        PublishOutcome::Cancelled => Err(ApiError::bad_request("upload was cancelled")),
    }
}

pub async fn get_video(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<VideoDetail>> {
    let video_id = parse_id(&video_id, "video")?;
    let detail = views::video_detail(&state.store, &video_id, viewer.id())
        .await?
        .ok_or_else(|| ApiError::not_found("video does not exist"))?;
    Ok(ApiResponse::ok(detail, "video fetched successfully"))
}

/// Loads a video and checks that `user` owns it.
async fn owned_video(state: &AppState, user: &UserRecord, raw_id: &str) -> ApiResult<VideoRecord> {
    let video_id = parse_id(raw_id, "video")?;
    let video = state
        .store
        .video_by_id(&video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("video does not exist"))?;
    if video.owner != user.id {
        return Err(ApiError::forbidden("only the owner can change this video"));
    }
    Ok(video)
}

pub async fn update_video(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(video_id): Path<String>,
    multipart: Multipart,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let video = owned_video(&state, &user, &video_id).await?;
    let mut form = MultipartForm::read(multipart).await?;
    let title = form.text("title").map(str::trim).filter(|value| !value.is_empty()).map(str::to_string);
    let description = form
        .text("description")
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    let thumbnail = form.take_file("thumbnail");
    if title.is_none() && description.is_none() && thumbnail.is_none() {
        return Err(ApiError::bad_request("title, description or thumbnail is required"));
    }

    let stored = match &thumbnail {
        Some(file) => Some(state.assets.upload(AssetKind::Image, file).await?),
        None => None,
    };
    let updated = state
        .store
        .update_video_details(
            &video.id,
            title.as_deref(),
            description.as_deref(),
            stored.as_ref().map(|stored| stored.url.as_str()),
        )
        .await?
        .ok_or_else(|| ApiError::not_found("video does not exist"))?;

    if stored.is_some()
        && let Err(err) = state.assets.delete_by_url(&video.thumbnail).await
    {
        warn!(video = %video.id, error = %err, "could not remove replaced thumbnail");
    }
    info!(video = %video.id, "video details updated");
    Ok(ApiResponse::ok(updated, "video updated successfully"))
}

pub async fn delete_video(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<DeleteReport>> {
    let video = owned_video(&state, &user, &video_id).await?;
    let report = cascade::delete_video(&state.store, &state.assets, &video)
        .await?
        .ok_or_else(|| ApiError::not_found("video does not exist"))?;
    Ok(ApiResponse::ok(report, "video deleted successfully"))
}

pub async fn toggle_publish(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let video = owned_video(&state, &user, &video_id).await?;
    let toggled = state
        .store
        .toggle_published(&video.id)
        .await?
        .ok_or_else(|| ApiError::not_found("video does not exist"))?;
    let message = if toggled.is_published {
        "video published"
    } else {
        "video unpublished"
    };
    Ok(ApiResponse::ok(toggled, message))
}

/// Counts a view and adds the video to the caller's watch history.
pub async fn record_view(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<VideoRecord>> {
    let video_id: EntityId = parse_id(&video_id, "video")?;
    let video = state
        .store
        .increment_views(&video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("video does not exist"))?;
    state.store.record_watch(&user.id, &video.id).await?;
    Ok(ApiResponse::with_status(StatusCode::OK, video, "view recorded"))
}
