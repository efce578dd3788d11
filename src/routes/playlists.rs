use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, patch, post},
};
use serde::Deserialize;
use tracing::info;

use super::{Deleted, parse_id};
use crate::api::{ApiError, ApiResponse, ApiResult, AppState};
use crate::auth::CurrentUser;
use crate::cascade;
use crate::store::playlists::PlaylistRecord;
use crate::store::users::UserRecord;
use crate::views::{self, PlaylistCard, PlaylistDetail, PlaylistMembership};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_playlist))
        .route("/users/{user_id}", get(user_playlists))
        .route("/user/playlists/{video_id}", get(playlists_for_video))
        .route(
            "/{playlist_id}",
            get(playlist_detail)
                .patch(update_playlist)
                .delete(delete_playlist),
        )
        .route("/add/{playlist_id}/{video_id}", patch(add_video))
        .route("/remove/{playlist_id}/{video_id}", patch(remove_video))
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaylistBody {
    pub name: Option<String>,
    pub description: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

async fn detail(state: &AppState, playlist: &PlaylistRecord) -> ApiResult<PlaylistDetail> {
    views::playlist_detail(&state.store, &playlist.id)
        .await?
        .ok_or_else(|| ApiError::not_found("playlist does not exist"))
}

pub async fn create_playlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<PlaylistBody>,
) -> ApiResult<ApiResponse<PlaylistDetail>> {
    let name = non_blank(&body.name).ok_or_else(|| {
        ApiError::bad_request("playlist name is required").with_errors(vec!["name".into()])
    })?;
    let description = body.description.as_deref().unwrap_or_default();
    let playlist = state.store.create_playlist(&user.id, name, description).await?;
    info!(playlist = %playlist.id, owner = %user.id, "playlist created");
    let view = detail(&state, &playlist).await?;
    Ok(ApiResponse::created(view, "playlist created successfully"))
}

pub async fn user_playlists(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<PlaylistCard>>> {
    let user_id = parse_id(&user_id, "user")?;
    let playlists = views::user_playlists(&state.store, &user_id).await?;
    Ok(ApiResponse::ok(playlists, "playlists fetched successfully"))
}

pub async fn playlists_for_video(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(video_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<PlaylistMembership>>> {
    let video_id = parse_id(&video_id, "video")?;
    let playlists = views::playlists_for_video(&state.store, &user.id, &video_id).await?;
    Ok(ApiResponse::ok(playlists, "playlists fetched successfully"))
}

pub async fn playlist_detail(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
) -> ApiResult<ApiResponse<PlaylistDetail>> {
    let playlist_id = parse_id(&playlist_id, "playlist")?;
    let playlist = views::playlist_detail(&state.store, &playlist_id)
        .await?
        .ok_or_else(|| ApiError::not_found("playlist does not exist"))?;
    Ok(ApiResponse::ok(playlist, "playlist fetched successfully"))
}

async fn owned_playlist(
    state: &AppState,
    user: &UserRecord,
    raw_id: &str,
) -> ApiResult<PlaylistRecord> {
    let playlist_id = parse_id(raw_id, "playlist")?;
    let playlist = state
        .store
        .playlist_by_id(&playlist_id)
        .await?
        .ok_or_else(|| ApiError::not_found("playlist does not exist"))?;
    if playlist.owner != user.id {
        return Err(ApiError::forbidden("only the owner can change this playlist"));
    }
    Ok(playlist)
}

pub async fn update_playlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(playlist_id): Path<String>,
    Json(body): Json<PlaylistBody>,
) -> ApiResult<ApiResponse<PlaylistDetail>> {
    let name = non_blank(&body.name);
    let description = body.description.as_deref();
    if name.is_none() && description.is_none() {
        return Err(ApiError::bad_request("name or description is required"));
    }
    let playlist = owned_playlist(&state, &user, &playlist_id).await?;
    let updated = state
        .store
        .update_playlist(&playlist.id, name, description)
        .await?
        .ok_or_else(|| ApiError::not_found("playlist does not exist"))?;
    let view = detail(&state, &updated).await?;
    Ok(ApiResponse::ok(view, "playlist updated successfully"))
}

pub async fn delete_playlist(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(playlist_id): Path<String>,
) -> ApiResult<ApiResponse<Deleted>> {
    let playlist = owned_playlist(&state, &user, &playlist_id).await?;
    if !cascade::delete_playlist(&state.store, &playlist.id).await? {
        return Err(ApiError::not_found("playlist does not exist"));
    }
    info!(playlist = %playlist.id, "playlist deleted");
    Ok(ApiResponse::ok(Deleted { id: playlist.id }, "playlist deleted successfully"))
}

pub async fn add_video(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((playlist_id, video_id)): Path<(String, String)>,
) -> ApiResult<ApiResponse<PlaylistDetail>> {
    let video_id = parse_id(&video_id, "video")?;
    let playlist = owned_playlist(&state, &user, &playlist_id).await?;
    if state.store.video_by_id(&video_id).await?.is_none() {
        return Err(ApiError::not_found("video does not exist"));
    }
    let added = state.store.add_video_to_playlist(&playlist.id, &video_id).await?;
    let view = detail(&state, &playlist).await?;
    let message = if added {
        "video added to playlist"
    } else {
        "video is already in the playlist"
    };
    Ok(ApiResponse::ok(view, message))
}

pub async fn remove_video(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((playlist_id, video_id)): Path<(String, String)>,
) -> ApiResult<ApiResponse<PlaylistDetail>> {
    let video_id = parse_id(&video_id, "video")?;
    let playlist = owned_playlist(&state, &user, &playlist_id).await?;
    if !state
        .store
        .remove_video_from_playlist(&playlist.id, &video_id)
        .await?
    {
        return Err(ApiError::not_found("video is not in the playlist"));
    }
    let view = detail(&state, &playlist).await?;
    Ok(ApiResponse::ok(view, "video removed from playlist"))
}
