//! Channel owner dashboard.

use axum::{Router, extract::State, routing::get};

use crate::api::{ApiResponse, ApiResult, AppState};
use crate::auth::CurrentUser;
use crate::views::{self, ChannelStatsView, DashboardVideo};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(channel_stats))
        .route("/videos", get(channel_videos))
}

pub async fn channel_stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<ApiResponse<ChannelStatsView>> {
    let stats = views::channel_stats(&state.store, &user).await?;
    Ok(ApiResponse::ok(stats, "channel stats fetched successfully"))
}

pub async fn channel_videos(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<ApiResponse<Vec<DashboardVideo>>> {
    let videos = views::channel_videos(&state.store, &user.id).await?;
    Ok(ApiResponse::ok(videos, "channel videos fetched successfully"))
}
