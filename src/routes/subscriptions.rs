use axum::{
    Router,
    extract::{Path, State},
    routing::get,
};
use serde::Serialize;
use tracing::info;

use super::parse_id;
use crate::api::{ApiError, ApiResponse, ApiResult, AppState};
use crate::auth::CurrentUser;
use crate::id::EntityId;
use crate::views::{self, SubscribedChannelsView, SubscribersView};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/{channel_id}",
            get(channel_subscribers).patch(toggle_subscription),
        )
        .route("/users/{subscriber_id}", get(subscribed_channels))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionState {
    pub channel: EntityId,
    pub subscribed: bool,
}

pub async fn toggle_subscription(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(channel_id): Path<String>,
) -> ApiResult<ApiResponse<SubscriptionState>> {
    let channel = parse_id(&channel_id, "channel")?;
    if channel == user.id {
        return Err(ApiError::bad_request("you cannot subscribe to your own channel"));
    }
    if state.store.user_by_id(&channel).await?.is_none() {
        return Err(ApiError::not_found("channel does not exist"));
    }
    let subscribed = state.store.toggle_subscription(&user.id, &channel).await?;
    info!(subscriber = %user.id, channel = %channel, subscribed, "subscription toggled");
    let message = if subscribed {
        "subscribed successfully"
    } else {
        "unsubscribed successfully"
    };
    Ok(ApiResponse::ok(SubscriptionState { channel, subscribed }, message))
}

pub async fn channel_subscribers(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> ApiResult<ApiResponse<SubscribersView>> {
    let channel = parse_id(&channel_id, "channel")?;
    let subscribers = views::channel_subscribers(&state.store, &channel).await?;
    Ok(ApiResponse::ok(subscribers, "subscribers fetched successfully"))
}

pub async fn subscribed_channels(
    State(state): State<AppState>,
    Path(subscriber_id): Path<String>,
) -> ApiResult<ApiResponse<SubscribedChannelsView>> {
    let subscriber = parse_id(&subscriber_id, "subscriber")?;
    let channels = views::subscribed_channels(&state.store, &subscriber).await?;
    Ok(ApiResponse::ok(channels, "subscribed channels fetched successfully"))
}
