//! Like/dislike toggles and the caller's liked videos.

use axum::{
    Router,
    extract::{Path, Query, State},
    routing::{get, patch},
};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::api::{ApiError, ApiResponse, ApiResult, AppState};
use crate::auth::CurrentUser;
use crate::id::EntityId;
use crate::personalization::derive;
use crate::store::likes::{ReactionState, TargetKind};
use crate::views::{self, ReactionSummary, VideoSummary};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/video/{id}", patch(toggle_video_like))
        .route("/comment/{id}", patch(toggle_comment_like))
        .route("/tweet/{id}", patch(toggle_tweet_like))
        .route("/videos", get(liked_videos))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReactionQuery {
    pub liked: Option<String>,
}

impl ReactionQuery {
    /// `liked` defaults to a like; `false`/`0` asks for a dislike.
    fn polarity(&self) -> ApiResult<bool> {
        match self.liked.as_deref().map(str::trim) {
            None | Some("") | Some("true") | Some("1") => Ok(true),
            Some("false") | Some("0") => Ok(false),
            Some(other) => Err(ApiError::bad_request(format!(
                "liked must be true or false, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionOutcome {
    pub target_kind: TargetKind,
    pub target_id: EntityId,
    pub state: ReactionState,
    #[serde(flatten)]
    pub reactions: ReactionSummary,
}

async fn toggle(
    state: &AppState,
    user: &EntityId,
    kind: TargetKind,
    raw_id: &str,
    query: &ReactionQuery,
) -> ApiResult<ApiResponse<ReactionOutcome>> {
    let target = parse_id(raw_id, kind.as_str())?;
    let liked = query.polarity()?;
    let exists = match kind {
        TargetKind::Video => state.store.video_by_id(&target).await?.is_some(),
        TargetKind::Comment => state.store.comment_by_id(&target).await?.is_some(),
        TargetKind::Tweet => state.store.tweet_by_id(&target).await?.is_some(),
    };
    if !exists {
        return Err(ApiError::not_found(format!("{kind} does not exist")));
    }

    let reaction = state.store.toggle_reaction(user, kind, &target, liked).await?;
    let likes = state
        .store
        .likes_for(kind, std::slice::from_ref(&target))
        .await?;
    let reactions = likes
        .get(&target)
        .map(|records| derive(records, Some(user)))
        .unwrap_or_default();

    let message = match reaction {
        ReactionState::Liked => format!("{kind} liked"),
        ReactionState::Disliked => format!("{kind} disliked"),
        ReactionState::Cleared => format!("{kind} reaction removed"),
    };
    Ok(ApiResponse::ok(
        ReactionOutcome {
            target_kind: kind,
            target_id: target,
            state: reaction,
            reactions: reactions.into(),
        },
        message,
    ))
}

pub async fn toggle_video_like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<ReactionQuery>,
) -> ApiResult<ApiResponse<ReactionOutcome>> {
    toggle(&state, &user.id, TargetKind::Video, &id, &query).await
}

pub async fn toggle_comment_like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<ReactionQuery>,
) -> ApiResult<ApiResponse<ReactionOutcome>> {
    toggle(&state, &user.id, TargetKind::Comment, &id, &query).await
}

pub async fn toggle_tweet_like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<ReactionQuery>,
) -> ApiResult<ApiResponse<ReactionOutcome>> {
    toggle(&state, &user.id, TargetKind::Tweet, &id, &query).await
}

pub async fn liked_videos(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<ApiResponse<Vec<VideoSummary>>> {
    let videos = views::liked_videos(&state.store, &user.id).await?;
    Ok(ApiResponse::ok(videos, "liked videos fetched successfully"))
}
