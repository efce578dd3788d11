use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, patch, post},
};
use serde::Deserialize;

use super::{Deleted, parse_id};
use crate::api::{ApiError, ApiResponse, ApiResult, AppState};
use crate::auth::{CurrentUser, Viewer};
use crate::cascade;
use crate::store::tweets::TweetRecord;
use crate::store::users::UserRecord;
use crate::views::{self, TweetView};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_tweet))
        .route("/users/{user_id}", get(user_tweets))
        .route("/{tweet_id}", patch(update_tweet).delete(delete_tweet))
}

#[derive(Debug, Deserialize)]
pub struct TweetBody {
    pub content: String,
}

impl TweetBody {
    fn content(&self) -> ApiResult<&str> {
        let content = self.content.trim();
        if content.is_empty() {
            return Err(ApiError::bad_request("tweet content is required"));
        }
        Ok(content)
    }
}

async fn render(state: &AppState, tweet: TweetRecord, user: &UserRecord) -> ApiResult<TweetView> {
    views::tweet_view(&state.store, tweet, Some(&user.id))
        .await?
        .ok_or_else(|| ApiError::not_found("tweet owner does not exist"))
}

pub async fn create_tweet(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<TweetBody>,
) -> ApiResult<ApiResponse<TweetView>> {
    let tweet = state.store.insert_tweet(&user.id, body.content()?).await?;
    let view = render(&state, tweet, &user).await?;
    Ok(ApiResponse::created(view, "tweet created successfully"))
}

pub async fn user_tweets(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(user_id): Path<String>,
) -> ApiResult<ApiResponse<Vec<TweetView>>> {
    let user_id = parse_id(&user_id, "user")?;
    let tweets = views::user_tweets(&state.store, &user_id, viewer.id()).await?;
    Ok(ApiResponse::ok(tweets, "tweets fetched successfully"))
}

async fn owned_tweet(state: &AppState, user: &UserRecord, raw_id: &str) -> ApiResult<TweetRecord> {
    let tweet_id = parse_id(raw_id, "tweet")?;
    let tweet = state
        .store
        .tweet_by_id(&tweet_id)
        .await?
        .ok_or_else(|| ApiError::not_found("tweet does not exist"))?;
    if tweet.owner != user.id {
        return Err(ApiError::forbidden("only the author can change this tweet"));
    }
    Ok(tweet)
}

pub async fn update_tweet(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(tweet_id): Path<String>,
    Json(body): Json<TweetBody>,
) -> ApiResult<ApiResponse<TweetView>> {
    let content = body.content()?;
    let tweet = owned_tweet(&state, &user, &tweet_id).await?;
    let updated = state
        .store
        .update_tweet_content(&tweet.id, content)
        .await?
        .ok_or_else(|| ApiError::not_found("tweet does not exist"))?;
    let view = render(&state, updated, &user).await?;
    Ok(ApiResponse::ok(view, "tweet updated successfully"))
}

pub async fn delete_tweet(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(tweet_id): Path<String>,
) -> ApiResult<ApiResponse<Deleted>> {
    let tweet = owned_tweet(&state, &user, &tweet_id).await?;
    if !cascade::delete_tweet(&state.store, &tweet.id).await? {
        return Err(ApiError::not_found("tweet does not exist"));
    }
    Ok(ApiResponse::ok(Deleted { id: tweet.id }, "tweet deleted successfully"))
}
