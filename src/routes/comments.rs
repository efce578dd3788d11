use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::Deserialize;

use super::{Deleted, PageQuery, parse_id};
use crate::api::{ApiError, ApiResponse, ApiResult, AppState};
use crate::auth::{CurrentUser, Viewer};
use crate::cascade;
use crate::id::EntityId;
use crate::store::comments::CommentRecord;
use crate::store::users::UserRecord;
use crate::views::{self, CommentList, CommentView};

pub(crate) fn routes() -> Router<AppState> {
    // GET/POST read `{id}` as a video, PATCH/DELETE as a comment.
    Router::new().route(
        "/{id}",
        get(list_comments)
            .post(add_comment)
            .patch(update_comment)
            .delete(delete_comment),
    )
}

#[derive(Debug, Deserialize)]
pub struct CommentBody {
    pub content: String,
}

fn content(body: &CommentBody) -> ApiResult<&str> {
    let content = body.content.trim();
    if content.is_empty() {
        return Err(ApiError::bad_request("comment content is required"));
    }
    Ok(content)
}

pub async fn list_comments(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(video_id): Path<String>,
    Query(paging): Query<PageQuery>,
) -> ApiResult<ApiResponse<CommentList>> {
    let video_id = parse_id(&video_id, "video")?;
    let page = paging.resolve()?;
    let comments = views::video_comments(&state.store, &video_id, page, viewer.id())
        .await?
        .ok_or_else(|| ApiError::not_found("video does not exist"))?;
    Ok(ApiResponse::ok(comments, "comments fetched successfully"))
}

pub async fn add_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(video_id): Path<String>,
    Json(body): Json<CommentBody>,
) -> ApiResult<ApiResponse<CommentView>> {
    let video_id = parse_id(&video_id, "video")?;
    let content = content(&body)?;
    if state.store.video_by_id(&video_id).await?.is_none() {
        return Err(ApiError::not_found("video does not exist"));
    }
    let comment = state.store.insert_comment(&video_id, &user.id, content).await?;
    let view = views::comment_view(&state.store, comment, Some(&user.id))
        .await?
        .ok_or_else(|| ApiError::not_found("comment owner does not exist"))?;
    Ok(ApiResponse::created(view, "comment added successfully"))
}

async fn owned_comment(state: &AppState, user: &UserRecord, raw_id: &str) -> ApiResult<CommentRecord> {
    let comment_id: EntityId = parse_id(raw_id, "comment")?;
    let comment = state
        .store
        .comment_by_id(&comment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("comment does not exist"))?;
    if comment.owner != user.id {
        return Err(ApiError::forbidden("only the author can change this comment"));
    }
    Ok(comment)
}

pub async fn update_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(comment_id): Path<String>,
    Json(body): Json<CommentBody>,
) -> ApiResult<ApiResponse<CommentView>> {
    let content = content(&body)?;
    let comment = owned_comment(&state, &user, &comment_id).await?;
    let updated = state
        .store
        .update_comment_content(&comment.id, content)
        .await?
        .ok_or_else(|| ApiError::not_found("comment does not exist"))?;
    let view = views::comment_view(&state.store, updated, Some(&user.id))
        .await?
        .ok_or_else(|| ApiError::not_found("comment owner does not exist"))?;
    Ok(ApiResponse::ok(view, "comment updated successfully"))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(comment_id): Path<String>,
) -> ApiResult<ApiResponse<Deleted>> {
    let comment = owned_comment(&state, &user, &comment_id).await?;
    if !cascade::delete_comment(&state.store, &comment.id).await? {
        return Err(ApiError::not_found("comment does not exist"));
    }
    Ok(ApiResponse::ok(Deleted { id: comment.id }, "comment deleted successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{TestApp, json};
    use crate::store::likes::TargetKind;
    use crate::store::videos::fixtures::seed_video;
    use anyhow::Result;
    use axum::http::StatusCode;

    fn body(text: &str) -> Json<CommentBody> {
        Json(CommentBody {
            content: text.into(),
        })
    }

    #[tokio::test]
    async fn comment_lifecycle() -> Result<()> {
        let app = TestApp::new().await?;
        let (creator, _) = app.user("creator").await?;
        let (fan, _) = app.user("fan").await?;
        let video = seed_video(app.store(), &creator.id, "talk").await?;

        let added = add_comment(
            State(app.state.clone()),
            CurrentUser(fan.clone()),
            Path(video.id.to_string()),
            body("  nice one  "),
        )
        .await
        .map_err(|err| anyhow::anyhow!(err.message().to_string()))?;
        assert_eq!(added.data.content, "nice one");
        assert!(added.data.is_owner);
        let comment_id = added.data.id.clone();

        app.store()
            .toggle_reaction(&creator.id, TargetKind::Comment, &comment_id, true)
            .await?;
        let listed = list_comments(
            State(app.state.clone()),
            Viewer(Some(creator.clone())),
            Path(video.id.to_string()),
            Query(PageQuery::default()),
        )
        .await
        .map_err(|err| anyhow::anyhow!(err.message().to_string()))?;
        let listed = json(&listed);
        assert_eq!(listed["totalDocs"], 1);
        assert_eq!(listed["comments"][0]["isLikedByVideoOwner"], true);
        assert_eq!(listed["comments"][0]["isOwner"], false);
        assert_eq!(listed["comments"][0]["isLiked"], true);

        let err = update_comment(
            State(app.state.clone()),
            CurrentUser(creator.clone()),
            Path(comment_id.to_string()),
            body("hijack"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let deleted = delete_comment(
            State(app.state.clone()),
            CurrentUser(fan),
            Path(comment_id.to_string()),
        )
        .await
        .map_err(|err| anyhow::anyhow!(err.message().to_string()))?;
        assert_eq!(deleted.data.id, comment_id);
        assert!(
            app.store()
                .likes_for(TargetKind::Comment, std::slice::from_ref(&comment_id))
                .await?
                .is_empty()
        );
        Ok(())
    }

    #[tokio::test]
    async fn rejects_bad_input() -> Result<()> {
        let app = TestApp::new().await?;
        let (user, _) = app.user("user").await?;

        let err = add_comment(
            State(app.state.clone()),
            CurrentUser(user.clone()),
            Path("bogus".into()),
            body("hi"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = add_comment(
            State(app.state.clone()),
            CurrentUser(user.clone()),
            Path(EntityId::generate().to_string()),
            body("hi"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = list_comments(
            State(app.state.clone()),
            Viewer(None),
            Path(EntityId::generate().to_string()),
            Query(PageQuery {
                page: Some("0".into()),
                limit: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
