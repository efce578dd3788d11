//! HTTP surface mounted under `/api/v1`.
//!
//! Handlers stay thin: parse ids and bodies, check ownership, call the store
//! or a view assembler and wrap the result in an [`ApiResponse`].

use std::collections::HashMap;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, multipart::MultipartError},
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::api::{ApiError, ApiResponse, ApiResult, AppState};
use crate::assets::UploadedFile;
use crate::id::EntityId;
use crate::pipeline::{Page, PipelineError};

pub mod assets;
pub mod comments;
pub mod dashboard;
pub mod likes;
pub mod playlists;
pub mod subscriptions;
pub mod tweets;
pub mod users;
pub mod videos;

pub const API_PREFIX: &str = "/api/v1";
/// Limit for every non-upload body.
pub const JSON_BODY_LIMIT: usize = 16 * 1024;

pub fn router(state: AppState) -> Router {
    let max_upload = state.max_upload_bytes;
    let api = Router::new()
        .route("/healthcheck", get(healthcheck))
        .nest("/users", users::routes(max_upload))
        .nest("/videos", videos::routes(max_upload))
        .nest("/comments", comments::routes())
        .nest("/likes", likes::routes())
        .nest("/subscriptions", subscriptions::routes())
        .nest("/tweets", tweets::routes())
        .nest("/playlists", playlists::routes())
        .nest("/dashboard", dashboard::routes())
        .nest("/assets", assets::routes());

    Router::new()
        .nest(API_PREFIX, api)
        .fallback(endpoint_not_found)
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

pub async fn healthcheck() -> ApiResponse<Health> {
    ApiResponse::ok(Health { status: "ok" }, "service is healthy")
}

/// Payload for deletions with nothing else to report.
#[derive(Debug, Serialize)]
pub struct Deleted {
    #[serde(rename = "_id")]
    pub id: EntityId,
}

async fn endpoint_not_found() -> ApiError {
    ApiError::not_found("endpoint not found")
}

/// Parses a path or query identifier, naming it in the error.
pub(crate) fn parse_id(raw: &str, what: &str) -> ApiResult<EntityId> {
    EntityId::parse(raw).map_err(|err| ApiError::bad_request(format!("invalid {what} id: {err}")))
}

/// `page` / `limit` query parameters, kept as text so bad numbers get the
/// failure envelope instead of the extractor's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl PageQuery {
    pub fn resolve(&self) -> ApiResult<Page> {
        parse_page(self.page.as_deref(), self.limit.as_deref())
    }
}

pub(crate) fn parse_page(page: Option<&str>, limit: Option<&str>) -> ApiResult<Page> {
    fn number(raw: Option<&str>, err: PipelineError) -> Result<Option<i64>, PipelineError> {
        match raw.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => value.parse().map(Some).map_err(|_| err),
            None => Ok(None),
        }
    }
    let page = number(page, PipelineError::InvalidPage)?;
    let limit = number(limit, PipelineError::InvalidLimit)?;
    Ok(Page::new(page, limit)?)
}

/// Trims and rejects blank text fields, collecting the names of the missing ones.
pub(crate) fn require_fields<'a, const N: usize>(
    fields: [(&'static str, Option<&'a str>); N],
) -> ApiResult<[&'a str; N]> {
    let missing: Vec<String> = fields
        .iter()
        .filter(|(_, value)| value.is_none_or(|value| value.trim().is_empty()))
        .map(|(name, _)| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::bad_request("all fields are required").with_errors(missing));
    }
    Ok(fields.map(|(_, value)| value.unwrap_or_default().trim()))
}

/// Text fields and files read out of a multipart body.
#[derive(Debug, Default)]
pub(crate) struct MultipartForm {
    fields: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
}

impl MultipartForm {
    pub(crate) async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(multipart_error)?;
                    form.files.insert(
                        name,
                        UploadedFile {
                            file_name,
                            content_type,
                            bytes,
                        },
                    );
                }
                None => {
                    let text = field.text().await.map_err(multipart_error)?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    pub(crate) fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub(crate) fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.remove(name).filter(|file| !file.bytes.is_empty())
    }

    pub(crate) fn require_file(&mut self, name: &str) -> ApiResult<UploadedFile> {
        self.take_file(name)
            .ok_or_else(|| ApiError::bad_request(format!("{name} file is required")))
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::new(err.status(), err.body_text())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::store::videos::fixtures::seed_video;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn health_and_unknown_routes() -> anyhow::Result<()> {
        let app = TestApp::new().await?;
        let _router = router(app.state.clone());

        let health = healthcheck().await;
        assert_eq!(health.status, StatusCode::OK);
        assert_eq!(json(&health)["status"], "ok");

        let missing = endpoint_not_found().await.into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn comment_and_subscription_paths_take_bare_ids() -> anyhow::Result<()> {
        let app = TestApp::new().await?;
        let (creator, _) = app.user("creator").await?;
        let (fan, tokens) = app.user("fan").await?;
        let token = Some(tokens.access_token.as_str());
        let video = seed_video(app.store(), &creator.id, "talk").await?;
        let comment = app.store().insert_comment(&video.id, &fan.id, "first").await?;

        let comments = format!("/api/v1/comments/{}", comment.id);
        let status = send(&app, "PATCH", &comments, token, Some(r#"{"content":"edited"}"#)).await?;
        assert_eq!(status, StatusCode::OK);
        let listed = format!("/api/v1/comments/{}", video.id);
        assert_eq!(send(&app, "GET", &listed, None, None).await?, StatusCode::OK);
        assert_eq!(send(&app, "DELETE", &comments, token, None).await?, StatusCode::OK);

        let channel = format!("/api/v1/subscriptions/{}", creator.id);
        assert_eq!(send(&app, "PATCH", &channel, token, None).await?, StatusCode::OK);
        assert_eq!(send(&app, "GET", &channel, None, None).await?, StatusCode::OK);
        let subscribers = app.store().subscribers_of(&creator.id).await?;
        assert_eq!(subscribers.len(), 1);

        let prefixed = format!("/api/v1/subscriptions/c/{}", creator.id);
        assert_eq!(send(&app, "GET", &prefixed, None, None).await?, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[test]
    fn required_fields_report_every_missing_name() {
        let err = require_fields([("title", Some("  ")), ("description", None), ("x", Some("ok"))])
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let [a, b] = require_fields([("a", Some(" one ")), ("b", Some("two"))]).unwrap();
        assert_eq!((a, b), ("one", "two"));
    }

    #[test]
    fn paging_parameters() {
        assert_eq!(parse_page(None, None).unwrap(), Page::default());
        assert_eq!(parse_page(Some("2"), Some(" 5 ")).unwrap().offset(), 5);
        assert_eq!(
            parse_page(Some("two"), None).unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
        assert!(parse_page(None, Some("1000")).is_err());
    }

    #[test]
    fn ids_are_validated_before_lookup() {
        assert_eq!(
            parse_id("not-an-id", "video").unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
        assert!(parse_id(EntityId::generate().as_str(), "video").is_ok());
    }
}
