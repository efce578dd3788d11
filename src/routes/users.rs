//! Registration, sessions, account maintenance and channel pages.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::HeaderMap,
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{MultipartForm, require_fields};
use crate::api::{ApiError, ApiResponse, ApiResult, AppState};
use crate::assets::{AssetKind, LocalAssetHost};
use crate::auth::{
    CurrentUser, REFRESH_COOKIE, Viewer, WithCookies, cleared_cookies, cookie_value,
    session_cookies,
};
use crate::session::{SessionError, hash_blocking};
use crate::store::users::{AccountUpdate, NewUser, UserLookup, UserRecord};
use crate::views::{self, ChannelProfile, VideoSummary};

pub(crate) fn routes(max_upload: usize) -> Router<AppState> {
    Router::new()
        .route("/register", post(register).layer(DefaultBodyLimit::max(max_upload)))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_token))
        .route("/change-password", post(change_password))
        .route("/current-user", get(current_user))
        .route("/update-account", patch(update_account))
        .route("/avatar", patch(update_avatar).layer(DefaultBodyLimit::max(max_upload)))
        .route("/cover-image", patch(update_cover_image).layer(DefaultBodyLimit::max(max_upload)))
        .route("/channel/{username}", get(channel_profile))
        .route("/history", get(watch_history))
}

pub async fn register(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<ApiResponse<UserRecord>> {
    let mut form = MultipartForm::read(multipart).await?;
    let [username, email, full_name, password] = require_fields([
        ("username", form.text("username")),
        ("email", form.text("email")),
        ("fullName", form.text("fullName")),
        ("password", form.text("password")),
    ])?;
    let (username, email, full_name, password) = (
        username.to_lowercase(),
        email.to_string(),
        full_name.to_string(),
        password.to_string(),
    );
    if !email.contains('@') {
        return Err(ApiError::bad_request("email address is not valid"));
    }

    let taken = state
        .store
        .user_by_login(UserLookup::Username(&username))
        .await?
        .is_some()
        || state
            .store
            .user_by_login(UserLookup::Email(&email))
            .await?
            .is_some();
    if taken {
        return Err(ApiError::conflict("user with email or username already exists"));
    }

    let avatar_file = form.require_file("avatar")?;
    let cover_file = form.take_file("coverImage");

    let avatar = state.assets.upload(AssetKind::Image, &avatar_file).await?;
    let cover = match cover_file {
        Some(file) => match state.assets.upload(AssetKind::Image, &file).await {
            Ok(stored) => Some(stored),
            Err(err) => {
                discard_asset(&state.assets, &avatar.url).await;
                return Err(err.into());
            }
        },
        None => None,
    };
    let uploaded: Vec<String> = std::iter::once(avatar.url.clone())
        .chain(cover.as_ref().map(|stored| stored.url.clone()))
        .collect();

    let created: anyhow::Result<Option<UserRecord>> = async {
        let password_hash = hash_blocking(password).await?;
        state
            .store
            .create_user(&NewUser {
                username,
                email,
                full_name,
                avatar: avatar.url.clone(),
                cover_image: cover.map(|stored| stored.url).unwrap_or_default(),
                password_hash,
            })
            .await
    }
    .await;

    match created {
        Ok(Some(user)) => {
            info!(user = %user.id, username = %user.username, "user registered");
            Ok(ApiResponse::created(user, "user registered successfully"))
        }
        Ok(None) => {
            for url in &uploaded {
                discard_asset(&state.assets, url).await;
            }
            Err(ApiError::conflict("user with email or username already exists"))
        }
        Err(err) => {
            for url in &uploaded {
                discard_asset(&state.assets, url).await;
            }
            Err(err.into())
        }
    }
}

async fn discard_asset(assets: &LocalAssetHost, url: &str) {
    if let Err(err) = assets.delete_by_url(url).await {
        warn!(url = %url, error = %err, "could not remove asset");
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub user: UserRecord,
    pub access_token: String,
    pub refresh_token: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<WithCookies<SessionPayload>> {
    let lookup = match (request.username.as_deref(), request.email.as_deref()) {
        (Some(username), _) if !username.trim().is_empty() => UserLookup::Username(username),
        (_, Some(email)) if !email.trim().is_empty() => UserLookup::Email(email),
        _ => return Err(ApiError::bad_request("username or email is required")),
    };
    let session = state.sessions.login(lookup, &request.password).await?;
    Ok(WithCookies {
        cookies: session_cookies(&state, &session.tokens),
        body: ApiResponse::ok(
            SessionPayload {
                user: session.user,
                access_token: session.tokens.access_token,
                refresh_token: session.tokens.refresh_token,
            },
            "user logged in successfully",
        ),
    })
}

#[derive(Debug, Default, Serialize)]
pub struct Empty {}

pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<WithCookies<Empty>> {
    state.sessions.logout(&user.id).await?;
    Ok(WithCookies {
        cookies: cleared_cookies(&state),
        body: ApiResponse::ok(Empty {}, "user logged out"),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub access_token: String,
    pub refresh_token: String,
}

/// The refresh token comes from the cookie or, failing that, a JSON body.
pub async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WithCookies<TokenPayload>> {
    let from_body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<RefreshRequest>(&body)
            .map_err(|err| ApiError::bad_request(format!("invalid request body: {err}")))?
            .refresh_token
    };
    let token = cookie_value(&headers, REFRESH_COOKIE)
        .or(from_body)
        .filter(|token| !token.trim().is_empty())
        .ok_or(SessionError::MissingToken)?;

    let session = state.sessions.refresh(&token).await?;
    Ok(WithCookies {
        cookies: session_cookies(&state, &session.tokens),
        body: ApiResponse::ok(
            TokenPayload {
                access_token: session.tokens.access_token,
                refresh_token: session.tokens.refresh_token,
            },
            "access token refreshed",
        ),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> ApiResult<ApiResponse<Empty>> {
    if request.new_password.trim().is_empty() {
        return Err(ApiError::bad_request("new password is required"));
    }
    state
        .sessions
        .change_password(&user, &request.old_password, &request.new_password)
        .await
        .map_err(|err| match err {
            SessionError::InvalidCredentials => ApiError::bad_request("invalid old password"),
            other => other.into(),
        })?;
    info!(user = %user.id, "password changed");
    Ok(ApiResponse::ok(Empty {}, "password changed successfully"))
}

pub async fn current_user(CurrentUser(user): CurrentUser) -> ApiResponse<UserRecord> {
    ApiResponse::ok(user, "current user fetched successfully")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
}

pub async fn update_account(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<UpdateAccountRequest>,
) -> ApiResult<ApiResponse<UserRecord>> {
    let full_name = request.full_name.as_deref().filter(|value| !value.trim().is_empty());
    let email = request.email.as_deref().filter(|value| !value.trim().is_empty());
    if full_name.is_none() && email.is_none() {
        return Err(ApiError::bad_request("fullName or email is required"));
    }
    if email.is_some_and(|email| !email.contains('@')) {
        return Err(ApiError::bad_request("email address is not valid"));
    }

    match state.store.update_account(&user.id, full_name, email).await? {
        AccountUpdate::Updated(user) => Ok(ApiResponse::ok(user, "account details updated")),
        AccountUpdate::EmailTaken => Err(ApiError::conflict("email is already in use")),
        AccountUpdate::Missing => Err(ApiError::not_found("user does not exist")),
    }
}

#[derive(Clone, Copy)]
enum ProfileImage {
    Avatar,
    Cover,
}

impl ProfileImage {
    fn field(self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::Cover => "coverImage",
        }
    }

    fn current(self, user: &UserRecord) -> &str {
        match self {
            Self::Avatar => &user.avatar,
            Self::Cover => &user.cover_image,
        }
    }
}

async fn replace_image(
    state: &AppState,
    user: &UserRecord,
    multipart: Multipart,
    image: ProfileImage,
) -> ApiResult<UserRecord> {
    let mut form = MultipartForm::read(multipart).await?;
    let file = form.require_file(image.field())?;
    let stored = state.assets.upload(AssetKind::Image, &file).await?;

    let updated = match image {
        ProfileImage::Avatar => state.store.set_avatar(&user.id, &stored.url).await,
        ProfileImage::Cover => state.store.set_cover_image(&user.id, &stored.url).await,
    };
    let updated = match updated {
        Ok(Some(updated)) => updated,
        Ok(None) => {
            discard_asset(&state.assets, &stored.url).await;
            return Err(ApiError::not_found("user does not exist"));
        }
        Err(err) => {
            discard_asset(&state.assets, &stored.url).await;
            return Err(err.into());
        }
    };

    let previous = image.current(user);
    if !previous.is_empty() {
        discard_asset(&state.assets, previous).await;
    }
    Ok(updated)
}

pub async fn update_avatar(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> ApiResult<ApiResponse<UserRecord>> {
    let updated = replace_image(&state, &user, multipart, ProfileImage::Avatar).await?;
    Ok(ApiResponse::ok(updated, "avatar updated successfully"))
}

pub async fn update_cover_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    multipart: Multipart,
) -> ApiResult<ApiResponse<UserRecord>> {
    let updated = replace_image(&state, &user, multipart, ProfileImage::Cover).await?;
    Ok(ApiResponse::ok(updated, "cover image updated successfully"))
}

pub async fn channel_profile(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(username): Path<String>,
) -> ApiResult<ApiResponse<ChannelProfile>> {
    if username.trim().is_empty() {
        return Err(ApiError::bad_request("username is missing"));
    }
    let profile = views::channel_profile(&state.store, &username, viewer.id())
        .await?
        .ok_or_else(|| ApiError::not_found("channel does not exist"))?;
    Ok(ApiResponse::ok(profile, "user channel fetched successfully"))
}

pub async fn watch_history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<ApiResponse<Vec<VideoSummary>>> {
    let history = views::watch_history(&state.store, &user.id).await?;
    Ok(ApiResponse::ok(history, "watch history fetched successfully"))
}
