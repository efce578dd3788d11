//! Caller identity for handlers and the session cookies.
//!
//! The access token is read from the `accessToken` cookie first and from an
//! `Authorization: Bearer` header second. [`CurrentUser`] rejects requests
//! without a valid token; [`Viewer`] lets anonymous requests through but still
//! rejects a token that is present and invalid.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, HeaderValue, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use crate::api::{ApiError, ApiResponse, AppState};
use crate::id::EntityId;
use crate::session::{SessionError, SessionManager, TokenPair};
use crate::store::users::UserRecord;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

/// An authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRecord);

/// A possibly anonymous caller.
#[derive(Debug, Clone, Default)]
pub struct Viewer(pub Option<UserRecord>);

impl Viewer {
    pub fn id(&self) -> Option<&EntityId> {
        self.0.as_ref().map(|user| &user.id)
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = access_token(&parts.headers).ok_or(SessionError::MissingToken)?;
        Ok(Self(resolve(&state.sessions, &token).await?))
    }
}

impl FromRequestParts<AppState> for Viewer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match access_token(&parts.headers) {
            Some(token) => Ok(Self(Some(resolve(&state.sessions, &token).await?))),
            None => Ok(Self(None)),
        }
    }
}

async fn resolve(sessions: &SessionManager, token: &str) -> Result<UserRecord, SessionError> {
    sessions.authenticate(token).await
}

pub fn access_token(headers: &HeaderMap) -> Option<String> {
    cookie_value(headers, ACCESS_COOKIE).or_else(|| bearer_token(headers).map(str::to_string))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Reads one cookie out of every `Cookie` header on the request.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

fn cookie(name: &str, value: &str, max_age: i64, secure: bool) -> Option<HeaderValue> {
    let mut raw = format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        raw.push_str("; Secure");
    }
    match HeaderValue::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(cookie = name, error = %err, "dropping unencodable cookie");
            None
        }
    }
}

/// `Set-Cookie` values for a freshly issued pair.
pub fn session_cookies(state: &AppState, tokens: &TokenPair) -> Vec<HeaderValue> {
    [
        cookie(
            ACCESS_COOKIE,
            &tokens.access_token,
            state.sessions.access_ttl().num_seconds(),
            state.secure_cookies,
        ),
        cookie(
            REFRESH_COOKIE,
            &tokens.refresh_token,
            state.sessions.refresh_ttl().num_seconds(),
            state.secure_cookies,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Expires both session cookies.
pub fn cleared_cookies(state: &AppState) -> Vec<HeaderValue> {
    [ACCESS_COOKIE, REFRESH_COOKIE]
        .into_iter()
        .filter_map(|name| cookie(name, "", 0, state.secure_cookies))
        .collect()
}

/// An envelope plus `Set-Cookie` headers.
#[derive(Debug)]
pub struct WithCookies<T> {
    pub cookies: Vec<HeaderValue>,
    pub body: ApiResponse<T>,
}

impl<T: Serialize> IntoResponse for WithCookies<T> {
    fn into_response(self) -> Response {
        let mut response = self.body.into_response();
        for value in self.cookies {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        response
    }
}
