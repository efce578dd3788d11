//! Access/refresh token pairs.
//!
//! Access tokens are stateless and checked by signature and expiry only.
//! Refresh tokens are additionally pinned to the user row by digest, so each
//! successful refresh rotates the pair and invalidates the previous token.

use anyhow::Context;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::TokenConfig;
use crate::id::EntityId;
use crate::security::{digest_matches, hash_password, token_digest, verify_password};
use crate::store::Store;
use crate::store::users::{UserLookup, UserRecord};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("user does not exist")]
    UnknownUser,
    #[error("invalid user credentials")]
    InvalidCredentials,
    #[error("unauthorized request")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("refresh token is expired or already used")]
    StaleRefreshToken,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Outcome of a successful login or refresh.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: UserRecord,
    pub tokens: TokenPair,
}

struct Signer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl Signer {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

pub struct SessionManager {
    store: Store,
    access: Signer,
    refresh: Signer,
    validation: Validation,
}

impl SessionManager {
    pub fn new(store: Store, tokens: &TokenConfig) -> Self {
        Self {
            store,
            access: Signer::new(&tokens.access_secret, tokens.access_ttl),
            refresh: Signer::new(&tokens.refresh_secret, tokens.refresh_ttl),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access.ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh.ttl
    }

    pub async fn login(
        &self,
        lookup: UserLookup<'_>,
        password: &str,
    ) -> Result<Session, SessionError> {
        let user = self
            .store
            .user_by_login(lookup)
            .await?
            .ok_or(SessionError::UnknownUser)?;
        if !check_password(password, &user.password_hash).await? {
            debug!(user = %user.id, "rejected login with wrong password");
            return Err(SessionError::InvalidCredentials);
        }
        let tokens = self.issue(&user).await?;
        info!(user = %user.id, "user logged in");
        Ok(Session { user, tokens })
    }

    /// Exchanges the current refresh token for a new pair.
    pub async fn refresh(&self, token: &str) -> Result<Session, SessionError> {
        let claims = jsonwebtoken::decode::<RefreshClaims>(
            token,
            &self.refresh.decoding,
            &self.validation,
        )
        .map_err(|_| SessionError::InvalidToken)?
        .claims;
        let user_id = EntityId::parse(&claims.sub).map_err(|_| SessionError::InvalidToken)?;
        let user = self
            .store
            .user_by_id(&user_id)
            .await?
            .ok_or(SessionError::InvalidToken)?;

        let current = user.refresh_token_digest.as_deref().unwrap_or_default();
        if !digest_matches(token, current) {
            return Err(SessionError::StaleRefreshToken);
        }

        // The swap is conditional so two refreshes of one token cannot both win.
        let tokens = self.mint(&user)?;
        let rotated = self
            .store
            .rotate_refresh_digest(&user.id, current, &token_digest(&tokens.refresh_token))
            .await?;
        if !rotated {
            return Err(SessionError::StaleRefreshToken);
        }
        Ok(Session { user, tokens })
    }

    /// Clears the stored refresh digest; outstanding refresh tokens stop working.
    pub async fn logout(&self, user: &EntityId) -> Result<(), SessionError> {
        self.store.set_refresh_digest(user, None).await?;
        info!(user = %user, "user logged out");
        Ok(())
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, SessionError> {
        jsonwebtoken::decode::<AccessClaims>(token, &self.access.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| SessionError::InvalidToken)
    }

    /// Verifies an access token and loads the user it names.
    pub async fn authenticate(&self, token: &str) -> Result<UserRecord, SessionError> {
        let claims = self.verify_access(token)?;
        let user_id = EntityId::parse(&claims.sub).map_err(|_| SessionError::InvalidToken)?;
        self.store
            .user_by_id(&user_id)
            .await?
            .ok_or(SessionError::InvalidToken)
    }

    /// Mints a pair for `user` and pins the refresh token's digest.
    pub async fn issue(&self, user: &UserRecord) -> Result<TokenPair, SessionError> {
        let tokens = self.mint(user)?;
        self.store
            .set_refresh_digest(&user.id, Some(&token_digest(&tokens.refresh_token)))
            .await?;
        Ok(tokens)
    }

    fn mint(&self, user: &UserRecord) -> Result<TokenPair, SessionError> {
        let now = Utc::now().timestamp();
        let access = AccessClaims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            iat: now,
            exp: now + self.access.ttl.num_seconds(),
            jti: token_id(),
        };
        let refresh = RefreshClaims {
            sub: user.id.to_string(),
            iat: now,
            exp: now + self.refresh.ttl.num_seconds(),
            jti: token_id(),
        };

        let header = Header::new(Algorithm::HS256);
        let access_token = jsonwebtoken::encode(&header, &access, &self.access.encoding)
            .context("signing access token")?;
        let refresh_token = jsonwebtoken::encode(&header, &refresh, &self.refresh.encoding)
            .context("signing refresh token")?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Replaces the password after checking the old one.
    pub async fn change_password(
        &self,
        user: &UserRecord,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), SessionError> {
        if !check_password(old_password, &user.password_hash).await? {
            return Err(SessionError::InvalidCredentials);
        }
        let hash = hash_blocking(new_password.to_string()).await?;
        self.store.set_password_hash(&user.id, &hash).await?;
        Ok(())
    }
}

fn token_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Argon2 is CPU bound; keep it off the async workers.
async fn check_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context("password verification task failed")?
}

pub async fn hash_blocking(password: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task failed")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_store;
    use crate::store::users::NewUser;
    use anyhow::Result;

    fn token_config(access_ttl: Duration) -> TokenConfig {
        TokenConfig {
            access_secret: "access-secret".into(),
            access_ttl,
            refresh_secret: "refresh-secret".into(),
            refresh_ttl: Duration::days(10),
        }
    }

    async fn seeded(access_ttl: Duration) -> Result<(tempfile::TempDir, SessionManager, UserRecord)> {
        let (dir, store) = temp_store().await?;
        let user = store
            .create_user(&NewUser {
                username: "alice".into(),
                email: "alice@example.com".into(),
                full_name: "Alice".into(),
                avatar: "http://localhost/a.png".into(),
                cover_image: String::new(),
                password_hash: hash_password("correct horse")?,
            })
            .await?
            .context("user")?;
        Ok((dir, SessionManager::new(store, &token_config(access_ttl)), user))
    }

    #[tokio::test]
    async fn login_checks_user_and_password() -> Result<()> {
        let (_dir, sessions, user) = seeded(Duration::days(1)).await?;

        let err = sessions
            .login(UserLookup::Email("nobody@example.com"), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownUser));

        let err = sessions
            .login(UserLookup::Username("alice"), "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidCredentials));

        let session = sessions
            .login(UserLookup::Username("ALICE"), "correct horse")
            .await?;
        assert_eq!(session.user.id, user.id);
        let claims = sessions.verify_access(&session.tokens.access_token)?;
        assert_eq!(claims.sub, user.id.as_str());
        assert_eq!(claims.username, "alice");
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_stale_tokens() -> Result<()> {
        let (_dir, sessions, _user) = seeded(Duration::days(1)).await?;
        let first = sessions
            .login(UserLookup::Email("alice@example.com"), "correct horse")
            .await?;

        let second = sessions.refresh(&first.tokens.refresh_token).await?;
        assert_ne!(second.tokens.refresh_token, first.tokens.refresh_token);
        assert_ne!(second.tokens.access_token, first.tokens.access_token);

        let err = sessions
            .refresh(&first.tokens.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StaleRefreshToken));

        let third = sessions.refresh(&second.tokens.refresh_token).await?;
        assert!(sessions.refresh(&second.tokens.refresh_token).await.is_err());
        assert!(sessions.verify_access(&third.tokens.access_token).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_refreshes_of_one_token_rotate_once() -> Result<()> {
        let (_dir, sessions, user) = seeded(Duration::days(1)).await?;
        let session = sessions
            .login(UserLookup::Email("alice@example.com"), "correct horse")
            .await?;
        let token = session.tokens.refresh_token.as_str();

        let (left, right) = tokio::join!(sessions.refresh(token), sessions.refresh(token));
        let winners: Vec<_> = [left, right].into_iter().filter_map(Result::ok).collect();
        assert_eq!(winners.len(), 1);

        let stored = sessions
            .store
            .user_by_id(&user.id)
            .await?
            .context("user")?
            .refresh_token_digest
            .context("digest")?;
        assert!(digest_matches(&winners[0].tokens.refresh_token, &stored));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_loses_to_a_logout_in_between() -> Result<()> {
        let (_dir, sessions, user) = seeded(Duration::days(1)).await?;
        let session = sessions
            .login(UserLookup::Email("alice@example.com"), "correct horse")
            .await?;
        let current = token_digest(&session.tokens.refresh_token);
        sessions.logout(&user.id).await?;
        assert!(!sessions.store.rotate_refresh_digest(&user.id, &current, "next").await?);
        let err = sessions
            .refresh(&session.tokens.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StaleRefreshToken));
        Ok(())
    }

    #[tokio::test]
    async fn logout_revokes_refresh() -> Result<()> {
        let (_dir, sessions, user) = seeded(Duration::days(1)).await?;
        let session = sessions
            .login(UserLookup::Username("alice"), "correct horse")
            .await?;
        sessions.logout(&user.id).await?;
        let err = sessions
            .refresh(&session.tokens.refresh_token)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StaleRefreshToken));
        Ok(())
    }

    #[tokio::test]
    async fn access_tokens_are_not_refresh_tokens() -> Result<()> {
        let (_dir, sessions, _user) = seeded(Duration::days(1)).await?;
        let session = sessions
            .login(UserLookup::Username("alice"), "correct horse")
            .await?;
        assert!(matches!(
            sessions.refresh(&session.tokens.access_token).await,
            Err(SessionError::InvalidToken)
        ));
        assert!(matches!(
            sessions.verify_access(&session.tokens.refresh_token),
            Err(SessionError::InvalidToken)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn expired_access_token_is_rejected() -> Result<()> {
        let (_dir, sessions, _user) = seeded(Duration::seconds(-120)).await?;
        let session = sessions
            .login(UserLookup::Username("alice"), "correct horse")
            .await?;
        assert!(matches!(
            sessions.authenticate(&session.tokens.access_token).await,
            Err(SessionError::InvalidToken)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn change_password_requires_old_password() -> Result<()> {
        let (_dir, sessions, user) = seeded(Duration::days(1)).await?;
        assert!(matches!(
            sessions.change_password(&user, "nope", "new-pass").await,
            Err(SessionError::InvalidCredentials)
        ));
        sessions
            .change_password(&user, "correct horse", "new-pass")
            .await?;
        assert!(
            sessions
                .login(UserLookup::Username("alice"), "new-pass")
                .await
                .is_ok()
        );
        Ok(())
    }
}
