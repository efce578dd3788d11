//! Accounts, public profiles and watch history.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use libsql::{Row, Value, params, params::Params};
use serde::Serialize;

use super::{Store, id_values, now, parse_timestamp, placeholders, timestamp_text, unique_ids};
use crate::id::EntityId;

const USER_COLUMNS: &str = "id, username, email, full_name, avatar, cover_image, password_hash, refresh_token_digest, created_at, updated_at";

/// Full account row. Secrets never serialize.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub refresh_token_digest: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The owner block embedded in videos, comments, tweets and playlists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub username: String,
    pub full_name: String,
    pub avatar: String,
}

impl From<&UserRecord> for PublicProfile {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: String,
    pub password_hash: String,
}

/// How a login credential identifies the account.
#[derive(Debug, Clone, Copy)]
pub enum UserLookup<'a> {
    Email(&'a str),
    Username(&'a str),
}

#[derive(Debug)]
pub enum AccountUpdate {
    Updated(UserRecord),
    EmailTaken,
    Missing,
}

impl Store {
    /// Inserts a user. Returns `None` when the username or email is taken.
    pub async fn create_user(&self, user: &NewUser) -> Result<Option<UserRecord>> {
        let id = EntityId::generate();
        let stamp = timestamp_text(&now());
        let inserted = self
            .conn()
            .execute(
                r#"
                INSERT INTO users (
                    id, username, email, full_name, avatar, cover_image,
                    password_hash, refresh_token_digest, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8)
                ON CONFLICT DO NOTHING
                "#,
                params![
                    id.as_str(),
                    user.username.trim().to_lowercase(),
                    user.email.trim(),
                    user.full_name.trim(),
                    user.avatar.as_str(),
                    user.cover_image.as_str(),
                    user.password_hash.as_str(),
                    stamp,
                ],
            )
            .await
            .context("inserting user")?;
        if inserted == 0 {
            return Ok(None);
        }
        self.user_by_id(&id).await
    }

    pub async fn user_by_id(&self, id: &EntityId) -> Result<Option<UserRecord>> {
        self.fetch_user("id = ?1", id.as_str().to_string()).await
    }

    pub async fn user_by_login(&self, lookup: UserLookup<'_>) -> Result<Option<UserRecord>> {
        match lookup {
            UserLookup::Email(email) => {
                self.fetch_user("email = ?1 COLLATE NOCASE", email.trim().to_string())
                    .await
            }
            UserLookup::Username(username) => self.user_by_username(username).await,
        }
    }

    /// Usernames are stored lower-cased so the handle match is case-insensitive.
    pub async fn user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.fetch_user("username = ?1", username.trim().to_lowercase())
            .await
    }

    async fn fetch_user(&self, predicate: &str, value: String) -> Result<Option<UserRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}"),
                params![value],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    /// Batched owner lookup used by every join-one stage.
    pub async fn public_profiles(
        &self,
        ids: &[EntityId],
    ) -> Result<HashMap<EntityId, PublicProfile>> {
        let ids = unique_ids(ids);
        let mut profiles = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(profiles);
        }
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT id, username, full_name, avatar FROM users WHERE id IN ({})",
                    placeholders(ids.len())
                ),
                Params::Positional(id_values(&ids)),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let profile = PublicProfile {
                id: EntityId::from_store(row.get(0)?),
                username: row.get(1)?,
                full_name: row.get(2)?,
                avatar: row.get(3)?,
            };
            profiles.insert(profile.id.clone(), profile);
        }
        Ok(profiles)
    }

    pub async fn set_refresh_digest(&self, id: &EntityId, digest: Option<&str>) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE users SET refresh_token_digest = ?2 WHERE id = ?1",
                params![id.as_str(), digest],
            )
            .await?;
        Ok(())
    }

    /// Replaces the refresh digest only while it still equals `current`.
    /// Returns false when another rotation or a logout got there first.
    pub async fn rotate_refresh_digest(
        &self,
        id: &EntityId,
        current: &str,
        next: &str,
    ) -> Result<bool> {
        let changed = self
            .conn()
            .execute(
                "UPDATE users SET refresh_token_digest = ?3 WHERE id = ?1 AND refresh_token_digest = ?2",
                params![id.as_str(), current, next],
            )
            .await?;
        Ok(changed == 1)
    }

    pub async fn set_password_hash(&self, id: &EntityId, hash: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.as_str(), hash, timestamp_text(&now())],
            )
            .await?;
        Ok(())
    }

    pub async fn update_account(
        &self,
        id: &EntityId,
        full_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<AccountUpdate> {
        if let Some(email) = email {
            let taken = self
                .scalar(
                    "SELECT COUNT(*) FROM users WHERE email = ?1 COLLATE NOCASE AND id != ?2",
                    vec![
                        Value::from(email.trim().to_string()),
                        Value::from(id.as_str().to_string()),
                    ],
                )
                .await?;
            if taken > 0 {
                return Ok(AccountUpdate::EmailTaken);
            }
        }

        let changed = self
            .conn()
            .execute(
                r#"
                UPDATE users SET
                    full_name = COALESCE(?2, full_name),
                    email = COALESCE(?3, email),
                    updated_at = ?4
                WHERE id = ?1
                "#,
                params![
                    id.as_str(),
                    full_name.map(str::trim),
                    email.map(str::trim),
                    timestamp_text(&now())
                ],
            )
            .await?;
        if changed == 0 {
            return Ok(AccountUpdate::Missing);
        }
        match self.user_by_id(id).await? {
            Some(user) => Ok(AccountUpdate::Updated(user)),
            None => Ok(AccountUpdate::Missing),
        }
    }

    pub async fn set_avatar(&self, id: &EntityId, url: &str) -> Result<Option<UserRecord>> {
        self.set_image_column(id, "avatar", url).await
    }

    pub async fn set_cover_image(&self, id: &EntityId, url: &str) -> Result<Option<UserRecord>> {
        self.set_image_column(id, "cover_image", url).await
    }

    async fn set_image_column(
        &self,
        id: &EntityId,
        column: &str,
        url: &str,
    ) -> Result<Option<UserRecord>> {
        self.conn()
            .execute(
                &format!("UPDATE users SET {column} = ?2, updated_at = ?3 WHERE id = ?1"),
                params![id.as_str(), url, timestamp_text(&now())],
            )
            .await?;
        self.user_by_id(id).await
    }

    /// Add-to-set: watching the same video again keeps its original position.
    pub async fn record_watch(&self, user: &EntityId, video: &EntityId) -> Result<()> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO watch_history (user_id, video_id, watched_at) VALUES (?1, ?2, ?3)",
                params![user.as_str(), video.as_str(), timestamp_text(&now())],
            )
            .await?;
        Ok(())
    }

    pub async fn watch_history(&self, user: &EntityId) -> Result<Vec<EntityId>> {
        let mut rows = self
            .conn()
            .query(
                "SELECT video_id FROM watch_history WHERE user_id = ?1 ORDER BY rowid",
                params![user.as_str()],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(EntityId::from_store(row.get(0)?));
        }
        Ok(ids)
    }
}

fn row_to_user(row: &Row) -> Result<UserRecord> {
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(UserRecord {
        id: EntityId::from_store(row.get(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        avatar: row.get(4)?,
        cover_image: row.get(5)?,
        password_hash: row.get(6)?,
        refresh_token_digest: row.get(7)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::{new_user, seed_user};
    use super::*;
    use crate::store::test_support::temp_store;

    #[tokio::test]
    async fn create_user_lowercases_username_and_rejects_duplicates() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let user = seed_user(&store, "Alice").await?;
        assert_eq!(user.username, "alice");
        assert!(user.refresh_token_digest.is_none());

        assert!(store.create_user(&new_user("ALICE")).await?.is_none());
        let mut other = new_user("bob");
        other.email = "alice@example.com".into();
        assert!(store.create_user(&other).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn lookup_by_email_or_username() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let user = seed_user(&store, "carol").await?;

        let by_email = store
            .user_by_login(UserLookup::Email("CAROL@example.com"))
            .await?
            .context("email lookup")?;
        assert_eq!(by_email.id, user.id);
        let by_name = store
            .user_by_login(UserLookup::Username("Carol"))
            .await?
            .context("username lookup")?;
        assert_eq!(by_name.id, user.id);
        assert!(store.user_by_username("nobody").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn serialized_user_hides_secrets() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let user = seed_user(&store, "dave").await?;
        store.set_refresh_digest(&user.id, Some("abc")).await?;
        let user = store.user_by_id(&user.id).await?.context("user")?;
        assert_eq!(user.refresh_token_digest.as_deref(), Some("abc"));

        assert!(!store.rotate_refresh_digest(&user.id, "stale", "def").await?);
        assert!(store.rotate_refresh_digest(&user.id, "abc", "def").await?);
        assert!(!store.rotate_refresh_digest(&user.id, "abc", "ghi").await?);
        let user = store.user_by_id(&user.id).await?.context("user")?;
        assert_eq!(user.refresh_token_digest.as_deref(), Some("def"));

        let json = serde_json::to_value(&user)?;
        assert_eq!(json["_id"], user.id.as_str());
        assert_eq!(json["fullName"], "dave Tester");
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("refreshTokenDigest").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn update_account_checks_email_owner() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let erin = seed_user(&store, "erin").await?;
        seed_user(&store, "frank").await?;

        let outcome = store
            .update_account(&erin.id, None, Some("frank@example.com"))
            .await?;
        assert!(matches!(outcome, AccountUpdate::EmailTaken));

        let outcome = store
            .update_account(&erin.id, Some("Erin New"), None)
            .await?;
        let AccountUpdate::Updated(updated) = outcome else {
            panic!("expected update");
        };
        assert_eq!(updated.full_name, "Erin New");
        assert_eq!(updated.email, "erin@example.com");

        let ghost = EntityId::generate();
        assert!(matches!(
            store.update_account(&ghost, Some("x"), None).await?,
            AccountUpdate::Missing
        ));
        Ok(())
    }

    #[tokio::test]
    async fn watch_history_is_an_ordered_set() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let user = seed_user(&store, "gina").await?;
        let first = EntityId::generate();
        let second = EntityId::generate();
        store.record_watch(&user.id, &first).await?;
        store.record_watch(&user.id, &second).await?;
        store.record_watch(&user.id, &first).await?;
        assert_eq!(store.watch_history(&user.id).await?, vec![first, second]);
        Ok(())
    }

    #[tokio::test]
    async fn public_profiles_batches_and_skips_unknown() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let hank = seed_user(&store, "hank").await?;
        let ghost = EntityId::generate();
        let profiles = store
            .public_profiles(&[hank.id.clone(), ghost.clone(), hank.id.clone()])
            .await?;
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[&hank.id].username, "hank");
        assert!(!profiles.contains_key(&ghost));
        Ok(())
    }
}
