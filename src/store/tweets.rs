use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use serde::Serialize;

use super::{Store, now, parse_timestamp, timestamp_text};
use crate::id::EntityId;

const TWEET_COLUMNS: &str = "id, content, owner, created_at, updated_at";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetRecord {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub content: String,
    pub owner: EntityId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Store {
    pub async fn insert_tweet(&self, owner: &EntityId, content: &str) -> Result<TweetRecord> {
        let id = EntityId::generate();
        self.conn()
            .execute(
                "INSERT INTO tweets (id, content, owner, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id.as_str(), content.trim(), owner.as_str(), timestamp_text(&now())],
            )
            .await
            .context("inserting tweet")?;
        self.tweet_by_id(&id).await?.context("inserted tweet vanished")
    }

    pub async fn tweet_by_id(&self, id: &EntityId) -> Result<Option<TweetRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TWEET_COLUMNS} FROM tweets WHERE id = ?1"),
                params![id.as_str()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_tweet(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn tweets_by_owner(&self, owner: &EntityId) -> Result<Vec<TweetRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TWEET_COLUMNS} FROM tweets WHERE owner = ?1 ORDER BY created_at DESC, rowid DESC"
                ),
                params![owner.as_str()],
            )
            .await?;
        let mut tweets = Vec::new();
        while let Some(row) = rows.next().await? {
            tweets.push(row_to_tweet(&row)?);
        }
        Ok(tweets)
    }

    pub async fn update_tweet_content(
        &self,
        id: &EntityId,
        content: &str,
    ) -> Result<Option<TweetRecord>> {
        self.conn()
            .execute(
                "UPDATE tweets SET content = ?2, updated_at = ?3 WHERE id = ?1",
                params![id.as_str(), content.trim(), timestamp_text(&now())],
            )
            .await?;
        self.tweet_by_id(id).await
    }

    pub async fn delete_tweet_with_likes(&self, id: &EntityId) -> Result<bool> {
        let conn = self.transaction_connection().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "DELETE FROM likes WHERE target_kind = 'tweet' AND target_id = ?1",
            params![id.as_str()],
        )
        .await?;
        let removed = tx
            .execute("DELETE FROM tweets WHERE id = ?1", params![id.as_str()])
            .await?;
        tx.commit().await.context("committing tweet delete")?;
        Ok(removed > 0)
    }
}

fn row_to_tweet(row: &Row) -> Result<TweetRecord> {
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;
    Ok(TweetRecord {
        id: EntityId::from_store(row.get(0)?),
        content: row.get(1)?,
        owner: EntityId::from_store(row.get(2)?),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::likes::TargetKind;
    use crate::store::test_support::temp_store;

    #[tokio::test]
    async fn tweets_crud() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = EntityId::generate();
        let first = store.insert_tweet(&owner, "hello").await?;
        let second = store.insert_tweet(&owner, "world").await?;

        let listed: Vec<_> = store
            .tweets_by_owner(&owner)
            .await?
            .into_iter()
            .map(|tweet| tweet.id)
            .collect();
        assert_eq!(listed, vec![second.id.clone(), first.id.clone()]);

        let edited = store
            .update_tweet_content(&first.id, "hello again")
            .await?
            .context("edited tweet")?;
        assert_eq!(edited.content, "hello again");
        assert!(edited.updated_at >= first.updated_at);

        store
            .toggle_reaction(&owner, TargetKind::Tweet, &first.id, false)
            .await?;
        assert!(store.delete_tweet_with_likes(&first.id).await?);
        assert!(store.tweet_by_id(&first.id).await?.is_none());
        assert!(
            store
                .likes_for(TargetKind::Tweet, &[first.id.clone()])
                .await?
                .is_empty()
        );
        Ok(())
    }
}
