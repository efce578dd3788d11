use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use libsql::{Row, Value, params};
use serde::Serialize;

use super::{Store, now, parse_timestamp, timestamp_text};
use crate::id::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub subscriber: EntityId,
    pub channel: EntityId,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Subscribes when no edge exists, otherwise unsubscribes. Returns whether
    /// the subscriber follows the channel afterwards.
    pub async fn toggle_subscription(
        &self,
        subscriber: &EntityId,
        channel: &EntityId,
    ) -> Result<bool> {
        let conn = self.transaction_connection().await?;
        let tx = conn.transaction().await?;
        let removed = tx
            .execute(
                "DELETE FROM subscriptions WHERE subscriber = ?1 AND channel = ?2",
                params![subscriber.as_str(), channel.as_str()],
            )
            .await?;
        if removed == 0 {
            tx.execute(
                r#"
                INSERT INTO subscriptions (id, subscriber, channel, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(subscriber, channel) DO NOTHING
                "#,
                params![
                    EntityId::generate().as_str(),
                    subscriber.as_str(),
                    channel.as_str(),
                    timestamp_text(&now())
                ],
            )
            .await?;
        }
        tx.commit().await.context("committing subscription toggle")?;
        Ok(removed == 0)
    }

    /// Edges pointing at `channel`, newest first.
    pub async fn subscribers_of(&self, channel: &EntityId) -> Result<Vec<SubscriptionRecord>> {
        self.edges("channel = ?1", channel).await
    }

    /// Edges created by `subscriber`, newest first.
    pub async fn subscriptions_of(&self, subscriber: &EntityId) -> Result<Vec<SubscriptionRecord>> {
        self.edges("subscriber = ?1", subscriber).await
    }

    pub async fn subscribed_count(&self, subscriber: &EntityId) -> Result<i64> {
        self.scalar(
            "SELECT COUNT(*) FROM subscriptions WHERE subscriber = ?1",
            vec![Value::from(subscriber.as_str().to_string())],
        )
        .await
    }

    async fn edges(&self, predicate: &str, id: &EntityId) -> Result<Vec<SubscriptionRecord>> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT id, subscriber, channel, created_at FROM subscriptions WHERE {predicate} ORDER BY created_at DESC, rowid DESC"
                ),
                params![id.as_str()],
            )
            .await?;
        let mut edges = Vec::new();
        while let Some(row) = rows.next().await? {
            edges.push(row_to_subscription(&row)?);
        }
        Ok(edges)
    }
}

fn row_to_subscription(row: &Row) -> Result<SubscriptionRecord> {
    let created_at: String = row.get(3)?;
    Ok(SubscriptionRecord {
        id: EntityId::from_store(row.get(0)?),
        subscriber: EntityId::from_store(row.get(1)?),
        channel: EntityId::from_store(row.get(2)?),
        created_at: parse_timestamp(&created_at)?,
    })
}
