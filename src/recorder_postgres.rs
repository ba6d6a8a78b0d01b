#[cfg(feature = "postgres")]
use async_trait::async_trait;
#[cfg(feature = "postgres")]
use tokio_postgres::Client;

#[cfg(feature = "postgres")]
use crate::recorder::AttemptLog;
#[cfg(feature = "postgres")]
use crate::types::{DeliveryAttempt, SubscriptionId};

/// Attempt log backed by a Postgres table.
///
/// One row per attempt, insert-only. The full record is stored as
/// JSONB; the subscription id is broken out for querying. Writes are
/// best-effort: a storage hiccup must not take the scheduler down.
#[cfg(feature = "postgres")]
pub struct PostgresAttemptLog {
    client: Client,
}

#[cfg(feature = "postgres")]
impl PostgresAttemptLog {
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhook_attempts (
                    id BIGINT PRIMARY KEY,
                    subscription TEXT NOT NULL,
                    record JSONB NOT NULL
                )",
                &[],
            )
            .await?;

        Ok(Self { client })
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl AttemptLog for PostgresAttemptLog {
    async fn record(&self, attempt: &DeliveryAttempt) {
        let record = serde_json::to_value(attempt).unwrap_or_default();
        let _ = self
            .client
            .execute(
                "INSERT INTO webhook_attempts (id, subscription, record)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &(attempt.id.0 as i64),
                    &attempt.subscription.to_string(),
                    &record,
                ],
            )
            .await;
    }

    async fn query(&self, subscription: &SubscriptionId) -> Vec<DeliveryAttempt> {
        let rows = self
            .client
            .query(
                "SELECT record FROM webhook_attempts
                 WHERE subscription = $1 ORDER BY id",
                &[&subscription.to_string()],
            )
            .await
            .unwrap_or_default();

        rows.into_iter()
            .filter_map(|row| row.try_get::<_, serde_json::Value>(0).ok())
            .filter_map(|v| serde_json::from_value::<DeliveryAttempt>(v).ok())
            .collect()
    }

    async fn query_all(&self) -> Vec<DeliveryAttempt> {
        let rows = self
            .client
            .query("SELECT record FROM webhook_attempts ORDER BY id", &[])
            .await
            .unwrap_or_default();

        rows.into_iter()
            .filter_map(|row| row.try_get::<_, serde_json::Value>(0).ok())
            .filter_map(|v| serde_json::from_value::<DeliveryAttempt>(v).ok())
            .collect()
    }
}
