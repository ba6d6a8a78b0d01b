use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::{DeliveryAttempt, SubscriptionId};

/// Append-only log of delivery attempts.
///
/// The dispatcher writes through this narrow interface and never
/// edits or deletes a record, so implementations are free to back it
/// with a relational table, a log-structured store, or a queue.
/// Concurrent writers are expected; there is no update-in-place.
#[async_trait]
pub trait AttemptLog: Send + Sync {
    /// Append one attempt record.
    async fn record(&self, attempt: &DeliveryAttempt);

    /// All attempts referencing a subscription, oldest first.
    ///
    /// Remains valid after the subscription is deleted: history is
    /// orphaned, not cascaded.
    async fn query(&self, subscription: &SubscriptionId) -> Vec<DeliveryAttempt>;

    /// Every recorded attempt, oldest first.
    async fn query_all(&self) -> Vec<DeliveryAttempt>;
}

/// In-memory log for lightweight deployments and tests.
#[derive(Default)]
pub struct InMemoryAttemptLog {
    attempts: Mutex<Vec<DeliveryAttempt>>,
}

impl InMemoryAttemptLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptLog for InMemoryAttemptLog {
    async fn record(&self, attempt: &DeliveryAttempt) {
        self.attempts.lock().await.push(attempt.clone());
    }

    async fn query(&self, subscription: &SubscriptionId) -> Vec<DeliveryAttempt> {
        let guard = self.attempts.lock().await;
        guard
            .iter()
            .filter(|a| &a.subscription == subscription)
            .cloned()
            .collect()
    }

    async fn query_all(&self) -> Vec<DeliveryAttempt> {
        self.attempts.lock().await.clone()
    }
}
