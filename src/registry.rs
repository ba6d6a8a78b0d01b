use std::collections::HashMap;

use tokio::sync::RwLock;
use url::Url;

use crate::catalog::EventCatalog;
use crate::error::{NotFoundError, ValidationError};
use crate::types::{now_ms, ContentType, OwnerId, Subscription, SubscriptionId};

/// The set of active webhook subscriptions.
///
/// Read-mostly shared state: the dispatcher queries it on every event
/// firing and on every retry, while creates and deletes are
/// comparatively rare. Deleting a subscription removes it from future
/// matching but leaves its recorded attempt history untouched.
pub struct SubscriptionRegistry {
    catalog: EventCatalog,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new(catalog: EventCatalog) -> Self {
        Self {
            catalog,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new subscription.
    ///
    /// Fails with [`ValidationError`] if the event name is not in the
    /// catalog or the target URL is not a well-formed absolute
    /// http(s) URL. No attempt record is created for a rejected
    /// subscription.
    pub async fn create(
        &self,
        owner: OwnerId,
        event: impl Into<String>,
        target_url: impl Into<String>,
        content_type: ContentType,
    ) -> Result<Subscription, ValidationError> {
        let event = event.into();
        let target_url = target_url.into();

        if !self.catalog.contains(&event) {
            return Err(ValidationError::UnknownEvent { event });
        }
        validate_target_url(&target_url)?;

        let subscription = Subscription {
            id: SubscriptionId::generate(),
            owner,
            event,
            target_url,
            content_type,
            last_attempt_at: None,
            modified_at: now_ms(),
        };

        let mut guard = self.subscriptions.write().await;
        guard.insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    /// All active subscriptions for an event name, most recently
    /// modified first.
    pub async fn find_matching(&self, event: &str) -> Vec<Subscription> {
        let guard = self.subscriptions.read().await;
        let mut matching: Vec<Subscription> = guard
            .values()
            .filter(|s| s.event == event)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        matching
    }

    /// Remove a subscription from future matching.
    ///
    /// Attempt history is not cascaded; it stays queryable by id in
    /// the attempt log. Any retry scheduled for this subscription is
    /// dropped silently when it comes due.
    pub async fn delete(&self, id: &SubscriptionId) -> Result<(), NotFoundError> {
        let mut guard = self.subscriptions.write().await;
        match guard.remove(id) {
            Some(_) => Ok(()),
            None => Err(NotFoundError { id: *id }),
        }
    }

    pub async fn get(&self, id: &SubscriptionId) -> Option<Subscription> {
        let guard = self.subscriptions.read().await;
        guard.get(id).cloned()
    }

    pub async fn contains(&self, id: &SubscriptionId) -> bool {
        let guard = self.subscriptions.read().await;
        guard.contains_key(id)
    }

    /// Record the completion time of an attempt on the subscription.
    ///
    /// Concurrent completions race; last-write-wins on the attempt's
    /// completion timestamp, not on call order.
    pub(crate) async fn touch_last_attempt(&self, id: &SubscriptionId, completed_at: u64) {
        let mut guard = self.subscriptions.write().await;
        if let Some(subscription) = guard.get_mut(id) {
            if subscription.last_attempt_at.map_or(true, |prev| prev <= completed_at) {
                subscription.last_attempt_at = Some(completed_at);
            }
        }
    }
}

fn validate_target_url(target_url: &str) -> Result<(), ValidationError> {
    if target_url.is_empty() {
        return Err(ValidationError::InvalidUrl {
            url: target_url.to_string(),
            reason: "empty".to_string(),
        });
    }

    let parsed = Url::parse(target_url).map_err(|e| ValidationError::InvalidUrl {
        url: target_url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ValidationError::InvalidUrl {
            url: target_url.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}
