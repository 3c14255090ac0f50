//! Subscriber registry.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use careline_store::KeyValueStore;

use crate::error::{WebhookError, WebhookResult};
use crate::store::{CAS_MAX_RETRIES, keys, read_index, update_index};
use crate::subscriber::{NewSubscriber, Subscriber, SubscriberUpdate};

/// CRUD over webhook subscriptions.
#[derive(Clone)]
pub struct SubscriberRegistry {
    store: Arc<dyn KeyValueStore>,
}

impl SubscriberRegistry {
    /// Creates a registry over the given substrate.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Registers a subscriber, generating a secret when none was supplied.
    pub async fn register(&self, new: NewSubscriber) -> WebhookResult<Subscriber> {
        validate_url(&new.url)?;
        validate_limits(new.retry_attempts, new.timeout_secs)?;
        if let Some(secret) = &new.secret {
            if secret.is_empty() {
                return Err(WebhookError::Validation("secret must not be empty".into()));
            }
        }

        let subscriber = Subscriber {
            id: uuid::Uuid::new_v4().to_string(),
            url: new.url,
            events: new.events,
            secret: new.secret.unwrap_or_else(Subscriber::generate_secret),
            enabled: new.enabled,
            retry_attempts: new.retry_attempts,
            timeout_secs: new.timeout_secs,
            custom_headers: new.custom_headers,
            created_at: Utc::now(),
            last_sent_at: None,
            success_count: 0,
            failure_count: 0,
        };

        let key = keys::webhook(&subscriber.id);
        let value = serde_json::to_value(&subscriber)?;
        if !self.store.compare_and_swap(&key, None, value).await? {
            return Err(WebhookError::Conflict(key));
        }

        let id = subscriber.id.clone();
        update_index(self.store.as_ref(), keys::WEBHOOK_INDEX, move |mut ids| {
            if ids.iter().any(|known| known == &id) {
                return None;
            }
            ids.push(id.clone());
            Some(ids)
        })
        .await?;

        tracing::debug!(webhook_id = %subscriber.id, url = %subscriber.url, "Registered webhook");
        Ok(subscriber)
    }

    /// Gets a subscriber by id.
    pub async fn get(&self, id: &str) -> WebhookResult<Option<Subscriber>> {
        match self.store.get(&keys::webhook(id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Lists all subscribers in registration order.
    pub async fn list(&self) -> WebhookResult<Vec<Subscriber>> {
        let ids = read_index(self.store.as_ref(), keys::WEBHOOK_INDEX).await?;
        let mut subscribers = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(subscriber) = self.get(&id).await? {
                subscribers.push(subscriber);
            }
        }
        Ok(subscribers)
    }

    /// Lists the enabled subscribers that want the given event type.
    pub async fn matching(&self, event_type: &str) -> WebhookResult<Vec<Subscriber>> {
        let mut subscribers = self.list().await?;
        subscribers.retain(|s| s.enabled && s.matches_event(event_type));
        Ok(subscribers)
    }

    /// Applies a whitelisted update to a subscriber.
    pub async fn update(&self, id: &str, update: SubscriberUpdate) -> WebhookResult<Subscriber> {
        if let Some(url) = &update.url {
            validate_url(url)?;
        }
        validate_limits(
            update.retry_attempts.unwrap_or(1),
            update.timeout_secs.unwrap_or(1),
        )?;

        let key = keys::webhook(id);
        for _ in 0..CAS_MAX_RETRIES {
            let Some(current) = self.store.get(&key).await? else {
                return Err(WebhookError::NotFound(id.to_string()));
            };
            let mut subscriber: Subscriber = serde_json::from_value(current.clone())?;

            if let Some(url) = update.url.clone() {
                subscriber.url = url;
            }
            if let Some(events) = update.events.clone() {
                subscriber.events = events;
            }
            if let Some(enabled) = update.enabled {
                subscriber.enabled = enabled;
            }
            if let Some(attempts) = update.retry_attempts {
                subscriber.retry_attempts = attempts;
            }
            if let Some(timeout) = update.timeout_secs {
                subscriber.timeout_secs = timeout;
            }
            if let Some(headers) = update.custom_headers.clone() {
                subscriber.custom_headers = headers;
            }

            let new = serde_json::to_value(&subscriber)?;
            if self
                .store
                .compare_and_swap(&key, Some(&current), new)
                .await?
            {
                tracing::debug!(webhook_id = %id, "Updated webhook");
                return Ok(subscriber);
            }
        }
        Err(WebhookError::Conflict(key))
    }

    /// Deletes a subscriber.
    pub async fn delete(&self, id: &str) -> WebhookResult<()> {
        if !self.store.delete(&keys::webhook(id)).await? {
            return Err(WebhookError::NotFound(id.to_string()));
        }

        let dropped = id.to_string();
        update_index(self.store.as_ref(), keys::WEBHOOK_INDEX, move |mut ids| {
            let before = ids.len();
            ids.retain(|known| known != &dropped);
            (ids.len() != before).then_some(ids)
        })
        .await?;

        tracing::debug!(webhook_id = %id, "Deleted webhook");
        Ok(())
    }

    /// Bumps a subscriber's outcome counters.
    ///
    /// A missing subscriber is not an error: it was deleted while the
    /// delivery was in flight and there is nothing left to count against.
    pub(crate) async fn record_outcome(
        &self,
        id: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> WebhookResult<()> {
        let key = keys::webhook(id);
        for _ in 0..CAS_MAX_RETRIES {
            let Some(current) = self.store.get(&key).await? else {
                return Ok(());
            };
            let mut subscriber: Subscriber = serde_json::from_value(current.clone())?;

            subscriber.last_sent_at = Some(now);
            if success {
                subscriber.success_count += 1;
            } else {
                subscriber.failure_count += 1;
            }

            let new = serde_json::to_value(&subscriber)?;
            if self
                .store
                .compare_and_swap(&key, Some(&current), new)
                .await?
            {
                return Ok(());
            }
        }
        Err(WebhookError::Conflict(key))
    }
}

fn validate_url(url: &str) -> WebhookResult<()> {
    if url.is_empty() {
        return Err(WebhookError::Validation("url must not be empty".into()));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(WebhookError::Validation(format!(
            "url must use http or https: {url}"
        )));
    }
    Ok(())
}

fn validate_limits(retry_attempts: u32, timeout_secs: u64) -> WebhookResult<()> {
    if retry_attempts == 0 {
        return Err(WebhookError::Validation(
            "retry_attempts must be at least 1".into(),
        ));
    }
    if timeout_secs == 0 {
        return Err(WebhookError::Validation(
            "timeout_secs must be at least 1".into(),
        ));
    }
    Ok(())
}
