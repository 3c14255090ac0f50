//! Webhook engine - main entry point.

use chrono::Duration;
#[cfg(feature = "http-client")]
use chrono::Utc;
use serde_json::Value;
#[cfg(feature = "http-client")]
use serde_json::json;
use std::sync::Arc;

use careline_events::{Event, EventSource};
#[cfg(feature = "http-client")]
use careline_events::platform_events;
use careline_store::KeyValueStore;

use crate::delivery::Delivery;
#[cfg(feature = "http-client")]
use crate::error::WebhookError;
use crate::error::WebhookResult;
use crate::notify::Notifier;
use crate::registry::SubscriberRegistry;
use crate::stats::{StatsTracker, WebhookStats};
use crate::store::DeliveryStore;
use crate::subscriber::{NewSubscriber, Subscriber, SubscriberUpdate};

#[cfg(feature = "http-client")]
use crate::processor::DeliveryProcessor;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Identity stamped into every envelope's `source` block.
    pub source: EventSource,
    /// Deliveries processed per `process_queue` invocation.
    pub batch_size: usize,
    /// Queue depth below which a fresh delivery is attempted inline.
    pub inline_threshold: usize,
    /// How long a claim holds before the record becomes reclaimable.
    pub lease_secs: i64,
    /// How long terminal records are kept before housekeeping drops them.
    pub retention_hours: i64,
}

impl EngineConfig {
    /// Creates a configuration with the given source identity and defaults.
    pub fn new(source: EventSource) -> Self {
        Self {
            source,
            batch_size: 20,
            inline_threshold: 10,
            lease_secs: 300,
            retention_hours: 24,
        }
    }

    /// Sets the per-invocation batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the inline-send queue depth threshold.
    pub fn inline_threshold(mut self, depth: usize) -> Self {
        self.inline_threshold = depth;
        self
    }

    /// Sets the claim lease duration in seconds.
    pub fn lease_secs(mut self, secs: i64) -> Self {
        self.lease_secs = secs;
        self
    }

    /// Sets the terminal record retention in hours.
    pub fn retention_hours(mut self, hours: i64) -> Self {
        self.retention_hours = hours;
        self
    }

    pub(crate) fn lease(&self) -> Duration {
        Duration::seconds(self.lease_secs)
    }

    pub(crate) fn retention(&self) -> Duration {
        Duration::hours(self.retention_hours)
    }

    pub(crate) fn user_agent(&self) -> String {
        format!("{}-Webhook/1.0", self.source.application)
    }
}

/// The outbound webhook delivery engine.
///
/// Construct one per process and share it; every collaborator is passed in
/// explicitly. Delivery outcomes never propagate back through [`fire_event`]
/// — callers that care inspect [`get_webhook_stats`] or the records
/// themselves.
///
/// [`fire_event`]: WebhookEngine::fire_event
/// [`get_webhook_stats`]: WebhookEngine::get_webhook_stats
pub struct WebhookEngine {
    config: Arc<EngineConfig>,
    registry: SubscriberRegistry,
    deliveries: DeliveryStore,
    stats: StatsTracker,
    #[cfg(feature = "http-client")]
    processor: DeliveryProcessor,
}

impl WebhookEngine {
    /// Creates an engine over the given substrate and notification channel.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let config = Arc::new(config);
        let registry = SubscriberRegistry::new(store.clone());
        let deliveries = DeliveryStore::new(store.clone());
        let stats = StatsTracker::new(store, registry.clone());

        #[cfg(not(feature = "http-client"))]
        let _ = notifier;

        Self {
            #[cfg(feature = "http-client")]
            processor: DeliveryProcessor::new(
                registry.clone(),
                deliveries.clone(),
                stats.clone(),
                notifier,
                config.clone(),
            ),
            config,
            registry,
            deliveries,
            stats,
        }
    }

    /// Fires a domain event at every matching subscriber.
    ///
    /// Fire-and-forget: one pending delivery is created per enabled
    /// subscriber whose subscription covers `event_type`, and nothing about
    /// their eventual fate reaches the caller. While the queue is shallow the
    /// fresh deliveries are attempted before returning; under backlog they
    /// wait for the next processor pass.
    pub async fn fire_event(&self, event_type: &str, data: Value, context: Value) {
        if event_type.is_empty() {
            tracing::warn!("Dropped event with empty type");
            return;
        }

        let subscribers = match self.registry.matching(event_type).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                tracing::warn!(event_type, error = %e, "Failed to match subscribers, event dropped");
                return;
            }
        };
        if subscribers.is_empty() {
            tracing::debug!(event_type, "No subscribers for event");
            return;
        }

        let event = Event::new(event_type, self.config.source.clone())
            .with_data(data)
            .with_context(context);

        #[cfg(feature = "http-client")]
        let queued = self.deliveries.queued_count().await.unwrap_or(usize::MAX);

        for subscriber in subscribers {
            let delivery = match Delivery::new(&subscriber, &event) {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::warn!(
                        webhook_id = %subscriber.id,
                        event_type,
                        error = %e,
                        "Failed to build delivery"
                    );
                    continue;
                }
            };

            if let Err(e) = self.deliveries.insert(&delivery).await {
                tracing::warn!(
                    webhook_id = %subscriber.id,
                    event_type,
                    error = %e,
                    "Failed to queue delivery"
                );
                continue;
            }
            tracing::debug!(
                delivery_id = %delivery.id,
                webhook_id = %subscriber.id,
                event_type,
                "Queued delivery"
            );

            #[cfg(feature = "http-client")]
            if queued < self.config.inline_threshold {
                self.attempt_inline(&delivery, &subscriber).await;
            }
        }
    }

    /// Claims and attempts a freshly queued delivery before returning.
    #[cfg(feature = "http-client")]
    async fn attempt_inline(&self, delivery: &Delivery, subscriber: &Subscriber) {
        match self
            .deliveries
            .try_claim(delivery, self.config.lease(), Utc::now())
            .await
        {
            Ok(Some(claimed)) => {
                if let Err(e) = self.processor.process_delivery(claimed, subscriber).await {
                    tracing::warn!(
                        delivery_id = %delivery.id,
                        error = %e,
                        "Inline delivery attempt failed to settle"
                    );
                }
            }
            // A concurrent processor pass beat us to the claim; it owns the
            // attempt now.
            Ok(None) => {}
            Err(e) => tracing::warn!(
                delivery_id = %delivery.id,
                error = %e,
                "Failed to claim delivery for inline attempt"
            ),
        }
    }

    /// Registers a webhook subscriber.
    pub async fn register_webhook(&self, new: NewSubscriber) -> WebhookResult<Subscriber> {
        self.registry.register(new).await
    }

    /// Gets a subscriber by id.
    pub async fn get_webhook(&self, id: &str) -> WebhookResult<Option<Subscriber>> {
        self.registry.get(id).await
    }

    /// Lists all subscribers.
    pub async fn list_webhooks(&self) -> WebhookResult<Vec<Subscriber>> {
        self.registry.list().await
    }

    /// Applies a whitelisted update to a subscriber.
    pub async fn update_webhook(
        &self,
        id: &str,
        update: SubscriberUpdate,
    ) -> WebhookResult<Subscriber> {
        self.registry.update(id, update).await
    }

    /// Deletes a subscriber. Already-queued deliveries for it are closed out
    /// by the processor instead of being attempted.
    pub async fn delete_webhook(&self, id: &str) -> WebhookResult<()> {
        self.registry.delete(id).await
    }

    /// Stats for one subscriber, or the global aggregate with `None`.
    pub async fn get_webhook_stats(&self, id: Option<&str>) -> WebhookResult<WebhookStats> {
        match id {
            Some(id) => self.stats.stats_for(id).await,
            None => self.stats.global().await,
        }
    }

    /// Sends a synthetic `webhook.test` event through the full delivery path
    /// and returns the settled record.
    ///
    /// Runs even for disabled subscribers, so an endpoint can be verified
    /// before it is switched on. The test delivery gets a single attempt.
    #[cfg(feature = "http-client")]
    pub async fn test_webhook(&self, id: &str) -> WebhookResult<Delivery> {
        let subscriber = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(id.to_string()))?;

        let event = Event::new(platform_events::WEBHOOK_TEST, self.config.source.clone())
            .with_data(json!({
                "message": format!("Test delivery from {}", self.config.source.application),
                "webhook_id": subscriber.id,
            }));

        let mut delivery = Delivery::new(&subscriber, &event)?;
        delivery.max_attempts = 1;

        self.deliveries.insert(&delivery).await?;
        let claimed = self
            .deliveries
            .try_claim(&delivery, self.config.lease(), Utc::now())
            .await?
            .ok_or_else(|| WebhookError::Conflict(delivery.id.clone()))?;

        self.processor.process_delivery(claimed, &subscriber).await
    }

    /// Drains one batch of due deliveries; see
    /// [`DeliveryProcessor::process_queue`].
    #[cfg(feature = "http-client")]
    pub async fn process_queue(&self) -> WebhookResult<usize> {
        self.processor.process_queue().await
    }

    /// The subscriber registry.
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// The delivery record store.
    pub fn deliveries(&self) -> &DeliveryStore {
        &self.deliveries
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
