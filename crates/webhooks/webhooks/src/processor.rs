//! Delivery processor: claim, send, settle.
//!
//! `process_queue` is driven by an external periodic trigger; one invocation
//! claims a bounded batch of due deliveries, attempts them concurrently, and
//! runs the housekeeping pass. Claims are CAS transitions on the records, so
//! overlapping invocations never attempt the same delivery twice.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::delivery::{Delivery, DeliveryStatus, body_excerpt};
use crate::engine::EngineConfig;
use crate::error::WebhookResult;
use crate::notify::{Notifier, Severity};
use crate::registry::SubscriberRegistry;
use crate::stats::StatsTracker;
use crate::store::DeliveryStore;
use crate::subscriber::Subscriber;

/// Outcome of one HTTP attempt.
enum AttemptOutcome {
    /// The endpoint answered 2xx.
    Delivered { code: u16, excerpt: Option<String> },
    /// The endpoint answered outside 2xx.
    Rejected { code: u16, excerpt: Option<String> },
    /// No response: DNS failure, refused connection, timeout.
    TransportFailed { error: String },
}

/// Executes delivery attempts and applies the retry state machine.
#[derive(Clone)]
pub struct DeliveryProcessor {
    registry: SubscriberRegistry,
    deliveries: DeliveryStore,
    stats: StatsTracker,
    notifier: Arc<dyn Notifier>,
    config: Arc<EngineConfig>,
    client: reqwest::Client,
}

impl DeliveryProcessor {
    pub(crate) fn new(
        registry: SubscriberRegistry,
        deliveries: DeliveryStore,
        stats: StatsTracker,
        notifier: Arc<dyn Notifier>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            registry,
            deliveries,
            stats,
            notifier,
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Drains one batch of due deliveries.
    ///
    /// Returns how many deliveries this invocation claimed. Attempts within
    /// the batch run concurrently; each delivery's own attempts stay strictly
    /// sequential because the next one is only scheduled once the outcome of
    /// the previous one is written back.
    pub async fn process_queue(&self) -> WebhookResult<usize> {
        let now = Utc::now();
        let claimed = self
            .deliveries
            .claim_due(self.config.batch_size, self.config.lease(), now)
            .await?;
        let count = claimed.len();
        if count > 0 {
            tracing::debug!(count, "Claimed due deliveries");
        }

        let mut attempts = JoinSet::new();
        for delivery in claimed {
            let processor = self.clone();
            attempts.spawn(async move { processor.handle_claimed(delivery).await });
        }
        while attempts.join_next().await.is_some() {}

        match self
            .deliveries
            .purge_terminal(self.config.retention())
            .await
        {
            Ok(0) => {}
            Ok(purged) => tracing::debug!(purged, "Purged old terminal deliveries"),
            Err(e) => tracing::warn!(error = %e, "Housekeeping pass failed"),
        }

        Ok(count)
    }

    /// Settles one claimed delivery, resolving its subscriber first.
    async fn handle_claimed(&self, claimed: Delivery) {
        let delivery_id = claimed.id.clone();
        match self.registry.get(&claimed.subscriber_id).await {
            Ok(Some(subscriber)) if subscriber.enabled => {
                if let Err(e) = self.process_delivery(claimed, &subscriber).await {
                    tracing::warn!(
                        delivery_id = %delivery_id,
                        error = %e,
                        "Failed to settle delivery attempt"
                    );
                }
            }
            Ok(Some(_)) => self.abandon(claimed, "webhook disabled").await,
            Ok(None) => self.abandon(claimed, "webhook no longer exists").await,
            Err(e) => {
                // Leave the claim to lapse; a later pass reclaims the record.
                tracing::warn!(
                    delivery_id = %delivery_id,
                    error = %e,
                    "Failed to load subscriber for claimed delivery"
                );
            }
        }
    }

    /// Performs one attempt for a claimed delivery and writes the outcome
    /// back.
    pub(crate) async fn process_delivery(
        &self,
        claimed: Delivery,
        subscriber: &Subscriber,
    ) -> WebhookResult<Delivery> {
        let snapshot = claimed.clone();
        let mut updated = claimed;
        updated.attempts += 1;

        tracing::debug!(
            delivery_id = %updated.id,
            webhook_id = %subscriber.id,
            url = %subscriber.url,
            attempt = updated.attempts,
            "Attempting webhook delivery"
        );

        let outcome = self.attempt(&updated, subscriber).await;
        let now = Utc::now();

        match outcome {
            AttemptOutcome::Delivered { code, excerpt } => {
                updated.mark_sent(code, excerpt);
                if self.deliveries.write_back(&snapshot, &updated).await? {
                    self.stats.record_outcome(&subscriber.id, true).await?;
                    tracing::debug!(
                        delivery_id = %updated.id,
                        webhook_id = %subscriber.id,
                        status = code,
                        "Webhook delivered"
                    );
                } else {
                    self.warn_lost_claim(&updated);
                }
            }
            AttemptOutcome::Rejected { code, excerpt } => {
                updated.response_body_excerpt = excerpt;
                let status =
                    updated.mark_attempt_failed(format!("HTTP {code}"), Some(code), now);
                self.settle_failure(&snapshot, &updated, status, subscriber).await?;
            }
            AttemptOutcome::TransportFailed { error } => {
                updated.response_body_excerpt = None;
                let status = updated.mark_attempt_failed(error, None, now);
                self.settle_failure(&snapshot, &updated, status, subscriber).await?;
            }
        }

        Ok(updated)
    }

    /// Writes a failed attempt back and applies its consequences.
    async fn settle_failure(
        &self,
        snapshot: &Delivery,
        updated: &Delivery,
        status: DeliveryStatus,
        subscriber: &Subscriber,
    ) -> WebhookResult<()> {
        if !self.deliveries.write_back(snapshot, updated).await? {
            self.warn_lost_claim(updated);
            return Ok(());
        }

        match status {
            DeliveryStatus::Failed => {
                tracing::warn!(
                    delivery_id = %updated.id,
                    webhook_id = %subscriber.id,
                    attempts = updated.attempts,
                    error = updated.last_error.as_deref().unwrap_or("unknown"),
                    "Webhook delivery permanently failed"
                );
                self.stats.record_outcome(&subscriber.id, false).await?;
                self.escalate(updated, subscriber).await;
            }
            _ => {
                tracing::debug!(
                    delivery_id = %updated.id,
                    webhook_id = %subscriber.id,
                    attempt = updated.attempts,
                    next_attempt_at = %updated.next_attempt_at,
                    error = updated.last_error.as_deref().unwrap_or("unknown"),
                    "Webhook delivery failed, retry scheduled"
                );
            }
        }
        Ok(())
    }

    /// Closes out a claimed delivery whose subscriber is gone or disabled.
    async fn abandon(&self, claimed: Delivery, reason: &str) {
        let snapshot = claimed.clone();
        let mut updated = claimed;
        updated.mark_abandoned(reason);

        match self.deliveries.write_back(&snapshot, &updated).await {
            Ok(true) => {
                tracing::debug!(delivery_id = %updated.id, reason, "Abandoned delivery")
            }
            Ok(false) => self.warn_lost_claim(&updated),
            Err(e) => tracing::warn!(
                delivery_id = %updated.id,
                error = %e,
                "Failed to abandon delivery"
            ),
        }
    }

    /// Issues the signed HTTP POST for one attempt.
    async fn attempt(&self, delivery: &Delivery, subscriber: &Subscriber) -> AttemptOutcome {
        let body = delivery.payload.to_string();

        let mut request = self
            .client
            .post(&subscriber.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", self.config.user_agent())
            .header("X-Webhook-ID", &subscriber.id)
            .header("X-Delivery-ID", &delivery.id)
            .header("X-Signature", &delivery.signature)
            .header("X-Timestamp", delivery.payload_timestamp().to_string())
            .timeout(Duration::from_secs(delivery.timeout_secs));

        // Subscriber-configured headers go last so they can override ours.
        for (key, value) in &delivery.custom_headers {
            request = request.header(key, value);
        }

        match request.body(body).send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                let excerpt = body_excerpt(&text);
                if (200..300).contains(&code) {
                    AttemptOutcome::Delivered { code, excerpt }
                } else {
                    AttemptOutcome::Rejected { code, excerpt }
                }
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    format!("request timed out after {}s", delivery.timeout_secs)
                } else {
                    e.to_string()
                };
                AttemptOutcome::TransportFailed { error }
            }
        }
    }

    /// Notifies the platform that a delivery permanently failed.
    async fn escalate(&self, delivery: &Delivery, subscriber: &Subscriber) {
        let message = format!(
            "Delivery {} to webhook {} ({}) gave up after {} attempts: {}",
            delivery.id,
            subscriber.id,
            subscriber.url,
            delivery.attempts,
            delivery.last_error.as_deref().unwrap_or("unknown error"),
        );
        self.notifier
            .notify("Webhook delivery failed", &message, Severity::Error)
            .await;
    }

    fn warn_lost_claim(&self, updated: &Delivery) {
        tracing::warn!(
            delivery_id = %updated.id,
            "Claim lost before outcome write-back; discarding attempt result"
        );
    }
}
