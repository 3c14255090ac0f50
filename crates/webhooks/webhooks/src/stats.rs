//! Delivery statistics.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use careline_store::KeyValueStore;

use crate::error::{WebhookError, WebhookResult};
use crate::registry::SubscriberRegistry;
use crate::store::{CAS_MAX_RETRIES, keys};

/// Success/failure counts for one subscriber or the whole installation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookStats {
    /// Deliveries that reached their endpoint.
    pub success_count: u64,
    /// Deliveries that exhausted their attempts.
    pub failure_count: u64,
}

impl WebhookStats {
    /// Fraction of recorded outcomes that succeeded; 0.0 with no outcomes.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64
    }
}

/// Records delivery outcomes against subscribers and the global counters.
#[derive(Clone)]
pub struct StatsTracker {
    store: Arc<dyn KeyValueStore>,
    registry: SubscriberRegistry,
}

impl StatsTracker {
    /// Creates a tracker over the given substrate.
    pub fn new(store: Arc<dyn KeyValueStore>, registry: SubscriberRegistry) -> Self {
        Self { store, registry }
    }

    /// Records one delivery outcome.
    ///
    /// Updates the subscriber's counters and `last_sent_at`, then the global
    /// counters. Success is recorded when a delivery is sent; failure only
    /// when it permanently fails.
    pub async fn record_outcome(&self, subscriber_id: &str, success: bool) -> WebhookResult<()> {
        let now = Utc::now();
        self.registry
            .record_outcome(subscriber_id, success, now)
            .await?;

        for _ in 0..CAS_MAX_RETRIES {
            let current = self.store.get(keys::STATS).await?;
            let mut stats: WebhookStats = match &current {
                Some(value) => serde_json::from_value(value.clone())?,
                None => WebhookStats::default(),
            };

            if success {
                stats.success_count += 1;
            } else {
                stats.failure_count += 1;
            }

            let new = serde_json::to_value(stats)?;
            if self
                .store
                .compare_and_swap(keys::STATS, current.as_ref(), new)
                .await?
            {
                return Ok(());
            }
        }
        Err(WebhookError::Conflict(keys::STATS.to_string()))
    }

    /// Stats for one subscriber.
    pub async fn stats_for(&self, subscriber_id: &str) -> WebhookResult<WebhookStats> {
        let subscriber = self
            .registry
            .get(subscriber_id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(subscriber_id.to_string()))?;
        Ok(WebhookStats {
            success_count: subscriber.success_count,
            failure_count: subscriber.failure_count,
        })
    }

    /// Aggregate stats across all subscribers, past and deleted included.
    pub async fn global(&self) -> WebhookResult<WebhookStats> {
        match self.store.get(keys::STATS).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(WebhookStats::default()),
        }
    }
}
