//! Persistence layout over the key-value substrate.
//!
//! Every record lives under its own key; index lists hold the known ids so
//! collections can be scanned without the backend supporting key iteration.
//! Index and counter updates go through bounded compare-and-swap loops, and
//! delivery claiming is a single CAS on the record itself, which is what
//! keeps concurrent `process_queue` invocations from double-attempting.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use careline_store::KeyValueStore;

use crate::delivery::{Delivery, DeliveryStatus};
use crate::error::{WebhookError, WebhookResult};

/// Attempts before a contended read-modify-write loop gives up.
pub(crate) const CAS_MAX_RETRIES: usize = 16;

/// Key layout.
pub(crate) mod keys {
    /// List of registered subscriber ids.
    pub const WEBHOOK_INDEX: &str = "webhook:index";
    /// List of known delivery ids.
    pub const DELIVERY_INDEX: &str = "delivery:index";
    /// Global success/failure counters.
    pub const STATS: &str = "webhook:stats";

    /// Key of one subscriber record.
    pub fn webhook(id: &str) -> String {
        format!("webhook:{id}")
    }

    /// Key of one delivery record.
    pub fn delivery(id: &str) -> String {
        format!("delivery:{id}")
    }
}

/// Applies `apply` to the id list under `key` with CAS retries.
///
/// `apply` returns `None` when the list already has the desired shape, which
/// ends the loop without a write.
pub(crate) async fn update_index<F>(
    store: &dyn KeyValueStore,
    key: &str,
    mut apply: F,
) -> WebhookResult<()>
where
    F: FnMut(Vec<String>) -> Option<Vec<String>>,
{
    for _ in 0..CAS_MAX_RETRIES {
        let current = store.get(key).await?;
        let ids: Vec<String> = match &current {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Vec::new(),
        };

        let Some(updated) = apply(ids) else {
            return Ok(());
        };

        let new = serde_json::to_value(updated)?;
        if store.compare_and_swap(key, current.as_ref(), new).await? {
            return Ok(());
        }
    }
    Err(WebhookError::Conflict(key.to_string()))
}

/// Reads the id list under `key`.
pub(crate) async fn read_index(store: &dyn KeyValueStore, key: &str) -> WebhookResult<Vec<String>> {
    match store.get(key).await? {
        Some(value) => Ok(serde_json::from_value(value)?),
        None => Ok(Vec::new()),
    }
}

/// CRUD and claiming over delivery records.
#[derive(Clone)]
pub struct DeliveryStore {
    store: Arc<dyn KeyValueStore>,
}

impl DeliveryStore {
    /// Creates a delivery store over the given substrate.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persists a new delivery record and indexes it.
    pub async fn insert(&self, delivery: &Delivery) -> WebhookResult<()> {
        let value = serde_json::to_value(delivery)?;
        let key = keys::delivery(&delivery.id);
        if !self.store.compare_and_swap(&key, None, value).await? {
            return Err(WebhookError::Conflict(key));
        }

        let id = delivery.id.clone();
        update_index(self.store.as_ref(), keys::DELIVERY_INDEX, move |mut ids| {
            if ids.iter().any(|known| known == &id) {
                return None;
            }
            ids.push(id.clone());
            Some(ids)
        })
        .await
    }

    /// Gets a delivery by id.
    pub async fn get(&self, id: &str) -> WebhookResult<Option<Delivery>> {
        match self.store.get(&keys::delivery(id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Lists all known deliveries.
    ///
    /// Ids whose record has been purged since the index was read are
    /// skipped.
    pub async fn list(&self) -> WebhookResult<Vec<Delivery>> {
        let ids = read_index(self.store.as_ref(), keys::DELIVERY_INDEX).await?;
        let mut deliveries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(delivery) = self.get(&id).await? {
                deliveries.push(delivery);
            }
        }
        Ok(deliveries)
    }

    /// Lists deliveries targeting one subscriber.
    pub async fn list_for_subscriber(&self, subscriber_id: &str) -> WebhookResult<Vec<Delivery>> {
        let mut deliveries = self.list().await?;
        deliveries.retain(|d| d.subscriber_id == subscriber_id);
        Ok(deliveries)
    }

    /// Counts deliveries waiting in the queue (`Pending` or `Retry`).
    pub async fn queued_count(&self) -> WebhookResult<usize> {
        Ok(self
            .list()
            .await?
            .iter()
            .filter(|d| matches!(d.status, DeliveryStatus::Pending | DeliveryStatus::Retry))
            .count())
    }

    /// Tries to claim one observed delivery via CAS.
    ///
    /// Returns the claimed record when this caller won, `None` when another
    /// worker got there first (or the record changed underneath us).
    pub async fn try_claim(
        &self,
        observed: &Delivery,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> WebhookResult<Option<Delivery>> {
        let claimed = observed.clone().claimed(lease, now);
        let old = serde_json::to_value(observed)?;
        let new = serde_json::to_value(&claimed)?;
        let won = self
            .store
            .compare_and_swap(&keys::delivery(&observed.id), Some(&old), new)
            .await?;
        Ok(won.then_some(claimed))
    }

    /// Claims up to `limit` due deliveries, earliest due first.
    ///
    /// Due means `Pending`/`Retry` whose schedule has arrived, plus
    /// `InProgress` whose lease expired without a written outcome.
    pub async fn claim_due(
        &self,
        limit: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> WebhookResult<Vec<Delivery>> {
        let mut due: Vec<Delivery> = self
            .list()
            .await?
            .into_iter()
            .filter(|d| d.is_due(now))
            .collect();
        due.sort_by_key(|d| d.next_attempt_at);

        let mut claimed = Vec::new();
        for delivery in due {
            if claimed.len() >= limit {
                break;
            }
            if let Some(won) = self.try_claim(&delivery, lease, now).await? {
                claimed.push(won);
            }
        }
        Ok(claimed)
    }

    /// Writes the outcome of a claimed attempt back, via CAS from the
    /// claimed snapshot.
    ///
    /// Returns `false` when the claim was lost in the meantime (the lease
    /// expired and another worker reclaimed the record); the caller must
    /// then discard its outcome rather than clobber the new owner's state.
    pub async fn write_back(&self, claimed: &Delivery, updated: &Delivery) -> WebhookResult<bool> {
        let old = serde_json::to_value(claimed)?;
        let new = serde_json::to_value(updated)?;
        self.store
            .compare_and_swap(&keys::delivery(&claimed.id), Some(&old), new)
            .await
            .map_err(WebhookError::from)
    }

    /// Moves a waiting delivery's next attempt to `when`.
    ///
    /// Lets an operator force an early redelivery. Only `Pending`/`Retry`
    /// records can be rescheduled.
    pub async fn reschedule(&self, id: &str, when: DateTime<Utc>) -> WebhookResult<Delivery> {
        let key = keys::delivery(id);
        for _ in 0..CAS_MAX_RETRIES {
            let Some(current) = self.store.get(&key).await? else {
                return Err(WebhookError::NotFound(id.to_string()));
            };
            let mut delivery: Delivery = serde_json::from_value(current.clone())?;
            if !matches!(
                delivery.status,
                DeliveryStatus::Pending | DeliveryStatus::Retry
            ) {
                return Err(WebhookError::Validation(format!(
                    "delivery {id} is not waiting for an attempt"
                )));
            }

            delivery.next_attempt_at = when;
            let new = serde_json::to_value(&delivery)?;
            if self
                .store
                .compare_and_swap(&key, Some(&current), new)
                .await?
            {
                return Ok(delivery);
            }
        }
        Err(WebhookError::Conflict(key))
    }

    /// Drops terminal records older than `retention`.
    ///
    /// `Pending`/`Retry` (and claimed) records are kept regardless of age.
    /// Returns how many records were removed.
    pub async fn purge_terminal(&self, retention: Duration) -> WebhookResult<usize> {
        let cutoff = Utc::now() - retention;
        let stale: Vec<String> = self
            .list()
            .await?
            .into_iter()
            .filter(|d| d.status.is_terminal() && d.created_at < cutoff)
            .map(|d| d.id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        for id in &stale {
            self.store.delete(&keys::delivery(id)).await?;
        }

        let dropped: Vec<String> = stale.clone();
        update_index(self.store.as_ref(), keys::DELIVERY_INDEX, move |mut ids| {
            let before = ids.len();
            ids.retain(|id| !dropped.contains(id));
            (ids.len() != before).then_some(ids)
        })
        .await?;

        Ok(stale.len())
    }
}
