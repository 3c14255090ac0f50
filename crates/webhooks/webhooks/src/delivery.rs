//! Delivery records and the retry state machine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use careline_events::Event;

use crate::error::WebhookResult;
use crate::signature;
use crate::subscriber::Subscriber;

/// Longest kept portion of a response body, in characters.
pub const RESPONSE_EXCERPT_LEN: usize = 256;

/// Returns the delay before the next attempt after `attempt` failures.
///
/// Exponential, capped at one hour: `min(2^n * 60, 3600)` seconds.
pub fn backoff(attempt: u32) -> Duration {
    let secs = 2_i64
        .checked_pow(attempt)
        .map(|factor| factor.saturating_mul(60))
        .unwrap_or(i64::MAX)
        .min(3600);
    Duration::seconds(secs)
}

/// Status of a delivery record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting for its first attempt.
    Pending,
    /// Claimed by a worker; the lease expiry bounds how long the claim holds.
    InProgress,
    /// Failed at least once, waiting for the next attempt.
    Retry,
    /// Delivered. Terminal.
    Sent,
    /// Attempts exhausted. Terminal.
    Failed,
}

impl DeliveryStatus {
    /// Whether the record can never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Failed)
    }
}

/// One attempt-tracking record pairing a subscriber with a fired event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    /// Unique identifier.
    pub id: String,
    /// The subscriber this delivery targets.
    pub subscriber_id: String,
    /// The full event envelope, as it will appear on the wire.
    pub payload: Value,
    /// Signature over the serialized payload, computed at creation with the
    /// subscriber's secret at that time.
    pub signature: String,
    /// Current status.
    pub status: DeliveryStatus,
    /// Attempts made so far.
    pub attempts: u32,
    /// Maximum attempts, copied from the subscriber at creation.
    pub max_attempts: u32,
    /// Per-request timeout in seconds, copied from the subscriber.
    pub timeout_secs: u64,
    /// Custom headers, copied from the subscriber.
    pub custom_headers: Vec<(String, String)>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the next attempt is due. Meaningful only for `Pending`/`Retry`.
    pub next_attempt_at: DateTime<Utc>,
    /// When the current claim lapses. Set only while `InProgress`.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Message from the most recent failed attempt.
    pub last_error: Option<String>,
    /// HTTP status of the most recent response, if one was received.
    pub response_code: Option<u16>,
    /// Truncated body of the most recent response.
    pub response_body_excerpt: Option<String>,
}

impl Delivery {
    /// Creates a pending delivery for an event fired at a subscriber.
    ///
    /// The payload is serialized and signed with the subscriber's secret as
    /// of this moment; the stored signature never changes afterwards.
    pub fn new(subscriber: &Subscriber, event: &Event) -> WebhookResult<Self> {
        let payload = serde_json::to_value(event)?;
        let signature = signature::sign(&payload, &subscriber.secret);
        let now = Utc::now();

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscriber_id: subscriber.id.clone(),
            payload,
            signature,
            status: DeliveryStatus::Pending,
            attempts: 0,
            max_attempts: subscriber.retry_attempts,
            timeout_secs: subscriber.timeout_secs,
            custom_headers: subscriber.custom_headers.clone(),
            created_at: now,
            next_attempt_at: now,
            lease_expires_at: None,
            last_error: None,
            response_code: None,
            response_body_excerpt: None,
        })
    }

    /// The event type carried in the payload.
    pub fn event_type(&self) -> &str {
        self.payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }

    /// The unix timestamp carried in the payload.
    pub fn payload_timestamp(&self) -> i64 {
        self.payload
            .get("timestamp")
            .and_then(Value::as_i64)
            .unwrap_or_else(|| self.created_at.timestamp())
    }

    /// Whether this record is due for an attempt at `now`.
    ///
    /// Covers `Pending`/`Retry` records whose schedule has arrived, and
    /// `InProgress` records whose claim lapsed without an outcome being
    /// written back (the worker died mid-attempt).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            DeliveryStatus::Pending | DeliveryStatus::Retry => self.next_attempt_at <= now,
            DeliveryStatus::InProgress => self.lease_expires_at.is_some_and(|at| at <= now),
            DeliveryStatus::Sent | DeliveryStatus::Failed => false,
        }
    }

    /// Transitions into the claimed state.
    pub(crate) fn claimed(mut self, lease: Duration, now: DateTime<Utc>) -> Self {
        self.status = DeliveryStatus::InProgress;
        self.lease_expires_at = Some(now + lease);
        self
    }

    /// Records a successful attempt. Terminal.
    pub(crate) fn mark_sent(&mut self, response_code: u16, body_excerpt: Option<String>) {
        self.status = DeliveryStatus::Sent;
        self.lease_expires_at = None;
        self.response_code = Some(response_code);
        self.response_body_excerpt = body_excerpt;
        self.last_error = None;
    }

    /// Fails the record without an attempt having been made.
    ///
    /// Used when the subscriber vanished or was disabled after queuing; the
    /// record is closed out but nothing is counted or escalated.
    pub(crate) fn mark_abandoned(&mut self, reason: impl Into<String>) {
        self.status = DeliveryStatus::Failed;
        self.lease_expires_at = None;
        self.last_error = Some(reason.into());
    }

    /// Records a failed attempt.
    ///
    /// Moves to `Failed` once attempts are exhausted, otherwise schedules a
    /// retry with exponential backoff. Returns the resulting status.
    pub(crate) fn mark_attempt_failed(
        &mut self,
        error: impl Into<String>,
        response_code: Option<u16>,
        now: DateTime<Utc>,
    ) -> DeliveryStatus {
        self.last_error = Some(error.into());
        self.response_code = response_code;
        self.lease_expires_at = None;

        if self.attempts >= self.max_attempts {
            self.status = DeliveryStatus::Failed;
        } else {
            self.status = DeliveryStatus::Retry;
            self.next_attempt_at = now + backoff(self.attempts);
        }
        self.status
    }
}

/// Truncates a response body to the kept excerpt length.
pub(crate) fn body_excerpt(body: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    Some(body.chars().take(RESPONSE_EXCERPT_LEN).collect())
}
