//! Webhook subscriber configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default number of delivery attempts per event.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
/// Length in bytes of a generated secret (hex-encoded to twice this).
const SECRET_LEN: usize = 32;

/// A registered webhook subscriber.
///
/// The `secret` is fixed at registration time; updates cannot touch it, and
/// deliveries carry the signature computed with the secret that was current
/// when they were created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscriber {
    /// Unique identifier.
    pub id: String,
    /// Target URL.
    pub url: String,
    /// Subscribed event types. Empty means every event.
    pub events: HashSet<String>,
    /// Secret for signing payloads.
    pub secret: String,
    /// Whether events are currently delivered to this subscriber.
    pub enabled: bool,
    /// Maximum delivery attempts per event.
    pub retry_attempts: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Extra headers sent with every request, in registration order.
    pub custom_headers: Vec<(String, String)>,
    /// When the subscriber was registered.
    pub created_at: DateTime<Utc>,
    /// When a delivery outcome was last recorded.
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Number of deliveries that reached the endpoint.
    pub success_count: u64,
    /// Number of deliveries that exhausted their attempts.
    pub failure_count: u64,
}

impl Subscriber {
    /// Checks whether this subscriber wants the given event type.
    ///
    /// Matching is case-sensitive and exact; an empty set subscribes to
    /// everything.
    pub fn matches_event(&self, event_type: &str) -> bool {
        self.events.is_empty() || self.events.contains(event_type)
    }

    /// Generates a fresh signing secret (64 hex characters).
    pub fn generate_secret() -> String {
        use rand::RngCore;

        let mut bytes = [0u8; SECRET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

/// Input for registering a subscriber.
#[derive(Debug, Clone)]
pub struct NewSubscriber {
    /// Target URL.
    pub url: String,
    /// Subscribed event types. Empty means every event.
    pub events: HashSet<String>,
    /// Signing secret; generated when not supplied.
    pub secret: Option<String>,
    /// Whether the subscriber starts enabled.
    pub enabled: bool,
    /// Maximum delivery attempts per event.
    pub retry_attempts: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Extra headers sent with every request.
    pub custom_headers: Vec<(String, String)>,
}

impl NewSubscriber {
    /// Creates a registration for the given URL with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events: HashSet::new(),
            secret: None,
            enabled: true,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            custom_headers: Vec::new(),
        }
    }

    /// Subscribes to specific event types.
    pub fn events(mut self, events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.events = events.into_iter().map(|e| e.into()).collect();
        self
    }

    /// Supplies an explicit signing secret.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Sets the maximum delivery attempts.
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Sets the per-request timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((key.into(), value.into()));
        self
    }

    /// Registers the subscriber in a disabled state.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Whitelisted fields for updating a subscriber.
///
/// The secret, counters, and timestamps are deliberately absent; the type is
/// the whitelist.
#[derive(Debug, Clone, Default)]
pub struct SubscriberUpdate {
    /// New target URL.
    pub url: Option<String>,
    /// New event subscription set.
    pub events: Option<HashSet<String>>,
    /// New enablement state.
    pub enabled: Option<bool>,
    /// New maximum delivery attempts.
    pub retry_attempts: Option<u32>,
    /// New per-request timeout.
    pub timeout_secs: Option<u64>,
    /// New custom header set.
    pub custom_headers: Option<Vec<(String, String)>>,
}

impl SubscriberUpdate {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the event subscription set.
    pub fn events(mut self, events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.events = Some(events.into_iter().map(|e| e.into()).collect());
        self
    }

    /// Sets the enablement state.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Sets the maximum delivery attempts.
    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Sets the per-request timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Sets the custom header set.
    pub fn custom_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.custom_headers = Some(headers);
        self
    }
}
