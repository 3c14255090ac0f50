//! # Careline Webhooks
//!
//! Outbound webhook delivery engine for Careline:
//! - Subscriber registration with per-endpoint secrets and event filters
//! - At-least-once delivery with bounded retries and exponential backoff
//! - HMAC-SHA256 payload signing
//! - CAS-based claims so overlapping queue passes never double-attempt
//! - Per-subscriber and global delivery statistics
//! - Escalation to the platform's notification channel on permanent failure
//!
//! ## Example
//!
//! ```rust,ignore
//! use careline_webhooks::{EngineConfig, LogNotifier, NewSubscriber, WebhookEngine};
//! use careline_events::EventSource;
//! use careline_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let engine = WebhookEngine::new(
//!     MemoryStore::shared(),
//!     Arc::new(LogNotifier),
//!     EngineConfig::new(EventSource::new("Careline", "2.4.1", "production")),
//! );
//!
//! // Register an endpoint
//! let subscriber = engine
//!     .register_webhook(NewSubscriber::new("https://example.com/hook").events(["complaint.created"]))
//!     .await?;
//!
//! // Fire an event; a periodic trigger drains retries via process_queue()
//! engine.fire_event("complaint.created", data, context).await;
//! ```

mod delivery;
mod engine;
mod error;
mod notify;
mod registry;
pub mod signature;
mod stats;
mod store;
mod subscriber;

#[cfg(feature = "http-client")]
mod processor;

pub use delivery::{Delivery, DeliveryStatus, RESPONSE_EXCERPT_LEN, backoff};
pub use engine::{EngineConfig, WebhookEngine};
pub use error::{WebhookError, WebhookResult};
pub use notify::{LogNotifier, Notifier, Severity};
pub use registry::SubscriberRegistry;
pub use stats::{StatsTracker, WebhookStats};
pub use store::DeliveryStore;
pub use subscriber::{
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_TIMEOUT_SECS, NewSubscriber, Subscriber, SubscriberUpdate,
};

#[cfg(feature = "http-client")]
pub use processor::DeliveryProcessor;
