//! # Careline Events
//!
//! Event envelope for Careline. An [`Event`] is a named, immutable fact the
//! platform produces (a complaint was filed, a login failed, a backup
//! finished). Events are never persisted on their own; consumers embed them
//! into their own records, and the serialized envelope is exactly the JSON
//! body external receivers see.
//!
//! ## Example
//!
//! ```rust,ignore
//! use careline_events::{Event, EventSource, platform_events};
//!
//! let source = EventSource::new("Careline", "2.4.1", "production");
//! let event = Event::new(platform_events::COMPLAINT_CREATED, source)
//!     .with_data(serde_json::json!({ "complaint_id": "C-1042" }))
//!     .with_context(serde_json::json!({ "actor": "intake-form" }));
//! ```

mod event;

pub use event::{Event, EventSource};

/// Standard Careline event type constants.
pub mod platform_events {
    /// Event emitted when a complaint is filed through the intake form.
    pub const COMPLAINT_CREATED: &str = "complaint.created";
    /// Event emitted when a complaint moves to a new status.
    pub const COMPLAINT_STATUS_CHANGED: &str = "complaint.status_changed";
    /// Event emitted when a complaint is assigned to a handler.
    pub const COMPLAINT_ASSIGNED: &str = "complaint.assigned";
    /// Event emitted when a sign-in attempt is rejected.
    pub const AUTH_LOGIN_FAILED: &str = "auth.login_failed";
    /// Event emitted when a scheduled backup finishes.
    pub const BACKUP_COMPLETED: &str = "backup.completed";
    /// Synthetic event used to exercise a webhook endpoint.
    pub const WEBHOOK_TEST: &str = "webhook.test";
}
