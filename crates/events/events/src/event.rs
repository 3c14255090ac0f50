//! Event types and structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event produced by the platform.
///
/// The serialized form of this struct is the wire envelope delivered to
/// external receivers: `event` is the dotted type string, `timestamp` is
/// unix seconds, and `source` identifies the emitting installation. An event
/// is immutable once fired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// The event type (dotted taxonomy, e.g. "complaint.created").
    #[serde(rename = "event")]
    pub event_type: String,
    /// When the event was fired.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    pub data: Value,
    /// Metadata about the circumstances of the event.
    pub context: Value,
    /// The emitting application.
    pub source: EventSource,
}

impl Event {
    /// Creates a new event with the given type and source, fired now.
    pub fn new(event_type: impl Into<String>, source: EventSource) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data: Value::Null,
            context: Value::Null,
            source,
        }
    }

    /// Sets the event payload.
    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_value(data).unwrap_or(Value::Null);
        self
    }

    /// Sets the event context.
    pub fn with_context(mut self, context: impl Serialize) -> Self {
        self.context = serde_json::to_value(context).unwrap_or(Value::Null);
        self
    }

    /// Deserializes the payload to a specific type.
    pub fn data_as<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// The application that emitted an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventSource {
    /// Application name (e.g. "Careline").
    pub application: String,
    /// Application version.
    pub version: String,
    /// Deployment environment (e.g. "production").
    pub environment: String,
}

impl EventSource {
    /// Creates a new event source.
    pub fn new(
        application: impl Into<String>,
        version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            application: application.into(),
            version: version.into(),
            environment: environment.into(),
        }
    }
}
