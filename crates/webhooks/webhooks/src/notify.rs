//! Failure escalation to the platform's notification channel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How urgent a notification is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Info,
    /// Needs attention soon.
    Warning,
    /// Needs attention now.
    Error,
}

/// Trait for the platform's notification channel.
///
/// The engine escalates through this when a delivery permanently fails.
/// Implementations deliver to whatever the installation uses: an email
/// digest, an on-call pager, an admin inbox.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one notification.
    async fn notify(&self, title: &str, message: &str, severity: Severity);
}

/// Notifier that writes to the log.
///
/// The default when an installation has no notification channel wired up;
/// permanent failures still leave a trace.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, message: &str, severity: Severity) {
        match severity {
            Severity::Info => tracing::info!(title, "{message}"),
            Severity::Warning => tracing::warn!(title, "{message}"),
            Severity::Error => tracing::error!(title, "{message}"),
        }
    }
}
