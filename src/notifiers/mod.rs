use async_trait::async_trait;
use serde::Serialize;

use crate::models::ListingEvent;
use crate::Result;

pub mod email;

pub use email::{EmailDigest, EmailNotifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotificationOutcome {
    /// Nothing worth reporting; no message was sent.
    Skipped,
    Sent { recipients: usize },
}

/// Delivers one cycle's events to people.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    /// Sends a single digest for the given events. An empty slice sends
    /// nothing and returns `Skipped`.
    async fn notify(&self, events: &[ListingEvent]) -> Result<NotificationOutcome>;

    async fn test_connection(&self) -> Result<bool>;
}
