//! UI feedback sink.
//!
//! The engine announces difficulty changes, quiz completion and user-visible
//! errors here. It never renders anything itself.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// A user-facing notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub title: String,
    pub description: String,
    pub severity: FeedbackSeverity,
}

impl Feedback {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        severity: FeedbackSeverity,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, FeedbackSeverity::Error)
    }
}

/// Receiver of user-facing notifications.
pub trait FeedbackSink: Send + Sync {
    fn notify(&self, feedback: Feedback);
}

/// Sink that writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFeedback;

impl FeedbackSink for TracingFeedback {
    fn notify(&self, feedback: Feedback) {
        match feedback.severity {
            FeedbackSeverity::Error => {
                error!(title = %feedback.title, "{}", feedback.description)
            }
            FeedbackSeverity::Warning => {
                warn!(title = %feedback.title, "{}", feedback.description)
            }
            FeedbackSeverity::Info | FeedbackSeverity::Success => {
                info!(title = %feedback.title, "{}", feedback.description)
            }
        }
    }
}

/// Sink that fans notifications out to subscribers.
#[derive(Debug)]
pub struct BroadcastFeedback {
    tx: broadcast::Sender<Feedback>,
}

impl BroadcastFeedback {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Feedback> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastFeedback {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackSink for BroadcastFeedback {
    fn notify(&self, feedback: Feedback) {
        // Ignore send errors (no subscribers)
        let _ = self.tx.send(feedback);
    }
}
