//! Outbound loyalty events for the notification dispatcher.
//!
//! Emission is fire-and-forget: it happens after the owning transaction has
//! committed, never blocks and never reports failure to the caller.

use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoyaltyEvent {
    PointsEarned {
        user_id: String,
        venue_id: String,
        points: i64,
        is_bonus: bool,
    },
    PointsExpiringSoon {
        user_id: String,
        venue_id: String,
        points: i64,
        nearest_expiry: NaiveDateTime,
    },
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel is closed")]
    Closed,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: LoyaltyEvent) -> Result<(), NotifyError>;
}

/// Hands events to the dispatcher task over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<LoyaltyEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LoyaltyEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: LoyaltyEvent) -> Result<(), NotifyError> {
        self.sender.send(event).map_err(|_| NotifyError::Closed)
    }
}

/// Emits an event, logging and swallowing any failure.
pub fn emit(notifier: &dyn Notifier, event: LoyaltyEvent) {
    if let Err(e) = notifier.notify(event.clone()) {
        warn!(error = %e, ?event, "dropping loyalty notification");
    }
}
