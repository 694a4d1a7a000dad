//! Terminal-event notifications.
//!
//! The core emits one [`TerminalEvent`] per finished run. Delivery is
//! fire-and-forget: [`Notifier::notify`] is synchronous and must never block
//! or fail the caller.

use crate::content::{ContentId, RunStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Final state of one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalEvent {
    /// Item the run produced.
    pub content_id: ContentId,
    /// Terminal status.
    pub status: RunStatus,
    /// Overall score, when the run got that far.
    pub score: Option<f64>,
}

/// Receives terminal events.
pub trait Notifier: Send + Sync {
    /// Hand off `event`. Must return immediately.
    fn notify(&self, event: TerminalEvent);
}

/// Logs each event at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: TerminalEvent) {
        info!(
            content_id = %event.content_id,
            status = %event.status,
            score = ?event.score,
            "run finished"
        );
    }
}

/// Forwards events into a bounded channel, shedding when it is full.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<TerminalEvent>,
}

impl ChannelNotifier {
    /// Notifier plus the receiver a delivery task drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TerminalEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: TerminalEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(content_id = %event.content_id, "notification queue full, shedding event");
                crate::metrics::inc_notification_shed();
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(content_id = %event.content_id, "notification receiver gone");
            }
        }
    }
}
