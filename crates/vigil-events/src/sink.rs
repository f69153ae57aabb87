//! Notification sink trait and the broadcast-backed bus.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::event::ApprovalNotification;

/// Default channel capacity for the notification bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Fire-and-forget publisher of approval notifications.
///
/// Implementations must never block the caller and must swallow delivery
/// failures; the state transition that produced the notification has
/// already committed.
pub trait NotificationSink: Send + Sync {
    /// Publish a notification. Best-effort, at-most-once.
    fn publish(&self, notification: &ApprovalNotification);
}

/// A sink that drops everything. For deployments without a real-time
/// channel, and for tests that do not assert on notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn publish(&self, notification: &ApprovalNotification) {
        trace!(kind = notification.kind(), "dropping notification (null sink)");
    }
}

/// Broadcast-based notification bus.
///
/// Publishes to all connected receivers. A receiver that falls behind the
/// channel capacity loses the oldest events; this matches the at-most-once
/// contract, the pending queue in the store remains the source of truth.
#[derive(Debug)]
pub struct NotificationBus {
    sender: broadcast::Sender<Arc<ApprovalNotification>>,
}

impl NotificationBus {
    /// Create a bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with the given channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future notifications.
    #[must_use]
    pub fn subscribe(&self) -> NotificationReceiver {
        NotificationReceiver {
            inner: self.sender.subscribe(),
        }
    }

    /// Number of connected receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for NotificationBus {
    fn publish(&self, notification: &ApprovalNotification) {
        match self.sender.send(Arc::new(notification.clone())) {
            Ok(count) => debug!(
                kind = notification.kind(),
                request_id = %notification.request_id(),
                receivers = count,
                "notification published"
            ),
            // No receivers connected; nothing to deliver.
            Err(_) => trace!(
                kind = notification.kind(),
                "no receivers for notification"
            ),
        }
    }
}

/// Receiving end of a [`NotificationBus`] subscription.
#[derive(Debug)]
pub struct NotificationReceiver {
    inner: broadcast::Receiver<Arc<ApprovalNotification>>,
}

impl NotificationReceiver {
    /// Wait for the next notification.
    ///
    /// Returns `None` when the bus is dropped. Lagged receivers skip the
    /// lost events and continue from the oldest retained one.
    pub async fn recv(&mut self) -> Option<Arc<ApprovalNotification>> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "notification receiver lagged");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` if no notification is ready.
    pub fn try_recv(&mut self) -> Option<Arc<ApprovalNotification>> {
        loop {
            match self.inner.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    debug!(missed, "notification receiver lagged");
                },
                Err(_) => return None,
            }
        }
    }
}
