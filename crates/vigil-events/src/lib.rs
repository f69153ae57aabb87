//! Vigil Events - best-effort notification channel for approval activity.
//!
//! The approval coordinator announces request creation and resolution
//! through a [`NotificationSink`]. Delivery is fire-and-forget and
//! at-most-once: a lost or failed publish is logged and dropped, it never
//! blocks or fails the state transition that produced it. Downstream
//! real-time transports (push channels, message queues) subscribe to a
//! [`NotificationBus`] and handle their own fan-out.
//!
//! # Example
//!
//! ```rust
//! use vigil_events::{ApprovalNotification, NotificationBus, NotificationSink};
//! use uuid::Uuid;
//!
//! # async fn example() {
//! let bus = NotificationBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(&ApprovalNotification::Created {
//!     request_id: Uuid::new_v4(),
//!     approval_type: "financial".to_string(),
//!     risk_level: "high".to_string(),
//!     payload_summary: "{\"amount\":500}".to_string(),
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.kind(), "approval_created");
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod event;
mod sink;

pub use event::ApprovalNotification;
pub use sink::{
    DEFAULT_CHANNEL_CAPACITY, NotificationBus, NotificationReceiver, NotificationSink, NullSink,
};
