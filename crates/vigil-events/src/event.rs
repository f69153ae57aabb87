//! Notification event shapes.
//!
//! These carry strings rather than the coordinator's enums so that
//! transports can forward them without depending on approval internals.
//! The coordinator renders its enums into their wire form at publish time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A notification emitted by the approval coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ApprovalNotification {
    /// A request entered the pending queue and awaits a human decision.
    ///
    /// Not emitted for auto-approved requests; there is nothing for a
    /// human to act on.
    #[serde(rename = "approval_created")]
    Created {
        /// The request awaiting approval.
        request_id: Uuid,
        /// Wire form of the approval type (e.g. `"financial"`).
        approval_type: String,
        /// Wire form of the risk level (e.g. `"high"`).
        risk_level: String,
        /// Truncated rendering of the payload for display surfaces.
        payload_summary: String,
    },

    /// A pending request reached a terminal status.
    #[serde(rename = "approval_resolved")]
    Resolved {
        /// The resolved request.
        request_id: Uuid,
        /// Terminal status (`"approved"`, `"rejected"`, `"expired"`,
        /// `"cancelled"`).
        status: String,
        /// Who resolved it; `None` for expiry and cancellation.
        approver_id: Option<String>,
    },
}

impl ApprovalNotification {
    /// Stable event-kind string, useful for routing and logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "approval_created",
            Self::Resolved { .. } => "approval_resolved",
        }
    }

    /// The request this notification concerns.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        match self {
            Self::Created { request_id, .. } | Self::Resolved { request_id, .. } => *request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_request_id() {
        let id = Uuid::new_v4();
        let created = ApprovalNotification::Created {
            request_id: id,
            approval_type: "financial".to_string(),
            risk_level: "high".to_string(),
            payload_summary: "{}".to_string(),
        };
        assert_eq!(created.kind(), "approval_created");
        assert_eq!(created.request_id(), id);
    }

    #[test]
    fn test_serialization_tags() {
        let event = ApprovalNotification::Resolved {
            request_id: Uuid::new_v4(),
            status: "approved".to_string(),
            approver_id: Some("alice".to_string()),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"approval_resolved\""));
        assert!(json.contains("\"status\":\"approved\""));

        let back: ApprovalNotification = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "approval_resolved");
    }
}
