//! Approval request types: classification, risk levels, lifecycle status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Create a new random request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req:{}", self.0)
    }
}

/// What kind of action is asking for sign-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    /// Money moves.
    Financial,
    /// A model output drives a consequential decision.
    MlDecision,
    /// Access to sensitive data.
    DataAccess,
    /// A workflow takes a branch with side effects.
    WorkflowBranch,
    /// An autonomous agent action.
    AgentAction,
    /// A call to an external API.
    ExternalApi,
    /// Generated content leaves the system.
    ContentGeneration,
}

impl ApprovalType {
    /// Wire form of the type, matching its serde rendering.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::MlDecision => "ml_decision",
            Self::DataAccess => "data_access",
            Self::WorkflowBranch => "workflow_branch",
            Self::AgentAction => "agent_action",
            Self::ExternalApi => "external_api",
            Self::ContentGeneration => "content_generation",
        }
    }
}

impl fmt::Display for ApprovalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification computed from a score via configured cutoffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Routine; eligible for auto-approval.
    Low,
    /// Needs a look unless policy says otherwise.
    Medium,
    /// Needs a look unless policy says otherwise.
    High,
    /// Always goes to a human.
    Critical,
}

impl RiskLevel {
    /// Wire form of the level, matching its serde rendering.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an approval request.
///
/// Transitions only along `pending -> {approved, rejected, expired,
/// cancelled}`, or born directly as `auto_approved`. Every status except
/// `pending` is terminal and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Approved by policy at submit time; no human involved.
    AutoApproved,
    /// Parked, awaiting a human decision or expiry.
    Pending,
    /// A human approved it.
    Approved,
    /// A human rejected it.
    Rejected,
    /// The TTL elapsed before anyone decided.
    Expired,
    /// The caller withdrew it.
    Cancelled,
}

impl ApprovalStatus {
    /// Whether this status is terminal (immutable).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Wire form of the status, matching its serde rendering.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoApproved => "auto_approved",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request for sign-off on a risky action.
///
/// The `payload` is opaque to the coordinator: whatever structured
/// context the approver needs to make the call. `modifications` is an
/// optional structured override the approver supplies at approval time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique request identifier.
    pub id: RequestId,
    /// What kind of action this is.
    pub approval_type: ApprovalType,
    /// Raw risk score in `[0, 1]` supplied by the caller.
    pub risk_score: f64,
    /// Level computed from the score via configured cutoffs.
    pub risk_level: RiskLevel,
    /// Current lifecycle status.
    pub status: ApprovalStatus,
    /// Opaque action description/context for the approver.
    pub payload: serde_json::Value,
    /// Who asked.
    pub requested_by: String,
    /// Who decided; `None` until resolved (and for expiry/cancellation).
    pub approver_id: Option<String>,
    /// Free-form reviewer notes supplied at resolution.
    pub notes: Option<String>,
    /// Structured override supplied at approval time.
    pub modifications: Option<serde_json::Value>,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// TTL deadline; `None` for requests born terminal.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the request reached a terminal state; `None` while pending.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    /// Whether the request still awaits a decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Whether the TTL deadline has passed.
    #[must_use]
    pub fn is_expired_by(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Compact payload rendering for notifications, truncated to
    /// `max_chars` on a character boundary.
    #[must_use]
    pub fn payload_summary(&self, max_chars: usize) -> String {
        let rendered = self.payload.to_string();
        if rendered.chars().count() <= max_chars {
            return rendered;
        }
        rendered.chars().take(max_chars).collect()
    }
}

impl fmt::Display for ApprovalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} {}] {}",
            self.id, self.approval_type, self.risk_level, self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_unique_and_display() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("req:"));
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        for status in [
            ApprovalStatus::AutoApproved,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::Expired,
            ApprovalStatus::Cancelled,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
    }

    #[test]
    fn test_wire_forms_match_serde() {
        let json = serde_json::to_string(&ApprovalType::MlDecision).unwrap();
        assert_eq!(json, format!("\"{}\"", ApprovalType::MlDecision.as_str()));

        let json = serde_json::to_string(&ApprovalStatus::AutoApproved).unwrap();
        assert_eq!(json, format!("\"{}\"", ApprovalStatus::AutoApproved.as_str()));

        let json = serde_json::to_string(&RiskLevel::Critical).unwrap();
        assert_eq!(json, format!("\"{}\"", RiskLevel::Critical.as_str()));
    }

    #[test]
    fn test_payload_summary_truncation() {
        let request = ApprovalRequest {
            id: RequestId::new(),
            approval_type: ApprovalType::AgentAction,
            risk_score: 0.5,
            risk_level: RiskLevel::Medium,
            status: ApprovalStatus::Pending,
            payload: json!({"description": "a".repeat(500)}),
            requested_by: "svc".to_string(),
            approver_id: None,
            notes: None,
            modifications: None,
            created_at: Utc::now(),
            expires_at: None,
            resolved_at: None,
        };
        let summary = request.payload_summary(100);
        assert_eq!(summary.chars().count(), 100);

        let short = request.payload_summary(10_000);
        assert_eq!(short, request.payload.to_string());
    }
}
