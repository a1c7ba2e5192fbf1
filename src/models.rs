// Workflow domain model - item states, stages, roles and the persisted rows
//
// Item status is a closed, totally ordered set:
//   pending → approved_by_manager → approved_by_hr → approved_by_finance → paid
// with a rejected_by_<stage> leaf hanging off every approval stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WorkflowError;

// ============================================================================
// ITEM STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    ApprovedByManager,
    RejectedByManager,
    ApprovedByHr,
    RejectedByHr,
    ApprovedByFinance,
    RejectedByFinance,
    Paid,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 8] = [
        ItemStatus::Pending,
        ItemStatus::ApprovedByManager,
        ItemStatus::RejectedByManager,
        ItemStatus::ApprovedByHr,
        ItemStatus::RejectedByHr,
        ItemStatus::ApprovedByFinance,
        ItemStatus::RejectedByFinance,
        ItemStatus::Paid,
    ];

    pub const REJECTED: [ItemStatus; 3] = [
        ItemStatus::RejectedByManager,
        ItemStatus::RejectedByHr,
        ItemStatus::RejectedByFinance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::ApprovedByManager => "approved_by_manager",
            ItemStatus::RejectedByManager => "rejected_by_manager",
            ItemStatus::ApprovedByHr => "approved_by_hr",
            ItemStatus::RejectedByHr => "rejected_by_hr",
            ItemStatus::ApprovedByFinance => "approved_by_finance",
            ItemStatus::RejectedByFinance => "rejected_by_finance",
            ItemStatus::Paid => "paid",
        }
    }

    /// Position along the stage graph. A rejection sits one step past the
    /// approval it replaced, so both leaves of a stage share a rank.
    pub fn rank(&self) -> u8 {
        match self {
            ItemStatus::Pending => 0,
            ItemStatus::ApprovedByManager | ItemStatus::RejectedByManager => 1,
            ItemStatus::ApprovedByHr | ItemStatus::RejectedByHr => 2,
            ItemStatus::ApprovedByFinance | ItemStatus::RejectedByFinance => 3,
            ItemStatus::Paid => 4,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            ItemStatus::RejectedByManager | ItemStatus::RejectedByHr | ItemStatus::RejectedByFinance
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.is_rejected() || *self == ItemStatus::Paid
    }

    /// Edges of the stage graph. Everything not listed here is a backward or
    /// skipping move and is refused.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Pending, ItemStatus::ApprovedByManager)
                | (ItemStatus::Pending, ItemStatus::RejectedByManager)
                | (ItemStatus::ApprovedByManager, ItemStatus::ApprovedByHr)
                | (ItemStatus::ApprovedByManager, ItemStatus::RejectedByHr)
                | (ItemStatus::ApprovedByHr, ItemStatus::ApprovedByFinance)
                | (ItemStatus::ApprovedByHr, ItemStatus::RejectedByFinance)
                | (ItemStatus::ApprovedByFinance, ItemStatus::Paid)
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| WorkflowError::InvalidInput(format!("Unknown item status: {}", s)))
    }
}

// ============================================================================
// REIMBURSEMENT STATUS (coarse, derived from items)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReimbursementStatus {
    Pending,
    InReview,
    PartiallyApproved,
    FullyApproved,
    Rejected,
    Paid,
}

impl ReimbursementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReimbursementStatus::Pending => "pending",
            ReimbursementStatus::InReview => "in_review",
            ReimbursementStatus::PartiallyApproved => "partially_approved",
            ReimbursementStatus::FullyApproved => "fully_approved",
            ReimbursementStatus::Rejected => "rejected",
            ReimbursementStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for ReimbursementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReimbursementStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReimbursementStatus::Pending),
            "in_review" => Ok(ReimbursementStatus::InReview),
            "partially_approved" => Ok(ReimbursementStatus::PartiallyApproved),
            "fully_approved" => Ok(ReimbursementStatus::FullyApproved),
            "rejected" => Ok(ReimbursementStatus::Rejected),
            "paid" => Ok(ReimbursementStatus::Paid),
            other => Err(WorkflowError::InvalidInput(format!(
                "Unknown reimbursement status: {}",
                other
            ))),
        }
    }
}

// ============================================================================
// STAGES AND DECISIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Manager,
    Hr,
    Finance,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Manager => "manager",
            Stage::Hr => "hr",
            Stage::Finance => "finance",
        }
    }

    /// Status an item must hold before this stage may decide on it.
    pub fn required_status(&self) -> ItemStatus {
        match self {
            Stage::Manager => ItemStatus::Pending,
            Stage::Hr => ItemStatus::ApprovedByManager,
            Stage::Finance => ItemStatus::ApprovedByHr,
        }
    }

    /// Statuses that mean a later (or concurrent) decision already landed.
    pub fn excluded_statuses(&self) -> Vec<ItemStatus> {
        match self {
            Stage::Manager => vec![
                ItemStatus::ApprovedByManager,
                ItemStatus::RejectedByManager,
                ItemStatus::ApprovedByHr,
                ItemStatus::RejectedByHr,
                ItemStatus::ApprovedByFinance,
                ItemStatus::RejectedByFinance,
                ItemStatus::Paid,
            ],
            Stage::Hr => vec![
                ItemStatus::ApprovedByHr,
                ItemStatus::RejectedByHr,
                ItemStatus::ApprovedByFinance,
                ItemStatus::RejectedByFinance,
                ItemStatus::Paid,
            ],
            Stage::Finance => vec![
                ItemStatus::ApprovedByFinance,
                ItemStatus::RejectedByFinance,
                ItemStatus::Paid,
            ],
        }
    }

    pub fn next_status(&self, decision: Decision) -> ItemStatus {
        match (self, decision) {
            (Stage::Manager, Decision::Approved) => ItemStatus::ApprovedByManager,
            (Stage::Manager, Decision::Rejected) => ItemStatus::RejectedByManager,
            (Stage::Hr, Decision::Approved) => ItemStatus::ApprovedByHr,
            (Stage::Hr, Decision::Rejected) => ItemStatus::RejectedByHr,
            (Stage::Finance, Decision::Approved) => ItemStatus::ApprovedByFinance,
            (Stage::Finance, Decision::Rejected) => ItemStatus::RejectedByFinance,
        }
    }

    pub fn requires_manager_match(&self) -> bool {
        matches!(self, Stage::Manager)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manager" => Ok(Stage::Manager),
            "hr" => Ok(Stage::Hr),
            "finance" => Ok(Stage::Finance),
            other => Err(WorkflowError::InvalidInput(format!("Unknown stage: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }
}

impl FromStr for Decision {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Decision::Approved),
            "rejected" => Ok(Decision::Rejected),
            other => Err(WorkflowError::InvalidInput(format!("Unknown decision: {}", other))),
        }
    }
}

// ============================================================================
// ROLES AND ACTORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Employee,
    Manager,
    Hr,
    Finance,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Manager => "manager",
            Role::Hr => "hr",
            Role::Finance => "finance",
            Role::SuperAdmin => "superadmin",
        }
    }

    /// The approval stage this role owns, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Role::Manager => Some(Stage::Manager),
            Role::Hr => Some(Stage::Hr),
            Role::Finance => Some(Stage::Finance),
            Role::Employee | Role::SuperAdmin => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "employee" => Ok(Role::Employee),
            "manager" => Ok(Role::Manager),
            "hr" => Ok(Role::Hr),
            "finance" => Ok(Role::Finance),
            "superadmin" => Ok(Role::SuperAdmin),
            other => Err(WorkflowError::InvalidInput(format!("Unknown role: {}", other))),
        }
    }
}

/// Authenticated identity handed over by the session layer. Trusted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
}

impl Actor {
    pub fn new(id: i64, role: Role) -> Self {
        Actor { id, role }
    }
}

// ============================================================================
// PERSISTED ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReimbursementItem {
    pub id: i64,
    pub reimbursement_id: i64,
    pub category: String,
    pub description: String,
    pub amount: f64,
    pub paid_amount: Option<f64>,
    pub tds_amount: Option<f64>,
    pub final_amount: Option<f64>,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reimbursement {
    pub id: i64,
    pub employee_id: i64,
    pub status: ReimbursementStatus,
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry, one per successful stage decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: i64,
    pub event_id: String,
    pub item_id: i64,
    pub approver_id: i64,
    pub stage: Stage,
    pub decision: Decision,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub item_id: i64,
    pub file_name: String,
    pub file_path: String,
    pub uploaded_at: DateTime<Utc>,
}
