use crate::workflow::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of an approval run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    /// Still open; at least one task of the current cohort timed out
    Escalated,
    Approved,
    Rejected,
    Withdrawn,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceStatus::Approved | InstanceStatus::Rejected | InstanceStatus::Withdrawn
        )
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Approved,
    Rejected,
    Escalated,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn task_status(self) -> TaskStatus {
        match self {
            Decision::Approve => TaskStatus::Approved,
            Decision::Reject => TaskStatus::Rejected,
        }
    }
}

/// One approval run bound to a (business_type, business_id) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ApprovalInstance {
    pub id: String,
    pub business_type: String,
    pub business_id: String,
    pub flow_code: String,
    pub initiator_id: UserId,
    pub status: InstanceStatus,
    /// Sequence of the cohort currently awaiting decisions
    pub current_sequence: i64,
    /// Predecessor in the resubmission chain
    pub previous_instance_id: Option<String>,
    pub title: String,
    pub summary: String,
    /// Comment of the task that rejected the instance
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub terminal_at: Option<DateTime<Utc>>,
}

/// One approver's assignment within a cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ApprovalTask {
    pub id: String,
    pub instance_id: String,
    pub sequence: i64,
    pub approver_id: UserId,
    pub status: TaskStatus,
    pub decision_comment: Option<String>,
    pub has_veto_power: bool,
    pub due_date: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    /// Fresh task created when this one was escalated to another approver
    pub replaced_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of a state transition plus the best-effort callback failures it produced
#[derive(Debug, Clone, Serialize)]
pub struct Transition<T> {
    pub value: T,
    pub warnings: Vec<String>,
}

impl<T> Transition<T> {
    pub fn new(value: T, warnings: Vec<String>) -> Self {
        Self { value, warnings }
    }
}

/// What a decision did to its instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// Cohort still waiting on other approvers
    Pending,
    /// Cohort settled and the next node's tasks were created
    Advanced { sequence: i64 },
    Approved,
    Rejected { vetoed: bool },
}
