/// Escalation target resolution
///
/// When a node's timeout action is `Reassign`, the sweep asks an
/// [`EscalationResolver`] who should take over an overdue task.

use crate::approval::types::ApprovalTask;
use crate::condition::OrgDirectory;
use crate::workflow::types::UserId;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait EscalationResolver: Send + Sync {
    /// New assignee for an overdue task, or `None` to treat it as satisfied
    async fn resolve_escalation_target(&self, task: &ApprovalTask) -> Option<UserId>;
}

/// Never reassigns
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEscalationTarget;

#[async_trait]
impl EscalationResolver for NoEscalationTarget {
    async fn resolve_escalation_target(&self, _task: &ApprovalTask) -> Option<UserId> {
        None
    }
}

/// Escalates to the overdue approver's manager
#[derive(Debug, Clone)]
pub struct DirectoryEscalationResolver {
    directory: Arc<OrgDirectory>,
}

impl DirectoryEscalationResolver {
    pub fn new(directory: Arc<OrgDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl EscalationResolver for DirectoryEscalationResolver {
    async fn resolve_escalation_target(&self, task: &ApprovalTask) -> Option<UserId> {
        self.directory
            .manager_of(&task.approver_id)
            .filter(|manager| **manager != task.approver_id)
            .cloned()
    }
}
