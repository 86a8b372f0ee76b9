/// Cohort settlement
///
/// Decides, from the current tasks of one `(instance_id, sequence)` cohort, whether the
/// cohort is still open, settled positively, or rejected. Pure: the engine applies the
/// result inside its transaction.
///
/// Escalated tasks that were handed to another approver (`replaced_by` set) no longer
/// take part; escalated tasks without a replacement count as approved.

use crate::approval::types::{ApprovalTask, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CohortSettlement {
    /// Not enough decisions yet
    Open,
    /// Settled positively; listed PENDING tasks of this cohort are to be SKIPPED
    Approved { skipped: Vec<String> },
    /// Instance must be rejected
    Rejected {
        rejected_by: String,
        reason: Option<String>,
        vetoed: bool,
    },
}

pub fn settle_cohort(tasks: &[ApprovalTask], minimum_approval_count: Option<u32>) -> CohortSettlement {
    // Veto rejection stops everything, whatever the approval count
    if let Some(veto) = latest_rejection(tasks.iter().filter(|t| t.has_veto_power)) {
        return CohortSettlement::Rejected {
            rejected_by: veto.id.clone(),
            reason: veto.decision_comment.clone(),
            vetoed: true,
        };
    }

    let participating: Vec<&ApprovalTask> = tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Skipped)
        .filter(|t| !(t.status == TaskStatus::Escalated && t.replaced_by.is_some()))
        .collect();

    if participating.is_empty() {
        return CohortSettlement::Open;
    }

    let approved = participating.iter().filter(|t| counts_as_approved(t)).count();
    let pending: Vec<&ApprovalTask> = participating
        .iter()
        .copied()
        .filter(|t| t.status == TaskStatus::Pending)
        .collect();
    let rejection = latest_rejection(participating.iter().copied());

    match minimum_approval_count {
        Some(minimum) => {
            // A threshold above the cohort size degrades to "everyone"
            let needed = (minimum as usize).min(participating.len());

            if approved >= needed {
                CohortSettlement::Approved {
                    skipped: pending.iter().map(|t| t.id.clone()).collect(),
                }
            } else if approved + pending.len() < needed {
                match rejection {
                    Some(rejected) => CohortSettlement::Rejected {
                        rejected_by: rejected.id.clone(),
                        reason: rejected.decision_comment.clone(),
                        vetoed: false,
                    },
                    None => CohortSettlement::Open,
                }
            } else {
                CohortSettlement::Open
            }
        }
        None => {
            if let Some(rejected) = rejection {
                CohortSettlement::Rejected {
                    rejected_by: rejected.id.clone(),
                    reason: rejected.decision_comment.clone(),
                    vetoed: false,
                }
            } else if approved == participating.len() {
                CohortSettlement::Approved { skipped: Vec::new() }
            } else {
                CohortSettlement::Open
            }
        }
    }
}

fn counts_as_approved(task: &ApprovalTask) -> bool {
    match task.status {
        TaskStatus::Approved => true,
        TaskStatus::Escalated => task.replaced_by.is_none(),
        _ => false,
    }
}

fn latest_rejection<'a>(tasks: impl Iterator<Item = &'a ApprovalTask>) -> Option<&'a ApprovalTask> {
    tasks
        .filter(|t| t.status == TaskStatus::Rejected)
        .max_by_key(|t| t.decided_at)
}
