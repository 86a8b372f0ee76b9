/// Approval instances and tasks
///
/// - `types`: instance/task records and their status enums
/// - `settlement`: pure cohort settlement rules
/// - `store`: SQLite persistence with status-guarded updates

pub mod settlement;
pub mod store;
pub mod types;

pub use settlement::{settle_cohort, CohortSettlement};
pub use store::ApprovalStore;
pub use types::{
    ApprovalInstance, ApprovalTask, Decision, DecisionOutcome, InstanceStatus, TaskStatus, Transition,
};
