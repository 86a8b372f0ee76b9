/// Approval runtime
///
/// - `engine`: the workflow engine driving instances and tasks
/// - `scheduler`: cron job running the escalation sweep

pub mod engine;
pub mod scheduler;

pub use engine::WorkflowEngine;
pub use scheduler::EscalationScheduler;
