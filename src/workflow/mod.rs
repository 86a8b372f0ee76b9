/// Workflow definition layer
///
/// - Definition types (flows, nodes, resolvers, escalation policy)
/// - SQLite persistence in `workflow_definitions`
/// - Lock-free hot-reload registry using ArcSwap

pub mod types;

pub mod storage;

pub mod registry;

pub use registry::DefinitionRegistry;
pub use storage::DefinitionStorage;
pub use types::{
    ApproverResolver, ApproverRule, EscalationPolicy, Node, NodeKind, Route, TimeoutAction, UserId,
    WorkflowDefinition,
};
