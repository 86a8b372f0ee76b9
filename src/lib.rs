/// Approval engine: configurable multi-level approval workflows for business entities
///
/// Workflow definitions describe ordered nodes of approvers; the engine resolves
/// approvers per entity, settles each cohort (all-of, threshold or veto), advances or
/// terminates the instance, escalates overdue tasks and keeps the resubmission chain.
/// Business entities plug in through [`adapter::EntityAdapter`].

// Core configuration and setup
pub mod config;

pub mod error;

// Entity data, predicates, org directory and the evaluator over them
pub mod condition;

// Workflow definitions: types, storage and hot-reload registry
pub mod workflow;

// Entity adapter contract and the in-memory implementation
pub mod adapter;

// Approval instances, tasks, settlement and persistence
pub mod approval;

pub mod notify;

pub mod escalation;

// Workflow engine and escalation scheduler
pub mod runtime;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

pub use adapter::{AdapterRegistry, EntityAdapter, InMemoryAdapter};
pub use approval::{ApprovalInstance, ApprovalTask, Decision, DecisionOutcome, InstanceStatus, TaskStatus, Transition};
pub use condition::{Condition, ConditionEvaluator, EntityData, OrgDirectory};
pub use error::{EngineError, EngineResult};
pub use runtime::WorkflowEngine;
pub use server::start_server;
pub use workflow::{DefinitionRegistry, WorkflowDefinition};
