/// Condition evaluation layer
///
/// Flattened entity data, routing predicates, the org directory snapshot and the pure
/// [`ConditionEvaluator`] that combines them.

pub mod data;
pub mod directory;
pub mod evaluator;
pub mod predicate;

pub use data::{EntityData, RateScale, Scalar};
pub use directory::OrgDirectory;
pub use evaluator::{ConditionEvaluator, INITIATOR_KEY};
pub use predicate::{ArithOp, Comparison, Condition, Operand};
