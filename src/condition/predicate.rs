/// Routing predicates over flattened entity data
///
/// Predicates are plain comparisons of fields and constants, optionally combined with
/// simple arithmetic (e.g. `amount * (1 + tax_rate / 100) > 50000`), joined by
/// `all` / `any` / `not`. Evaluation never touches storage.

use crate::condition::data::{EntityData, Scalar};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Always true; useful as an explicit catch-all rule
    Always,
    Compare {
        left: Operand,
        cmp: Comparison,
        right: Operand,
    },
    /// Field equals one of the listed values
    In { field: String, values: Vec<Scalar> },
    /// Field is `true` or a non-zero number
    Flag { field: String },
    /// Field exists and is not null
    Present { field: String },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand {
    Field { field: String },
    Const { value: Scalar },
    Arith {
        op: ArithOp,
        left: Box<Operand>,
        right: Box<Operand>,
    },
}

impl Operand {
    pub fn field(name: impl Into<String>) -> Self {
        Operand::Field { field: name.into() }
    }

    pub fn constant(value: impl Into<Scalar>) -> Self {
        Operand::Const { value: value.into() }
    }

    pub fn arith(op: ArithOp, left: Operand, right: Operand) -> Self {
        Operand::Arith {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Resolve to a scalar; `None` when a field is missing or arithmetic is not numeric
    fn resolve(&self, data: &EntityData) -> Option<Scalar> {
        match self {
            Operand::Field { field } => data.get(field).cloned(),
            Operand::Const { value } => Some(value.clone()),
            Operand::Arith { op, left, right } => {
                let l = left.resolve(data)?.as_number()?;
                let r = right.resolve(data)?.as_number()?;
                let value = match op {
                    ArithOp::Add => l + r,
                    ArithOp::Sub => l - r,
                    ArithOp::Mul => l * r,
                    ArithOp::Div if r == 0.0 => return None,
                    ArithOp::Div => l / r,
                };
                Some(Scalar::Number(value))
            }
        }
    }
}

impl Condition {
    /// Shorthand for `field <cmp> constant`
    pub fn field(field: impl Into<String>, cmp: Comparison, value: impl Into<Scalar>) -> Self {
        Condition::Compare {
            left: Operand::field(field),
            cmp,
            right: Operand::constant(value),
        }
    }

    pub fn evaluate(&self, data: &EntityData) -> bool {
        match self {
            Condition::Always => true,
            Condition::Compare { left, cmp, right } => {
                match (left.resolve(data), right.resolve(data)) {
                    (Some(l), Some(r)) => compare(&l, *cmp, &r),
                    _ => false,
                }
            }
            Condition::In { field, values } => data
                .get(field)
                .map(|value| values.iter().any(|candidate| scalar_eq(value, candidate)))
                .unwrap_or(false),
            Condition::Flag { field } => data.get(field).map(Scalar::is_truthy).unwrap_or(false),
            Condition::Present { field } => data.get(field).map(|v| !v.is_null()).unwrap_or(false),
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(data)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(data)),
            Condition::Not { condition } => !condition.evaluate(data),
        }
    }
}

fn scalar_eq(left: &Scalar, right: &Scalar) -> bool {
    match (left, right) {
        (Scalar::Number(l), Scalar::Number(r)) => (l - r).abs() < f64::EPSILON,
        _ => left == right,
    }
}

fn compare(left: &Scalar, cmp: Comparison, right: &Scalar) -> bool {
    let ordering = match (left, right) {
        (Scalar::Number(l), Scalar::Number(r)) => l.partial_cmp(r),
        (Scalar::Text(l), Scalar::Text(r)) => Some(l.cmp(r)),
        (Scalar::Bool(l), Scalar::Bool(r)) => match cmp {
            Comparison::Eq | Comparison::Ne => Some(l.cmp(r)),
            _ => None,
        },
        (Scalar::Null, Scalar::Null) => Some(Ordering::Equal),
        _ => None,
    };

    let Some(ordering) = ordering else {
        return false;
    };

    match cmp {
        Comparison::Eq => ordering == Ordering::Equal,
        Comparison::Ne => ordering != Ordering::Equal,
        Comparison::Lt => ordering == Ordering::Less,
        Comparison::Le => ordering != Ordering::Greater,
        Comparison::Gt => ordering == Ordering::Greater,
        Comparison::Ge => ordering != Ordering::Less,
    }
}
