//! Compiled predicate tree and its evaluation.

use crate::types::{FieldValue, TopicType};
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub(crate) fn is_ordering(&self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::NotEq)
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Operand {
    Field(String),
    Literal(FieldValue),
}

impl Operand {
    fn value<T: TopicType>(&self, sample: &T) -> Option<FieldValue> {
        match self {
            Operand::Field(path) => sample.field(path),
            Operand::Literal(value) => Some(value.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Predicate {
    Constant(bool),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Between {
        value: Operand,
        low: Operand,
        high: Operand,
        negated: bool,
    },
}

fn compare(left: &FieldValue, right: &FieldValue) -> Option<Ordering> {
    match (left, right) {
        (FieldValue::Numeric(a), FieldValue::Numeric(b)) => a.partial_cmp(b),
        (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
        (FieldValue::Boolean(a), FieldValue::Boolean(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

impl Predicate {
    /// Evaluate against a payload. Missing or incomparable values never match.
    pub(crate) fn evaluate<T: TopicType>(&self, sample: &T) -> bool {
        match self {
            Predicate::Constant(value) => *value,
            Predicate::And(a, b) => a.evaluate(sample) && b.evaluate(sample),
            Predicate::Or(a, b) => a.evaluate(sample) || b.evaluate(sample),
            Predicate::Not(inner) => !inner.evaluate(sample),
            Predicate::Compare { left, op, right } => {
                match (left.value(sample), right.value(sample)) {
                    (Some(l), Some(r)) => compare(&l, &r).map_or(false, |o| op.holds(o)),
                    _ => false,
                }
            }
            Predicate::Between {
                value,
                low,
                high,
                negated,
            } => {
                let (Some(v), Some(lo), Some(hi)) =
                    (value.value(sample), low.value(sample), high.value(sample))
                else {
                    return false;
                };
                let inside = match (compare(&v, &lo), compare(&v, &hi)) {
                    (Some(a), Some(b)) => a != Ordering::Less && b != Ordering::Greater,
                    _ => return false,
                };
                inside != *negated
            }
        }
    }
}
