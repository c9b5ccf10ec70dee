//! Typed predicates produced by the expression parser.
//!
//! The variant set is closed on purpose: every filter a caller can express
//! lowers to one of these shapes before any SQL is generated.

use std::fmt;

use crate::query::value::Value;

/// Comparison operators accepted by the binary rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `<`
    Lt,
}

impl CompareOp {
    /// Parses the mini-DSL spelling.
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "==" => CompareOp::Eq,
            ">=" => CompareOp::Ge,
            "<=" => CompareOp::Le,
            ">" => CompareOp::Gt,
            "<" => CompareOp::Lt,
            _ => return None,
        })
    }

    /// Mini-DSL spelling.
    pub fn token(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }

    /// SQL spelling.
    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }
}

/// One parsed filter condition.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// `column == value`
    Equality {
        /// Column name.
        column: String,
        /// Expected value.
        value: Value,
    },
    /// `column (>=|<=|>|<) value`
    Comparison {
        /// Column name.
        column: String,
        /// Ordering operator; never [`CompareOp::Eq`].
        op: CompareOp,
        /// Bound value.
        value: Value,
    },
    /// `column IN (values...)`
    Membership {
        /// Column name.
        column: String,
        /// Candidate values, in the order given.
        values: Vec<Value>,
    },
    /// `column BETWEEN lo AND hi` (inclusive).
    Range {
        /// Column name.
        column: String,
        /// Lower bound.
        lo: Value,
        /// Upper bound.
        hi: Value,
    },
    /// `column IS [NOT] NULL`
    NullCheck {
        /// Column name.
        column: String,
        /// True for `IS NOT NULL`.
        negated: bool,
    },
    /// Trusted SQL fragment with no bound parameters. Only constructed in code,
    /// never produced from user text.
    Raw(String),
}

impl Predicate {
    /// Builds a comparison, folding `==` into [`Predicate::Equality`].
    pub fn compare(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        let column = column.into();
        match op {
            CompareOp::Eq => Predicate::Equality { column, value },
            op => Predicate::Comparison { column, op, value },
        }
    }

    /// Column the predicate constrains, if any.
    pub fn column(&self) -> Option<&str> {
        match self {
            Predicate::Equality { column, .. }
            | Predicate::Comparison { column, .. }
            | Predicate::Membership { column, .. }
            | Predicate::Range { column, .. }
            | Predicate::NullCheck { column, .. } => Some(column),
            Predicate::Raw(_) => None,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Equality { column, value } => write!(f, "{column}=={}", value.to_literal()),
            Predicate::Comparison { column, op, value } => {
                write!(f, "{column}{}{}", op.token(), value.to_literal())
            }
            Predicate::Membership { column, values } => {
                let items: Vec<String> = values.iter().map(Value::to_literal).collect();
                write!(f, "{column}==[{}]", items.join(","))
            }
            Predicate::Range { column, lo, hi } => {
                write!(f, "{column} between [{},{}]", lo.to_literal(), hi.to_literal())
            }
            Predicate::NullCheck { column, negated } => {
                write!(f, "{column} is {}null", if *negated { "not " } else { "" })
            }
            Predicate::Raw(sql) => write!(f, "{sql}"),
        }
    }
}
