//! Ordered rule matcher for canonical filter expressions.
//!
//! Grammar, first match wins:
//!
//! 1. `key is [not] null`
//! 2. `key in|between [lo,hi]`
//! 3. `key between lo and hi`
//! 4. `key OP rhs` with `OP` one of `==`, `>=`, `<=`, `>`, `<`
//!
//! The order is load-bearing. Some inputs match more than one rule (a column
//! whose name ends in `in` followed by a bracket, for example) and resolve to
//! whichever rule comes first. Anything matching no rule is rejected with the
//! offending text.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::trace;

use crate::error::{QuarryError, Result};
use crate::query::ast::{CompareOp, Predicate};
use crate::query::literal::{parse_literal, parse_scalar, Literal};

type RuleFn = fn(&Captures<'_>, &str) -> Result<Predicate>;

struct Rule {
    name: &'static str,
    pattern: fn() -> &'static Regex,
    build: RuleFn,
}

const RULES: [Rule; 4] = [
    Rule {
        name: "null-check",
        pattern: null_re,
        build: build_null_check,
    },
    Rule {
        name: "bracketed-range",
        pattern: bracketed_range_re,
        build: build_range,
    },
    Rule {
        name: "between-range",
        pattern: between_range_re,
        build: build_range,
    },
    Rule {
        name: "binary-op",
        pattern: binary_re,
        build: build_binary,
    },
];

fn null_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?P<key>\w+)\s+is\s+(?P<neg>not\s+)?null\s*$")
            .expect("null-check pattern compiles")
    })
}

fn bracketed_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?P<key>\w+)\s*(?:in|between)\s*\[(?P<lo>.+?),(?P<hi>.+?)\]\s*$")
            .expect("bracketed-range pattern compiles")
    })
}

fn between_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?P<key>\w+)\s*between\s+(?P<lo>.+?)\s+and\s+(?P<hi>.+?)\s*$")
            .expect("between-range pattern compiles")
    })
}

fn binary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<key>\w+)\s*(?P<op>==|>=|<=|>|<)\s*(?P<rhs>.+?)\s*$")
            .expect("binary-op pattern compiles")
    })
}

/// Parses one canonical expression into a [`Predicate`].
pub fn parse_expression(expr: &str) -> Result<Predicate> {
    for rule in &RULES {
        if let Some(caps) = (rule.pattern)().captures(expr) {
            trace!(rule = rule.name, expr, "filter rule matched");
            return (rule.build)(&caps, expr);
        }
    }
    Err(QuarryError::malformed(expr))
}

/// Parses every expression, failing on the first malformed one.
pub fn parse_expressions<S: AsRef<str>>(exprs: &[S]) -> Result<Vec<Predicate>> {
    exprs.iter().map(|e| parse_expression(e.as_ref())).collect()
}

fn key(caps: &Captures<'_>) -> String {
    caps["key"].to_owned()
}

fn build_null_check(caps: &Captures<'_>, _expr: &str) -> Result<Predicate> {
    Ok(Predicate::NullCheck {
        column: key(caps),
        negated: caps.name("neg").is_some(),
    })
}

fn build_range(caps: &Captures<'_>, _expr: &str) -> Result<Predicate> {
    Ok(Predicate::Range {
        column: key(caps),
        lo: parse_scalar(&caps["lo"]),
        hi: parse_scalar(&caps["hi"]),
    })
}

fn build_binary(caps: &Captures<'_>, expr: &str) -> Result<Predicate> {
    let op = CompareOp::from_token(&caps["op"]).ok_or_else(|| QuarryError::malformed(expr))?;
    match (op, parse_literal(&caps["rhs"])) {
        (CompareOp::Eq, Literal::List(values)) => Ok(Predicate::Membership {
            column: key(caps),
            values,
        }),
        (_, Literal::List(_)) => Err(QuarryError::malformed(expr)),
        (op, Literal::Scalar(value)) => Ok(Predicate::compare(key(caps), op, value)),
    }
}
