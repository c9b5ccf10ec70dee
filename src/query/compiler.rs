//! Lowers parsed predicates into a parameterized SQL `WHERE` fragment.
//!
//! Values never appear in the SQL text. Every value becomes a positional `?`
//! placeholder and the parameter vector is built in the same left-to-right
//! order the placeholders are written.

use crate::error::{QuarryError, Result};
use crate::query::ast::Predicate;
use crate::query::parser::parse_expressions;
use crate::query::value::Value;

/// Maximum number of placeholders in one `IN (...)` list.
pub const IN_CHUNK: usize = 1000;

/// Compiled `WHERE` body and its positional parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WhereClause {
    /// Predicate SQL without the `WHERE` keyword; empty when unfiltered.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
}

impl WhereClause {
    /// True when no predicate was compiled.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// ` WHERE <sql>` or the empty string.
    pub fn clause(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.sql)
        }
    }
}

/// Parses and compiles canonical expressions.
pub fn build_where<S: AsRef<str>>(exprs: &[S]) -> Result<WhereClause> {
    let predicates = parse_expressions(exprs)?;
    compile_predicates(&predicates)
}

/// Compiles predicates, AND-joined in input order.
pub fn compile_predicates(predicates: &[Predicate]) -> Result<WhereClause> {
    let mut params = Vec::new();
    let mut parts = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        parts.push(compile_one(predicate, &mut params)?);
    }
    Ok(WhereClause {
        sql: parts.join(" AND "),
        params,
    })
}

fn compile_one(predicate: &Predicate, params: &mut Vec<Value>) -> Result<String> {
    Ok(match predicate {
        Predicate::Equality {
            column,
            value: Value::Null,
        } => format!("{} IS NULL", quote_ident(column)?),
        Predicate::Equality { column, value } => {
            params.push(value.clone());
            format!("{} = ?", quote_ident(column)?)
        }
        Predicate::Comparison { column, op, value } => {
            params.push(value.clone());
            format!("{} {} ?", quote_ident(column)?, op.sql())
        }
        Predicate::Membership { column, values } => compile_membership(column, values, params)?,
        Predicate::Range { column, lo, hi } => {
            params.push(lo.clone());
            params.push(hi.clone());
            format!("{} BETWEEN ? AND ?", quote_ident(column)?)
        }
        Predicate::NullCheck { column, negated } => {
            let not = if *negated { "NOT " } else { "" };
            format!("{} IS {not}NULL", quote_ident(column)?)
        }
        Predicate::Raw(sql) => format!("({sql})"),
    })
}

fn compile_membership(column: &str, values: &[Value], params: &mut Vec<Value>) -> Result<String> {
    if values.is_empty() {
        return Ok("0 = 1".to_owned());
    }
    let column = quote_ident(column)?;
    let chunks: Vec<String> = values
        .chunks(IN_CHUNK)
        .map(|chunk| {
            params.extend(chunk.iter().cloned());
            format!("{column} IN ({})", placeholders(chunk.len()))
        })
        .collect();
    Ok(if chunks.len() == 1 {
        chunks.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", chunks.join(" OR "))
    })
}

fn placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 2);
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

/// Rejects names that cannot be used as an SQL identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || name.trim() != name || name.contains('\0') {
        return Err(QuarryError::InvalidIdentifier {
            name: name.to_owned(),
        });
    }
    Ok(())
}

/// Double-quotes an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}
