#![forbid(unsafe_code)]

//! Filter compilation, planning and streaming execution.
//!
//! A query moves through four stages: filter maps are normalized into
//! expression strings ([`filters`]), expressions are parsed into predicates
//! ([`parser`]) and compiled into a parameterized `WHERE` clause
//! ([`compiler`]), the planner wraps that clause in one of the sampling
//! shapes ([`planner`]), and the executor streams normalized records
//! ([`executor`]).

/// Predicate tree produced by the parser.
pub mod ast;

/// Fluent, by-value query construction.
pub mod builder;

/// Predicate to parameterized SQL.
pub mod compiler;

/// Prepared statements and the lazy record stream.
pub mod executor;

/// Ordered filter maps and their normalization into expressions.
pub mod filters;

/// Literal parsing for right-hand sides.
pub mod literal;

/// Mini-DSL parser.
pub mod parser;

/// Sampling-aware statement planning.
pub mod planner;

/// Raw rows keyed by column name.
pub mod row;

/// Declarative query description.
pub mod spec;

/// Typed scalar values.
pub mod value;

pub use builder::QueryBuilder;
pub use executor::{PreparedQuery, QueryPhase, QueryStats, Records};
pub use filters::{FilterValue, Filters, RangeFilter};
pub use planner::CompiledQuery;
pub use spec::{QuerySpec, SampleSpec, SampleStrategy, SortDirection, SortKey};
pub use value::Value;
