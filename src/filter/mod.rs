//! Metadata filtering for vector search.
//!
//! Compiles a predicate string into a small [`Condition`] AST and evaluates
//! it against a slot's [`Metadata`] map. Grounded in the teacher's
//! `filter/mod.rs` and `filter/matching.rs`; spec.md §4.8 requires only
//! equality, conjunction, disjunction, and negation — the richer operator
//! set here (`Neq`/ordering/`In`/`Contains`/null checks/`Like`/`ILike`) is
//! carried over as enrichment on top of that minimum, since the teacher
//! already has it and the metadata model (string keys, string values) is a
//! strict subset of the teacher's JSON-valued payload.

mod matching;
mod parser;

pub use parser::{parse, ParseError};

use serde::{Deserialize, Serialize};

use crate::point::Metadata;

/// A single filter value as written in a predicate string.
///
/// Stored metadata is always a string; a `Num` literal compares
/// numerically against a metadata value that parses as a float, and falls
/// back to `false` (not a string comparison) when it doesn't — matching the
/// teacher's JSON-typed `compare_values`, which only defines ordering
/// between like-typed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterValue {
    Str(String),
    Num(f64),
}

/// A predicate over a vector's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub condition: Condition,
}

impl Filter {
    #[must_use]
    pub fn new(condition: Condition) -> Self {
        Self { condition }
    }

    /// Compiles a predicate string (see [`parser`] for grammar) into a
    /// ready-to-evaluate filter.
    pub fn compile(predicate: &str) -> Result<Self, ParseError> {
        Ok(Self::new(parser::parse(predicate)?))
    }

    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.condition.matches(metadata)
    }
}

/// The filter predicate AST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Condition {
    Eq { field: String, value: FilterValue },
    Neq { field: String, value: FilterValue },
    Gt { field: String, value: FilterValue },
    Gte { field: String, value: FilterValue },
    Lt { field: String, value: FilterValue },
    Lte { field: String, value: FilterValue },
    In { field: String, values: Vec<FilterValue> },
    Contains { field: String, value: String },
    IsNull { field: String },
    IsNotNull { field: String },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Like { field: String, pattern: String },
    ILike { field: String, pattern: String },
}

impl Condition {
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq {
            field: field.into(),
            value: FilterValue::Str(value.into()),
        }
    }

    #[must_use]
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self::And(conditions)
    }

    #[must_use]
    pub fn or(conditions: Vec<Condition>) -> Self {
        Self::Or(conditions)
    }

    #[must_use]
    pub fn not(condition: Condition) -> Self {
        Self::Not(Box::new(condition))
    }
}

/// Default overfetch ratio when a filter narrows an approximate search
/// below the requested `k` (spec.md §4.8 / §9: tunable, not fixed).
pub const DEFAULT_OVERFETCH_RATIO: usize = 4;

/// Default retry count when the overfetch still under-returns.
pub const DEFAULT_OVERFETCH_RETRIES: usize = 1;
