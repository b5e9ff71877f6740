// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Boolean and range queries over posting lists.
//!
//! A query is a tree of [`Query`] nodes; evaluation produces a
//! deduplicated vector of [`crate::PostingEntry`] which the executor
//! resolves against the summary tables and renders as JSON.

mod eval;
mod executor;
mod lookup;

pub use eval::process_query;
pub use executor::{execute, execute_interactive};

use crate::cas::CasClient;

/// A query tree node.
#[derive(Clone, Debug)]
pub enum Query {
    /// Probe the summary tables for a document key directly, bypassing
    /// the index
    Key(String),

    /// Look up a keyword in every index table and union the results.
    ///
    /// The identifier may be URL-encoded. Two special forms exist:
    /// `in-PREFIX:SUBSTRING` scans all keys starting with `PREFIX` and
    /// keeps those whose remainder contains `SUBSTRING`
    /// (case-insensitively); `FIELD-in:KEY` fetches a document from the
    /// content store and looks up `FIELD:name` for every DNS name found
    /// in it.
    Leaf(String),

    /// Sorted union; offset collisions keep the left entry
    Or(Box<Query>, Box<Query>),

    /// Sorted intersection; left-side duplicates of a matching offset
    /// are all kept
    And(Box<Query>, Box<Query>),

    /// Drops every left entry whose offset appears on the right
    Subtract(Box<Query>, Box<Query>),

    /// Keeps entries whose score equals the operand
    Eq(Box<Query>, f64),

    /// Keeps entries whose score is greater than the operand
    Gt(Box<Query>, ScoreOperand),

    /// Keeps entries whose score is at least the operand
    Ge(Box<Query>, f64),

    /// Keeps entries whose score is less than the operand
    Lt(Box<Query>, ScoreOperand),

    /// Keeps entries whose score is at most the operand
    Le(Box<Query>, f64),

    /// Keeps entries whose score lies in the closed range; the bounds
    /// are swapped if given in descending order
    InRange(Box<Query>, f64, f64),

    /// Replaces each left entry's score with the right side's score at
    /// the same offset; offsets missing on the right score `-∞`
    OrderBy(Box<Query>, Box<Query>),

    /// Uniform sample without replacement, deterministically seeded;
    /// the result is re-sorted by offset
    RandomSample(Box<Query>, usize),

    /// Collapses duplicate adjacent offsets, keeping the greatest score
    Max(Box<Query>),

    /// Collapses duplicate adjacent offsets, keeping the least score
    Min(Box<Query>),

    /// Negates every score
    Negate(Box<Query>),
}

/// Right-hand operand of a score comparison: a constant, or another
/// subquery joined on offset.
#[derive(Clone, Debug)]
pub enum ScoreOperand {
    /// Compare against a constant
    Scalar(f64),

    /// Join on offset and compare the two scores
    Query(Box<Query>),
}

/// Groups query results into named ranges of an auxiliary score.
#[derive(Clone, Debug)]
pub struct ThresholdClause {
    /// Index key whose postings carry the grouping score; a `~` prefix
    /// reverses the group order
    pub key: String,

    /// Range boundaries, ascending
    pub values: Vec<f64>,
}

/// One query to execute.
#[derive(Clone, Debug)]
pub struct QueryStatement {
    /// The query tree
    pub query: Query,

    /// Emit document keys instead of JSON summaries
    pub keys_only: bool,

    /// Maximum number of results; `None` means all
    pub limit: Option<usize>,

    /// Number of leading results to drop
    pub offset: usize,

    /// Optional grouping clause
    pub thresholds: Option<ThresholdClause>,
}

impl QueryStatement {
    /// A plain statement returning every summary matching `query`.
    #[must_use]
    pub fn new(query: Query) -> Self {
        Self {
            query,
            keys_only: false,
            limit: None,
            offset: 0,
            thresholds: None,
        }
    }
}

/// Engine configuration that the original tooling kept in process-wide
/// state, collected into one explicit object.
#[derive(Default)]
pub struct RuntimeConfig {
    /// Key prefixes whose scores are days since the epoch; threshold
    /// headers over them render as date ranges
    pub timestamped_prefixes: Vec<String>,

    /// Client for `FIELD-in:KEY` lookups; such queries fail without one
    pub cas_client: Option<Box<dyn CasClient>>,

    /// Resolve duplicate offsets by keeping the minimum score instead of
    /// the maximum
    pub use_min: bool,
}

impl RuntimeConfig {
    pub(crate) fn is_timestamped(&self, key: &str) -> bool {
        self.timestamped_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
    }
}
