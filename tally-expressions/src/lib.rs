//! Derived-metric expressions and evaluation planning.
//!
//! An [`Expression`] is a configured derivation rule that produces a new
//! [`AggregatedData`] point from points already present in a batch. Each
//! expression names a target series and the set of series it reads; targets
//! may depend on other expressions' targets, forming a directed graph.
//!
//! [`EvaluationPlan::resolve`] turns a flat expression list into a cycle-free,
//! dependency-ordered plan: every expression appears after all expressions it
//! depends on. Plans are immutable and shared read-only between concurrent
//! evaluations; configuration changes build a new plan and replace the old
//! one wholesale.
//!
//! Expression configuration documents are deserialized through the
//! [`ExpressionRegistry`], which maps a `type` tag to a constructor. The
//! built-in `formula` type evaluates an arithmetic formula over named
//! operands.

#![warn(missing_docs)]

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use tally_base_schema::data::AggregatedData;
use tally_base_schema::fqdsn::{Fqdsn, Name};

mod formula;
mod plan;
mod registry;

pub use self::formula::{FormulaConfig, FormulaError, FormulaExpression};
pub use self::plan::{DependencyChain, EvaluationPlan, PlanError};
pub use self::registry::{
    DuplicateExpressionTypeError, ExpressionDocument, ExpressionParseError, ExpressionRegistry,
};

/// The context of a single evaluation pass over one batch.
///
/// Host, period, and period start are shared by every data point of the
/// batch; `data` is the working set, containing the original batch plus any
/// points derived earlier in the same pass.
#[derive(Clone, Copy, Debug)]
pub struct EvaluationContext<'a> {
    /// The host the batch was aggregated for.
    pub host: &'a Name,
    /// The aggregation period of the batch.
    pub period: Duration,
    /// The start instant of the aggregation period.
    pub period_start: DateTime<Utc>,
    /// The working data set the expression may read.
    pub data: &'a [AggregatedData],
}

/// An error produced by an expression's own evaluation.
///
/// Evaluation errors are per-expression and per-batch: the caller skips the
/// failing expression's contribution and continues with the rest of the plan.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    /// The expression produced a value that cannot be represented.
    #[error("expression produced a non-finite value")]
    NonFinite,
    /// The expression failed internally.
    #[error("expression evaluation failed")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A named computation deriving a new data point from existing ones.
///
/// Expressions are supplied externally as configuration and are immutable
/// once parsed. Dependencies may reference raw series or other expressions'
/// targets; only the latter constrain evaluation order.
pub trait Expression: fmt::Debug + Send + Sync {
    /// The series this expression produces.
    fn target(&self) -> &Fqdsn;

    /// The series this expression reads.
    fn dependencies(&self) -> &IndexSet<Fqdsn>;

    /// Evaluates this expression against the working set.
    ///
    /// Returns `Ok(None)` when the expression's inputs are not present in
    /// this batch; this is an expected condition and is counted separately
    /// from failures.
    fn evaluate(
        &self,
        ctx: &EvaluationContext<'_>,
    ) -> Result<Option<AggregatedData>, EvaluationError>;
}
