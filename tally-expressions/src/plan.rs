//! Dependency-ordered evaluation plans.

use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use tally_base_schema::fqdsn::Fqdsn;

use crate::Expression;

/// The chain of expression targets currently on the resolution stack.
///
/// Reported with [`PlanError::Cycle`] to make the offending dependency loop
/// visible in logs.
#[derive(Clone, Debug)]
pub struct DependencyChain(
    /// The targets on the stack, outermost first.
    pub Vec<Fqdsn>,
);

impl fmt::Display for DependencyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, fqdsn) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{fqdsn}")?;
        }
        Ok(())
    }
}

/// An error rejecting a candidate set of expressions.
///
/// Both variants reject the whole candidate set; the caller keeps the
/// previously active plan and reports the error.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Two expressions claim the same target series.
    #[error("multiple expressions target {target}")]
    DuplicateTarget {
        /// The contested target series.
        target: Fqdsn,
    },
    /// An expression transitively depends on itself.
    #[error("expression dependency cycle detected at {target}; ancestor chain: {ancestors}")]
    Cycle {
        /// The target whose dependency closed the loop.
        target: Fqdsn,
        /// The targets on the resolution stack when the loop was found.
        ancestors: DependencyChain,
    },
}

/// An ordered, cycle-free sequence of expressions.
///
/// Every expression appears after all expressions it depends on, so a single
/// in-order pass over the plan can evaluate each expression against a working
/// set that already contains its derived inputs. Plans are immutable; they
/// are replaced wholesale when the expression set changes.
#[derive(Debug, Default)]
pub struct EvaluationPlan {
    expressions: Vec<Arc<dyn Expression>>,
}

impl EvaluationPlan {
    /// Returns a plan without any expressions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a plan from a flat set of expressions.
    ///
    /// Expressions are indexed by target and ordered bottom-up with a
    /// depth-first insertion: each expression is placed after all of its
    /// expression-typed dependencies. Dependencies without an expression are
    /// ignored; they are satisfiable from raw data before any expression
    /// runs. Ties between independent expressions keep the input order, so
    /// resolution is deterministic for a deterministic input order.
    pub fn resolve(expressions: Vec<Arc<dyn Expression>>) -> Result<Self, PlanError> {
        let mut by_target: IndexMap<Fqdsn, Arc<dyn Expression>> =
            IndexMap::with_capacity(expressions.len());
        for expression in expressions {
            let target = expression.target().clone();
            if by_target.insert(target.clone(), expression).is_some() {
                return Err(PlanError::DuplicateTarget { target });
            }
        }

        let mut ordered: IndexSet<Fqdsn> = IndexSet::with_capacity(by_target.len());
        let mut ancestors: IndexSet<Fqdsn> = IndexSet::new();
        for target in by_target.keys() {
            insert_expression(target, &by_target, &mut ancestors, &mut ordered)?;
        }

        let expressions = ordered
            .iter()
            .filter_map(|target| by_target.get(target).cloned())
            .collect();

        Ok(Self { expressions })
    }

    /// Returns the expressions in evaluation order.
    pub fn expressions(&self) -> &[Arc<dyn Expression>] {
        &self.expressions
    }

    /// Returns the number of expressions in the plan.
    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    /// Returns `true` if the plan contains no expressions.
    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }
}

/// Recursively places `target` after all of its expression dependencies.
///
/// `ancestors` is the explicit set of targets currently on the stack; finding
/// a dependency in it means the dependency graph contains a loop.
fn insert_expression(
    target: &Fqdsn,
    by_target: &IndexMap<Fqdsn, Arc<dyn Expression>>,
    ancestors: &mut IndexSet<Fqdsn>,
    ordered: &mut IndexSet<Fqdsn>,
) -> Result<(), PlanError> {
    if ancestors.contains(target) {
        return Err(PlanError::Cycle {
            target: target.clone(),
            ancestors: DependencyChain(ancestors.iter().cloned().collect()),
        });
    }

    // Already finalized through another expression's dependencies.
    if ordered.contains(target) {
        return Ok(());
    }

    ancestors.insert(target.clone());

    if let Some(expression) = by_target.get(target) {
        for dependency in expression.dependencies() {
            // Only expression dependencies constrain the order; all other
            // dependencies are raw data available before any expression runs.
            if by_target.contains_key(dependency) {
                insert_expression(dependency, by_target, ancestors, ordered)?;
            }
        }
    }

    ancestors.shift_remove(target);
    ordered.insert(target.clone());

    Ok(())
}

#[cfg(test)]
mod tests {
    use tally_base_schema::data::AggregatedData;
    use tally_base_schema::quantity::Quantity;
    use tally_base_schema::statistics::Statistic;

    use crate::{EvaluationContext, EvaluationError, Expression};

    use super::*;

    #[derive(Debug)]
    struct TestExpression {
        target: Fqdsn,
        dependencies: IndexSet<Fqdsn>,
    }

    impl TestExpression {
        fn new(target: &Fqdsn, dependencies: &[&Fqdsn]) -> Arc<dyn Expression> {
            Arc::new(Self {
                target: target.clone(),
                dependencies: dependencies.iter().map(|&f| f.clone()).collect(),
            })
        }
    }

    impl Expression for TestExpression {
        fn target(&self) -> &Fqdsn {
            &self.target
        }

        fn dependencies(&self) -> &IndexSet<Fqdsn> {
            &self.dependencies
        }

        fn evaluate(
            &self,
            ctx: &EvaluationContext<'_>,
        ) -> Result<Option<AggregatedData>, EvaluationError> {
            Ok(Some(AggregatedData {
                fqdsn: self.target.clone(),
                host: ctx.host.clone(),
                period: ctx.period,
                period_start: ctx.period_start,
                value: Quantity::unitless(0.0),
                population_size: 1,
            }))
        }
    }

    fn series(metric: &str) -> Fqdsn {
        Fqdsn::new("prod", "web", metric, Statistic::Mean)
    }

    fn position(plan: &EvaluationPlan, target: &Fqdsn) -> usize {
        plan.expressions()
            .iter()
            .position(|e| e.target() == target)
            .unwrap()
    }

    #[test]
    fn test_resolve_orders_dependencies_first() {
        let a = series("a");
        let b = series("b");
        let c = series("c");
        let d = series("d");
        let raw = series("raw");

        // Insertion order deliberately reverses the dependency order.
        let plan = EvaluationPlan::resolve(vec![
            TestExpression::new(&d, &[&c, &a]),
            TestExpression::new(&c, &[&b, &raw]),
            TestExpression::new(&b, &[&a]),
            TestExpression::new(&a, &[&raw]),
        ])
        .unwrap();

        assert_eq!(plan.len(), 4);
        assert!(position(&plan, &a) < position(&plan, &b));
        assert!(position(&plan, &b) < position(&plan, &c));
        assert!(position(&plan, &c) < position(&plan, &d));
        assert!(position(&plan, &a) < position(&plan, &d));
    }

    #[test]
    fn test_resolve_keeps_insertion_order_for_independent_expressions() {
        let a = series("a");
        let b = series("b");
        let raw = series("raw");

        let plan = EvaluationPlan::resolve(vec![
            TestExpression::new(&b, &[&raw]),
            TestExpression::new(&a, &[&raw]),
        ])
        .unwrap();

        assert_eq!(position(&plan, &b), 0);
        assert_eq!(position(&plan, &a), 1);
    }

    #[test]
    fn test_resolve_rejects_cycle() {
        let a = series("a");
        let b = series("b");

        let result = EvaluationPlan::resolve(vec![
            TestExpression::new(&a, &[&b]),
            TestExpression::new(&b, &[&a]),
        ]);

        match result {
            Err(PlanError::Cycle { target, ancestors }) => {
                assert_eq!(target, a);
                assert_eq!(ancestors.0, vec![a.clone(), b.clone()]);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_rejects_self_cycle() {
        let a = series("a");

        let result = EvaluationPlan::resolve(vec![TestExpression::new(&a, &[&a])]);
        assert!(matches!(result, Err(PlanError::Cycle { .. })));
    }

    #[test]
    fn test_resolve_rejects_duplicate_target() {
        let a = series("a");
        let raw = series("raw");

        // The duplicate pair also forms a would-be cycle through `a`; the
        // duplicate target must win before cycle detection runs.
        let result = EvaluationPlan::resolve(vec![
            TestExpression::new(&a, &[&raw]),
            TestExpression::new(&a, &[&a]),
        ]);

        match result {
            Err(PlanError::DuplicateTarget { target }) => assert_eq!(target, a),
            other => panic!("expected duplicate target error, got {other:?}"),
        }
    }

    #[test]
    fn test_diamond_dependency_is_not_a_cycle() {
        let a = series("a");
        let b = series("b");
        let c = series("c");
        let d = series("d");

        let plan = EvaluationPlan::resolve(vec![
            TestExpression::new(&d, &[&b, &c]),
            TestExpression::new(&b, &[&a]),
            TestExpression::new(&c, &[&a]),
            TestExpression::new(&a, &[]),
        ])
        .unwrap();

        assert_eq!(plan.len(), 4);
        assert!(position(&plan, &a) < position(&plan, &b));
        assert!(position(&plan, &a) < position(&plan, &c));
        assert!(position(&plan, &b) < position(&plan, &d));
        assert!(position(&plan, &c) < position(&plan, &d));
    }

    #[test]
    fn test_cycle_error_displays_chain() {
        let a = series("a");
        let b = series("b");

        let error = EvaluationPlan::resolve(vec![
            TestExpression::new(&a, &[&b]),
            TestExpression::new(&b, &[&a]),
        ])
        .unwrap_err();

        let message = error.to_string();
        assert!(message.contains("prod/web/a/mean -> prod/web/b/mean"), "{message}");
    }
}
