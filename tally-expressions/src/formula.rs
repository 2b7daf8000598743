//! Arithmetic formula expressions over named operands.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexSet;
use pest::Parser;
use pest::iterators::Pair;
use serde::{Deserialize, Serialize};
use tally_base_schema::data::AggregatedData;
use tally_base_schema::fqdsn::Fqdsn;
use tally_base_schema::quantity::{Quantity, Unit};

use crate::{EvaluationContext, EvaluationError, Expression};

#[derive(pest_derive::Parser)]
#[grammar = "formula.pest"]
struct FormulaParser;

/// An error parsing a formula expression from its configuration.
#[derive(Debug, thiserror::Error)]
pub enum FormulaError {
    /// The formula string does not match the grammar.
    #[error("failed to parse formula {formula:?}")]
    Parse {
        /// The offending formula string.
        formula: String,
        /// The underlying grammar error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The formula references an operand that has no bound series.
    #[error("formula {formula:?} references undeclared operand {operand:?}")]
    UnboundOperand {
        /// The offending formula string.
        formula: String,
        /// The unbound operand name.
        operand: String,
    },
}

/// Configuration for a [`FormulaExpression`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FormulaConfig {
    /// The series the formula produces.
    pub target: Fqdsn,
    /// Named operands and the series they are bound to.
    pub operands: BTreeMap<String, Fqdsn>,
    /// The arithmetic formula over the operand names.
    pub formula: String,
}

/// An expression evaluating an arithmetic formula over named operands.
///
/// The formula supports addition, subtraction, multiplication, division,
/// unary minus, parentheses, and numeric literals. Each operand identifier is
/// bound to a dependency series; evaluation resolves operands against the
/// working set by FQDSN and yields no result when any operand is absent.
#[derive(Debug)]
pub struct FormulaExpression {
    target: Fqdsn,
    dependencies: IndexSet<Fqdsn>,
    operands: BTreeMap<String, Fqdsn>,
    formula: String,
    ast: Ast,
}

impl FormulaExpression {
    /// Parses a formula expression from its configuration.
    ///
    /// Fails when the formula does not match the grammar or references an
    /// operand that is not declared in `operands`.
    pub fn new(config: FormulaConfig) -> Result<Self, FormulaError> {
        let mut pairs =
            FormulaParser::parse(Rule::formula, &config.formula).map_err(|error| {
                FormulaError::Parse {
                    formula: config.formula.clone(),
                    source: Box::new(error),
                }
            })?;

        let formula_pair = pairs.next().expect("the grammar yields one formula");
        let expr_pair = formula_pair
            .into_inner()
            .find(|pair| pair.as_rule() == Rule::expr)
            .expect("a formula always contains an expression");
        let ast = build_ast(expr_pair);

        let mut referenced = Vec::new();
        collect_operands(&ast, &mut referenced);
        for operand in referenced {
            if !config.operands.contains_key(&operand) {
                return Err(FormulaError::UnboundOperand {
                    formula: config.formula,
                    operand,
                });
            }
        }

        Ok(Self {
            target: config.target,
            dependencies: config.operands.values().cloned().collect(),
            operands: config.operands,
            formula: config.formula,
            ast,
        })
    }

    /// Returns the formula string this expression was parsed from.
    pub fn formula(&self) -> &str {
        &self.formula
    }
}

impl Expression for FormulaExpression {
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
        let mut values = BTreeMap::new();
        let mut shared_unit: Option<Option<Unit>> = None;
        let mut population_size = u64::MAX;

        for (name, fqdsn) in &self.operands {
            let Some(datum) = ctx.data.iter().find(|d| d.fqdsn == *fqdsn) else {
                return Ok(None);
            };

            values.insert(name.as_str(), datum.value.value);
            population_size = population_size.min(datum.population_size);

            // The result keeps the operands' unit only if they all agree.
            match &mut shared_unit {
                None => shared_unit = Some(datum.value.unit),
                Some(unit) if *unit != datum.value.unit => *unit = None,
                Some(_) => {}
            }
        }

        let value = eval(&self.ast, &values);
        if !value.is_finite() {
            return Err(EvaluationError::NonFinite);
        }

        Ok(Some(AggregatedData {
            fqdsn: self.target.clone(),
            host: ctx.host.clone(),
            period: ctx.period,
            period_start: ctx.period_start,
            value: Quantity {
                value,
                unit: shared_unit.flatten(),
            },
            population_size: if self.operands.is_empty() {
                0
            } else {
                population_size
            },
        }))
    }
}

impl fmt::Display for FormulaExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.target, self.formula)
    }
}

#[derive(Clone, Copy, Debug)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Debug)]
enum Ast {
    Number(f64),
    Operand(String),
    Neg(Box<Ast>),
    Binary {
        op: BinaryOp,
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
}

fn build_ast(pair: Pair<'_, Rule>) -> Ast {
    match pair.as_rule() {
        // Both levels fold left-to-right over `operand (op operand)*`.
        Rule::expr | Rule::term => {
            let mut inner = pair.into_inner();
            let first = inner.next().expect("sequences contain an operand");
            let mut ast = build_ast(first);

            while let Some(op) = inner.next() {
                let rhs = inner.next().expect("operators are followed by an operand");
                let op = match op.as_str() {
                    "+" => BinaryOp::Add,
                    "-" => BinaryOp::Sub,
                    "*" => BinaryOp::Mul,
                    _ => BinaryOp::Div,
                };
                ast = Ast::Binary {
                    op,
                    lhs: Box::new(ast),
                    rhs: Box::new(build_ast(rhs)),
                };
            }

            ast
        }
        Rule::neg => {
            let inner = pair
                .into_inner()
                .next()
                .expect("negation contains an operand");
            Ast::Neg(Box::new(build_ast(inner)))
        }
        Rule::number => Ast::Number(
            pair.as_str()
                .parse()
                .expect("number tokens are valid floats"),
        ),
        Rule::operand => Ast::Operand(pair.as_str().to_owned()),
        rule => unreachable!("unexpected rule {rule:?} in formula"),
    }
}

fn collect_operands(ast: &Ast, out: &mut Vec<String>) {
    match ast {
        Ast::Number(_) => {}
        Ast::Operand(name) => out.push(name.clone()),
        Ast::Neg(inner) => collect_operands(inner, out),
        Ast::Binary { lhs, rhs, .. } => {
            collect_operands(lhs, out);
            collect_operands(rhs, out);
        }
    }
}

fn eval(ast: &Ast, values: &BTreeMap<&str, f64>) -> f64 {
    match ast {
        Ast::Number(value) => *value,
        // Operands are validated at construction; an unknown name cannot
        // occur here, but NaN keeps this total rather than panicking.
        Ast::Operand(name) => values.get(name.as_str()).copied().unwrap_or(f64::NAN),
        Ast::Neg(inner) => -eval(inner, values),
        Ast::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs, values);
            let rhs = eval(rhs, values);
            match op {
                BinaryOp::Add => lhs + rhs,
                BinaryOp::Sub => lhs - rhs,
                BinaryOp::Mul => lhs * rhs,
                BinaryOp::Div => lhs / rhs,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use tally_base_schema::fqdsn::Name;
    use tally_base_schema::statistics::Statistic;

    use super::*;

    fn series(metric: &str, statistic: Statistic) -> Fqdsn {
        Fqdsn::new("prod", "web", metric, statistic)
    }

    fn datum(fqdsn: &Fqdsn, value: f64, unit: Option<Unit>) -> AggregatedData {
        AggregatedData {
            fqdsn: fqdsn.clone(),
            host: "app1".into(),
            period: Duration::from_secs(60),
            period_start: Utc.with_ymd_and_hms(2015, 2, 5, 10, 0, 0).unwrap(),
            value: Quantity { value, unit },
            population_size: 100,
        }
    }

    fn expression(formula: &str, operands: &[(&str, &Fqdsn)]) -> FormulaExpression {
        FormulaExpression::new(FormulaConfig {
            target: series("derived", Statistic::Mean),
            operands: operands
                .iter()
                .map(|&(name, fqdsn)| (name.to_owned(), fqdsn.clone()))
                .collect(),
            formula: formula.to_owned(),
        })
        .unwrap()
    }

    fn context<'a>(host: &'a Name, data: &'a [AggregatedData]) -> EvaluationContext<'a> {
        EvaluationContext {
            host,
            period: Duration::from_secs(60),
            period_start: Utc.with_ymd_and_hms(2015, 2, 5, 10, 0, 0).unwrap(),
            data,
        }
    }

    #[test]
    fn test_evaluate_ratio() {
        let hits = series("cache_hits", Statistic::Sum);
        let total = series("cache_requests", Statistic::Sum);
        let expression = expression("hits / total * 100", &[("hits", &hits), ("total", &total)]);

        let host: Name = "app1".into();
        let data = vec![datum(&hits, 30.0, None), datum(&total, 40.0, None)];

        let result = expression.evaluate(&context(&host, &data)).unwrap().unwrap();
        assert_eq!(result.value, Quantity::unitless(75.0));
        assert_eq!(result.fqdsn, series("derived", Statistic::Mean));
        assert_eq!(result.population_size, 100);
    }

    #[test]
    fn test_evaluate_precedence_and_negation() {
        let a = series("a", Statistic::Mean);
        let b = series("b", Statistic::Mean);
        let expression = expression("a + b * 2", &[("a", &a), ("b", &b)]);

        let host: Name = "app1".into();
        let data = vec![datum(&a, 1.0, None), datum(&b, 3.0, None)];
        let result = expression.evaluate(&context(&host, &data)).unwrap().unwrap();
        assert_eq!(result.value.value, 7.0);

        let negated = FormulaExpression::new(FormulaConfig {
            target: series("negated", Statistic::Mean),
            operands: [("a".to_owned(), a.clone())].into_iter().collect(),
            formula: "-(a + 1) * 2".to_owned(),
        })
        .unwrap();
        let result = negated.evaluate(&context(&host, &data)).unwrap().unwrap();
        assert_eq!(result.value.value, -4.0);
    }

    #[test]
    fn test_missing_operand_yields_no_result() {
        let a = series("a", Statistic::Mean);
        let b = series("b", Statistic::Mean);
        let expression = expression("a + b", &[("a", &a), ("b", &b)]);

        let host: Name = "app1".into();
        let data = vec![datum(&a, 1.0, None)];

        assert!(expression.evaluate(&context(&host, &data)).unwrap().is_none());
    }

    #[test]
    fn test_division_by_zero_fails() {
        let a = series("a", Statistic::Mean);
        let b = series("b", Statistic::Mean);
        let expression = expression("a / b", &[("a", &a), ("b", &b)]);

        let host: Name = "app1".into();
        let data = vec![datum(&a, 1.0, None), datum(&b, 0.0, None)];

        let result = expression.evaluate(&context(&host, &data));
        assert!(matches!(result, Err(EvaluationError::NonFinite)));
    }

    #[test]
    fn test_units_kept_when_shared() {
        let a = series("a", Statistic::Mean);
        let b = series("b", Statistic::Mean);
        let expression = expression("a + b", &[("a", &a), ("b", &b)]);

        let host: Name = "app1".into();

        let shared = vec![
            datum(&a, 1.0, Some(Unit::Millisecond)),
            datum(&b, 2.0, Some(Unit::Millisecond)),
        ];
        let result = expression.evaluate(&context(&host, &shared)).unwrap().unwrap();
        assert_eq!(result.value, Quantity::new(3.0, Unit::Millisecond));

        let mixed = vec![
            datum(&a, 1.0, Some(Unit::Millisecond)),
            datum(&b, 2.0, Some(Unit::Byte)),
        ];
        let result = expression.evaluate(&context(&host, &mixed)).unwrap().unwrap();
        assert_eq!(result.value, Quantity::unitless(3.0));
    }

    #[test]
    fn test_unbound_operand_is_rejected() {
        let a = series("a", Statistic::Mean);
        let result = FormulaExpression::new(FormulaConfig {
            target: series("derived", Statistic::Mean),
            operands: [("a".to_owned(), a)].into_iter().collect(),
            formula: "a + b".to_owned(),
        });

        match result {
            Err(FormulaError::UnboundOperand { operand, .. }) => assert_eq!(operand, "b"),
            other => panic!("expected unbound operand error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_formula_is_rejected() {
        let result = FormulaExpression::new(FormulaConfig {
            target: series("derived", Statistic::Mean),
            operands: BTreeMap::new(),
            formula: "1 +".to_owned(),
        });

        assert!(matches!(result, Err(FormulaError::Parse { .. })));
    }

    #[test]
    fn test_constant_formula() {
        let expression = FormulaExpression::new(FormulaConfig {
            target: series("constant", Statistic::Mean),
            operands: BTreeMap::new(),
            formula: "(2 + 3) * 10".to_owned(),
        })
        .unwrap();

        let host: Name = "app1".into();
        let result = expression.evaluate(&context(&host, &[])).unwrap().unwrap();
        assert_eq!(result.value, Quantity::unitless(50.0));
        assert_eq!(result.population_size, 0);
    }
}
