//! Type-tag registry for expression constructors.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::formula::{FormulaConfig, FormulaError, FormulaExpression};
use crate::Expression;

/// A single expression configuration document.
///
/// Documents carry a `type` tag selecting the expression constructor; all
/// remaining fields are the constructor's parameters. Deserializing the
/// surrounding list is the configuration transport's concern, this crate only
/// consumes the typed result.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExpressionDocument {
    /// The registered expression type tag.
    #[serde(rename = "type")]
    pub expression_type: String,
    /// The constructor parameters.
    #[serde(flatten)]
    pub params: serde_json::Value,
}

/// An error raised when two constructors claim the same type tag.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("expression type {0:?} is already registered")]
pub struct DuplicateExpressionTypeError(
    /// The contested type tag.
    pub &'static str,
);

/// An error parsing an expression configuration document.
///
/// Any parse error rejects the whole candidate expression set; the caller
/// keeps the previously active plan.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionParseError {
    /// The document's type tag has no registered constructor.
    #[error("unknown expression type {0:?}")]
    UnknownType(String),
    /// The document's parameters do not deserialize.
    #[error("invalid expression configuration")]
    InvalidConfig(#[from] serde_json::Error),
    /// The formula constructor rejected its configuration.
    #[error(transparent)]
    Formula(#[from] FormulaError),
}

/// A constructor turning document parameters into an expression.
pub type ExpressionConstructor =
    fn(serde_json::Value) -> Result<Arc<dyn Expression>, ExpressionParseError>;

/// Maps expression type tags to constructors.
///
/// The registry is populated explicitly at startup and immutable afterwards;
/// there is no runtime discovery of expression implementations. Registering
/// the same tag twice is a construction-time defect and fails fast.
#[derive(Clone, Debug)]
pub struct ExpressionRegistry {
    constructors: HashMap<&'static str, ExpressionConstructor>,
}

impl ExpressionRegistry {
    /// Creates a registry with the built-in expression types registered.
    pub fn new() -> Result<Self, DuplicateExpressionTypeError> {
        let mut registry = Self {
            constructors: HashMap::new(),
        };

        registry.register("formula", |params| {
            let config: FormulaConfig = serde_json::from_value(params)?;
            Ok(Arc::new(FormulaExpression::new(config)?))
        })?;

        Ok(registry)
    }

    /// Registers a constructor for a type tag.
    ///
    /// Fails when the tag is already claimed.
    pub fn register(
        &mut self,
        tag: &'static str,
        constructor: ExpressionConstructor,
    ) -> Result<(), DuplicateExpressionTypeError> {
        if self.constructors.insert(tag, constructor).is_some() {
            return Err(DuplicateExpressionTypeError(tag));
        }
        Ok(())
    }

    /// Parses a list of configuration documents into expressions.
    ///
    /// Any unknown type tag or invalid document fails the whole list.
    pub fn parse(
        &self,
        documents: Vec<ExpressionDocument>,
    ) -> Result<Vec<Arc<dyn Expression>>, ExpressionParseError> {
        documents
            .into_iter()
            .map(|document| {
                let constructor = self
                    .constructors
                    .get(document.expression_type.as_str())
                    .ok_or(ExpressionParseError::UnknownType(document.expression_type))?;
                constructor(document.params)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formula_document(metric: &str, formula: &str) -> ExpressionDocument {
        serde_json::from_value(serde_json::json!({
            "type": "formula",
            "target": {
                "cluster": "prod",
                "service": "web",
                "metric": metric,
                "statistic": "mean",
            },
            "operands": {
                "a": {
                    "cluster": "prod",
                    "service": "web",
                    "metric": "raw",
                    "statistic": "mean",
                },
            },
            "formula": formula,
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_formula_document() {
        let registry = ExpressionRegistry::new().unwrap();
        let expressions = registry
            .parse(vec![formula_document("derived", "a * 2")])
            .unwrap();

        assert_eq!(expressions.len(), 1);
        assert_eq!(expressions[0].target().metric, *"derived");
        assert_eq!(expressions[0].dependencies().len(), 1);
    }

    #[test]
    fn test_unknown_type_rejects_the_list() {
        let registry = ExpressionRegistry::new().unwrap();

        let mut document = formula_document("derived", "a * 2");
        document.expression_type = "lua".to_owned();

        let result = registry.parse(vec![document]);
        match result {
            Err(ExpressionParseError::UnknownType(tag)) => assert_eq!(tag, "lua"),
            other => panic!("expected unknown type error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_document_rejects_the_list() {
        let registry = ExpressionRegistry::new().unwrap();

        let document = ExpressionDocument {
            expression_type: "formula".to_owned(),
            params: serde_json::json!({"formula": 42}),
        };

        assert!(matches!(
            registry.parse(vec![document]),
            Err(ExpressionParseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_duplicate_type_registration_fails() {
        let mut registry = ExpressionRegistry::new().unwrap();
        let result = registry.register("formula", |_| unreachable!());
        assert_eq!(result, Err(DuplicateExpressionTypeError("formula")));
    }
}
