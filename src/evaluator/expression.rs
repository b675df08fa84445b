//! Thin layer over `evalexpr` turning its dynamic results into [`EvalValue`].

use crate::domain::PropertyValue;
use evalexpr::{ContextWithMutableVariables, HashMapContext, Value as ExprValue};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Expression failed to parse or evaluate
#[derive(Debug, Clone, PartialEq, Error)]
#[error("expression '{expression}' failed: {message}")]
pub struct ExpressionError {
    pub expression: String,
    pub message: String,
}

/// Result of evaluating one expression
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Tuples and empty values; carries the kind for logging
    Unsupported(String),
}

impl EvalValue {
    /// JSON form stored in event payloads. Unsupported values become null.
    pub fn to_json(&self) -> Value {
        match self {
            EvalValue::Boolean(b) => Value::Bool(*b),
            EvalValue::Int(i) => Value::from(*i),
            EvalValue::Float(f) => Value::from(*f),
            EvalValue::String(s) => Value::String(s.clone()),
            EvalValue::Unsupported(_) => Value::Null,
        }
    }
}

impl From<ExprValue> for EvalValue {
    fn from(value: ExprValue) -> Self {
        match value {
            ExprValue::Boolean(b) => EvalValue::Boolean(b),
            ExprValue::Int(i) => EvalValue::Int(i),
            ExprValue::Float(f) => EvalValue::Float(f),
            ExprValue::String(s) => EvalValue::String(s),
            ExprValue::Tuple(items) => EvalValue::Unsupported(format!("tuple of {}", items.len())),
            ExprValue::Empty => EvalValue::Unsupported("empty".to_string()),
        }
    }
}

/// Variable value for a typed property. Timestamps become epoch milliseconds
/// so they can be compared arithmetically.
pub fn property_variable(value: &PropertyValue) -> ExprValue {
    match value {
        PropertyValue::String(s) => ExprValue::String(s.clone()),
        PropertyValue::Int(i) => ExprValue::Int(*i),
        PropertyValue::Float(f) => ExprValue::Float(*f),
        PropertyValue::Bool(b) => ExprValue::Boolean(*b),
        PropertyValue::DateTime(ts) => ExprValue::Int(ts.timestamp_millis()),
    }
}

/// Variable value for a caller-supplied JSON value. Objects have no
/// expression equivalent and yield `None`.
pub fn json_variable(value: &Value) -> Option<ExprValue> {
    match value {
        Value::Null => Some(ExprValue::Empty),
        Value::Bool(b) => Some(ExprValue::Boolean(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(ExprValue::Int(i)),
            None => n.as_f64().map(ExprValue::Float),
        },
        Value::String(s) => Some(ExprValue::String(s.clone())),
        Value::Array(items) => items
            .iter()
            .map(json_variable)
            .collect::<Option<Vec<_>>>()
            .map(ExprValue::Tuple),
        Value::Object(_) => None,
    }
}

/// Evaluation environment built once per evaluation call
pub struct Environment {
    context: HashMapContext,
}

impl Environment {
    pub fn new(variables: HashMap<String, ExprValue>) -> Result<Self, ExpressionError> {
        let mut context = HashMapContext::new();
        for (name, value) in variables {
            context
                .set_value(name.clone(), value)
                .map_err(|e| ExpressionError {
                    expression: name,
                    message: e.to_string(),
                })?;
        }
        Ok(Self { context })
    }

    pub fn evaluate(&self, expression: &str) -> Result<EvalValue, ExpressionError> {
        let value = evalexpr::eval_with_context(expression, &self.context).map_err(|e| {
            ExpressionError {
                expression: expression.to_string(),
                message: e.to_string(),
            }
        })?;
        debug!(expression = %expression, result = ?value, "Evaluated expression");
        Ok(value.into())
    }
}
