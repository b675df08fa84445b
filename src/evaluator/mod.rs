//! Event definition evaluation.
//!
//! An event definition fires when its trigger expression evaluates to
//! `true` over the equipment's current property values (overlaid with any
//! caller context). A fired definition yields a payload built from its
//! field expressions and copied property values.

mod expression;
mod trigger;

pub use expression::{EvalValue, ExpressionError};
pub use trigger::EventTriggerHandler;

use crate::domain::{EventDefinition, PropertyValue};
use crate::equipment::{HandlerContext, ManagedEquipment};
use crate::store::{DataStore, StoreError};
use expression::{json_variable, property_variable, Environment};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Failures that prevent an evaluation from producing a verdict
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

/// Outcome of evaluating one event definition
#[derive(Debug, Clone)]
pub struct EventEvaluation {
    pub fired: bool,
    pub definition: EventDefinition,

    /// Present only when the trigger fired
    pub payload: Option<HashMap<String, Value>>,

    /// First payload field that failed. Fields after it are absent from the
    /// payload; payload properties are still included.
    pub field_error: Option<ExpressionError>,
}

impl EventEvaluation {
    fn not_fired(definition: EventDefinition) -> Self {
        Self {
            fired: false,
            definition,
            payload: None,
            field_error: None,
        }
    }
}

/// Evaluates persisted event definitions against managed equipment state
pub struct EventEvaluator {
    store: Arc<dyn DataStore>,
}

impl EventEvaluator {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// Evaluates the definition `event_definition_id` for `equipment`.
    ///
    /// `extra_context` entries override property values of the same name.
    /// A trigger that does not produce a boolean counts as not fired.
    pub fn evaluate(
        &self,
        equipment: &ManagedEquipment,
        event_definition_id: &str,
        extra_context: Option<&HandlerContext>,
    ) -> Result<EventEvaluation, EvaluationError> {
        let definition = {
            let txn = self.store.begin_transaction(true, "evteval")?;
            txn.event_definition_by_id(event_definition_id)
                .inspect_err(|e| error!(error = %e, "Failed to load event definition"))?
        };

        let env = Environment::new(variables(equipment, extra_context))?;

        debug!(
            equipment_id = %equipment.equipment_id(),
            event_definition_id = %definition.id,
            trigger = %definition.trigger_expression,
            "Evaluating event trigger"
        );
        let verdict = env
            .evaluate(&definition.trigger_expression)
            .inspect_err(|e| error!(error = %e, "Trigger evaluation failed"))?;

        let fired = match verdict {
            EvalValue::Boolean(b) => b,
            other => {
                error!(
                    event_definition_id = %definition.id,
                    result = ?other,
                    "Trigger did not evaluate to a boolean"
                );
                return Ok(EventEvaluation::not_fired(definition));
            }
        };

        if !fired {
            return Ok(EventEvaluation::not_fired(definition));
        }

        info!(
            equipment_id = %equipment.equipment_id(),
            event_definition_id = %definition.id,
            "Event trigger tested true"
        );

        let mut payload = HashMap::new();
        let mut field_error = None;

        for field in &definition.payload_fields {
            match env.evaluate(&field.expression) {
                Ok(value) => {
                    payload.insert(field.name.clone(), value.to_json());
                }
                Err(e) => {
                    error!(field = %field.name, error = %e, "Payload field evaluation failed");
                    field_error = Some(e);
                    break;
                }
            }
        }

        for name in &definition.payload_properties {
            let value = equipment
                .property_value(name)
                .map(PropertyValue::to_json)
                .unwrap_or(Value::Null);
            payload.insert(name.clone(), value);
        }

        Ok(EventEvaluation {
            fired: true,
            definition,
            payload: Some(payload),
            field_error,
        })
    }
}

/// Property values overlaid with caller context (context wins)
fn variables(
    equipment: &ManagedEquipment,
    extra_context: Option<&HandlerContext>,
) -> HashMap<String, evalexpr::Value> {
    let mut vars: HashMap<String, evalexpr::Value> = equipment
        .property_map()
        .iter()
        .filter_map(|(name, prop)| {
            prop.value
                .as_ref()
                .map(|value| (name.clone(), property_variable(value)))
        })
        .collect();

    for (name, value) in extra_context.into_iter().flatten() {
        match json_variable(value) {
            Some(var) => {
                vars.insert(name.clone(), var);
            }
            None => {
                debug!(name = %name, "Context value has no expression form, hiding it");
                vars.remove(name);
            }
        }
    }

    vars
}
