use super::EventEvaluator;
use crate::domain::{EquipmentEventDescriptor, StdMessage, CATEGORY_EVENT};
use crate::equipment::{HandlerContext, ManagedEquipment, TagChangeHandler};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Tag handler that evaluates an equipment's event definitions after each
/// tag change and records the events that fire.
///
/// Runs on the equipment's own task, so the evaluator always reads the
/// property map the preceding handlers just updated. Fired events are
/// appended to the equipment's event log and, when an outbox is attached,
/// queued for publication as `EVENT` messages.
pub struct EventTriggerHandler {
    evaluator: Arc<EventEvaluator>,
    event_definition_ids: Vec<String>,
    outbox: Option<mpsc::UnboundedSender<StdMessage>>,
}

impl EventTriggerHandler {
    pub fn new(
        evaluator: Arc<EventEvaluator>,
        event_definition_ids: Vec<String>,
        outbox: Option<mpsc::UnboundedSender<StdMessage>>,
    ) -> Self {
        Self {
            evaluator,
            event_definition_ids,
            outbox,
        }
    }

    fn event_message(equipment: &ManagedEquipment, event: &EquipmentEventDescriptor) -> Result<StdMessage> {
        let item_name = if event.name.is_empty() {
            event.event_definition_id.clone()
        } else {
            event.name.clone()
        };
        let item_value =
            serde_json::to_string(&event.payload).context("Failed to serialize event payload")?;

        Ok(StdMessage {
            owning_asset_id: equipment.equipment_id().to_string(),
            owning_asset: equipment.equipment_name().to_string(),
            item_name,
            item_value,
            item_data_type: "JSON".to_string(),
            category: CATEGORY_EVENT.to_string(),
            topic: String::new(),
            timestamp: Some(event.timestamp),
        })
    }
}

impl TagChangeHandler for EventTriggerHandler {
    fn name(&self) -> &str {
        "event-trigger"
    }

    fn handle_tag_change(
        &self,
        _tag: &StdMessage,
        equipment: &mut ManagedEquipment,
        context: &mut HandlerContext,
    ) -> Result<()> {
        let mut failures = Vec::new();

        for id in &self.event_definition_ids {
            let evaluation = match self.evaluator.evaluate(equipment, id, Some(&*context)) {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    failures.push(format!("{}: {}", id, e));
                    continue;
                }
            };
            if !evaluation.fired {
                continue;
            }

            // A field failure still records the event with whatever payload was built
            if let Some(e) = &evaluation.field_error {
                failures.push(format!("{}: {}", id, e));
            }

            let event = EquipmentEventDescriptor::new(
                equipment.equipment_id(),
                &evaluation.definition,
                evaluation.payload.unwrap_or_default(),
            );
            info!(
                equipment_id = %equipment.equipment_id(),
                event_definition_id = %id,
                event_id = %event.id,
                "Event fired"
            );

            if let Some(outbox) = &self.outbox {
                let message = Self::event_message(equipment, &event)?;
                if outbox.send(message).is_err() {
                    warn!(event_id = %event.id, "Event outbox closed, event not published");
                }
            }
            equipment.add_event(event);
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("event evaluation failed: {}", failures.join("; ")))
        }
    }

    fn ack_message(&self, error: Option<&anyhow::Error>) -> String {
        match error {
            None => "events evaluated;".to_string(),
            Some(e) => format!("{};", e),
        }
    }
}
