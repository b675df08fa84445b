use super::ManagedEquipment;
use crate::domain::StdMessage;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;

/// Scratch values shared by the handlers of a single TAGDATA request
pub type HandlerContext = HashMap<String, Value>;

/// Context key under which [`PropertyUpdateHandler`] records the property it changed
pub const UPDATED_PROPERTY_KEY: &str = "updated_property";

/// Equipment-specific interpretation of a raw tag change.
///
/// Handlers run on the equipment's own task, in registration order, for
/// every TAGDATA request. A failing handler does not stop the ones after it.
pub trait TagChangeHandler: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    fn handle_tag_change(
        &self,
        tag: &StdMessage,
        equipment: &mut ManagedEquipment,
        context: &mut HandlerContext,
    ) -> Result<()>;

    /// Text appended to the TAGDATA acknowledgement for this handler
    fn ack_message(&self, error: Option<&anyhow::Error>) -> String;
}

/// Maps a tag directly onto the equipment property of the same name
#[derive(Debug, Default, Clone, Copy)]
pub struct PropertyUpdateHandler;

impl TagChangeHandler for PropertyUpdateHandler {
    fn name(&self) -> &str {
        "property-update"
    }

    fn handle_tag_change(
        &self,
        tag: &StdMessage,
        equipment: &mut ManagedEquipment,
        context: &mut HandlerContext,
    ) -> Result<()> {
        equipment.update_property_value(&tag.item_name, &tag.item_value)?;
        context.insert(
            UPDATED_PROPERTY_KEY.to_string(),
            Value::String(tag.item_name.clone()),
        );
        Ok(())
    }

    fn ack_message(&self, error: Option<&anyhow::Error>) -> String {
        match error {
            None => "property updated;".to_string(),
            Some(e) => format!("property update failed: {};", e),
        }
    }
}
