use crate::domain::{convert_property_value, EquipmentPropertyDescriptor, Property};
use crate::store::{StoreError, StoreTransaction};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, error};

/// Resolution stopped before the class chain was exhausted.
///
/// `properties` holds everything merged before the failing lookup.
#[derive(Debug, Error)]
#[error("property resolution for equipment '{equipment_id}' stopped early: {source}")]
pub struct PartialResolution {
    pub equipment_id: String,
    pub properties: HashMap<String, Property>,
    pub source: StoreError,
}

/// Collects the properties of an equipment instance and its class ancestry.
///
/// The instance's own properties seed the result. The class chain is then
/// walked from the immediate class up through each parent, merging every
/// class's properties by name. A later (more distant) definition overwrites
/// an earlier one, so ancestor classes take precedence over nearer classes
/// and over the instance itself.
pub fn resolve_properties(
    txn: &dyn StoreTransaction,
    equipment_id: &str,
) -> Result<HashMap<String, Property>, PartialResolution> {
    let mut properties = HashMap::new();

    let fail = |properties: HashMap<String, Property>, source: StoreError| PartialResolution {
        equipment_id: equipment_id.to_string(),
        properties,
        source,
    };

    let equipment = match txn.equipment_by_id(equipment_id) {
        Ok(eq) => eq,
        Err(e) => return Err(fail(properties, e)),
    };

    for prop in equipment.properties {
        properties.insert(prop.name.clone(), prop);
    }

    let mut visited = HashSet::new();
    let mut next_class = equipment.equipment_class_id;

    while let Some(class_id) = next_class.filter(|id| !id.is_empty()) {
        if !visited.insert(class_id.clone()) {
            return Err(fail(properties, StoreError::ClassCycle(class_id)));
        }

        let class = match txn.equipment_class_by_id(&class_id) {
            Ok(class) => class,
            Err(e) => return Err(fail(properties, e)),
        };

        debug!(
            equipment_id = %equipment_id,
            class_id = %class.id,
            count = class.properties.len(),
            "Merging class properties"
        );
        for prop in class.properties {
            properties.insert(prop.name.clone(), prop);
        }

        next_class = class.parent_id;
    }

    Ok(properties)
}

/// Converts raw merged properties into typed descriptors.
///
/// A property whose value fails conversion keeps an unset value; the
/// failure is logged and the remaining properties are still converted.
pub fn resolve_descriptors(
    properties: HashMap<String, Property>,
) -> HashMap<String, EquipmentPropertyDescriptor> {
    properties
        .into_iter()
        .map(|(name, prop)| {
            let value = prop.value.as_deref().and_then(|raw| {
                convert_property_value(prop.data_type, raw)
                    .map_err(|e| {
                        error!(
                            property = %prop.name,
                            raw = %raw,
                            error = %e,
                            "Failed data format conversion for property"
                        );
                    })
                    .ok()
            });

            let class_property_id = prop.equipment_class_id.as_ref().map(|_| prop.id.clone());

            let descriptor = EquipmentPropertyDescriptor {
                name: name.clone(),
                data_type: prop.data_type,
                value,
                class_property_id,
                equipment_class_id: prop.equipment_class_id,
                last_update: None,
            };
            (name, descriptor)
        })
        .collect()
}
