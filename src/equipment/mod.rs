// Managed equipment actors: property resolution, request loop, tag handlers

mod actor;
mod handler;
mod registry;
mod resolver;

pub use actor::{EquipmentHandle, ManagedEquipment};
pub use handler::{HandlerContext, PropertyUpdateHandler, TagChangeHandler, UPDATED_PROPERTY_KEY};
pub use registry::EquipmentRegistry;
pub use resolver::{resolve_descriptors, resolve_properties, PartialResolution};

use crate::domain::ConversionError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by managed equipment operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EquipmentError {
    /// Request type the actor does not serve, or an out-of-turn interaction
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("equipment '{0}' is no longer accepting requests")]
    ActorStopped(String),

    #[error("equipment '{equipment}' has no property '{property}'")]
    UnknownProperty { equipment: String, property: String },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests;
