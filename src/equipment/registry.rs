use super::{EquipmentError, EquipmentHandle, ManagedEquipment, TagChangeHandler};
use crate::domain::{Equipment, ServiceType};
use crate::store::DataStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Running equipment actors, addressable by equipment id or name
pub struct EquipmentRegistry {
    store: Arc<dyn DataStore>,
    handles: DashMap<String, EquipmentHandle>,
    names: DashMap<String, String>,
    tasks: DashMap<String, JoinHandle<()>>,
}

impl EquipmentRegistry {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            handles: DashMap::new(),
            names: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    /// Builds the actor for `equipment` and spawns its request loop.
    ///
    /// An equipment id that is already running is rejected, as is a name
    /// already routed to another running equipment.
    pub fn spawn(
        &self,
        equipment: Equipment,
        handlers: Vec<Arc<dyn TagChangeHandler>>,
    ) -> Result<EquipmentHandle, EquipmentError> {
        let id = equipment.id.clone();

        // Both slots stay locked until the handle is in place
        let Entry::Vacant(handle_slot) = self.handles.entry(id.clone()) else {
            return Err(EquipmentError::ProtocolViolation(format!(
                "equipment '{}' is already running",
                id
            )));
        };
        let Entry::Vacant(name_slot) = self.names.entry(equipment.name.clone()) else {
            warn!(equipment_id = %id, name = %equipment.name, "Equipment name already in use");
            return Err(EquipmentError::ProtocolViolation(format!(
                "equipment name '{}' is already used by another running equipment",
                equipment.name
            )));
        };

        let (actor, handle) = ManagedEquipment::new(equipment, self.store.as_ref())?;

        let task = tokio::spawn(actor.run(handlers));
        self.tasks.insert(id.clone(), task);
        name_slot.insert(id.clone());
        handle_slot.insert(handle.clone());

        info!(equipment_id = %id, name = %handle.equipment_name(), "Equipment actor started");
        Ok(handle)
    }

    /// Loads the equipment from the data store, then [`spawn`](Self::spawn)s it.
    pub fn spawn_by_id(
        &self,
        equipment_id: &str,
        handlers: Vec<Arc<dyn TagChangeHandler>>,
    ) -> Result<EquipmentHandle, EquipmentError> {
        let equipment = {
            let txn = self
                .store
                .begin_transaction(true, &format!("loadEquipment{}", equipment_id))?;
            txn.equipment_by_id(equipment_id)?
        };
        self.spawn(equipment, handlers)
    }

    pub fn get_by_id(&self, equipment_id: &str) -> Option<EquipmentHandle> {
        self.handles.get(equipment_id).map(|h| h.clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<EquipmentHandle> {
        let id = self.names.get(name).map(|id| id.clone())?;
        self.get_by_id(&id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Sends SHUTDOWN to every actor and waits for their loops to finish.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.handles.iter().map(|h| h.key().clone()).collect();

        for id in ids {
            let Some((_, handle)) = self.handles.remove(&id) else {
                continue;
            };
            self.names.remove(handle.equipment_name());

            match handle.shutdown().await {
                Ok(ack) if ack.service_type == ServiceType::ShutdownAck => {
                    info!(equipment_id = %id, message = %ack.message, "Equipment shut down");
                }
                Ok(ack) => {
                    warn!(equipment_id = %id, service_type = %ack.service_type, "Unexpected shutdown reply");
                }
                Err(e) => {
                    error!(equipment_id = %id, error = %e, "Failed to shut down equipment");
                }
            }

            if let Some((_, task)) = self.tasks.remove(&id) {
                if let Err(e) = task.await {
                    error!(equipment_id = %id, error = %e, "Equipment task ended abnormally");
                }
            }
        }
    }
}
