use super::{DataStore, StoreError, StoreTransaction};
use crate::domain::{Equipment, EquipmentClass, EventDefinition};
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// In-memory data store
///
/// Lock-free maps keyed by id. Transactions are views with no isolation;
/// the store only counts how many are open so callers can verify disposal.
#[derive(Default)]
pub struct MemoryStore {
    equipment: DashMap<String, Equipment>,
    classes: DashMap<String, EquipmentClass>,
    event_definitions: DashMap<String, EventDefinition>,
    open_transactions: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_equipment(&self, equipment: Equipment) {
        self.equipment.insert(equipment.id.clone(), equipment);
    }

    pub fn insert_equipment_class(&self, class: EquipmentClass) {
        self.classes.insert(class.id.clone(), class);
    }

    pub fn insert_event_definition(&self, definition: EventDefinition) {
        self.event_definitions.insert(definition.id.clone(), definition);
    }

    pub fn remove_equipment_class(&self, id: &str) -> Option<EquipmentClass> {
        self.classes.remove(id).map(|(_, class)| class)
    }

    /// Number of transactions not yet dropped
    pub fn open_transactions(&self) -> usize {
        self.open_transactions.load(Ordering::SeqCst)
    }
}

impl DataStore for MemoryStore {
    fn begin_transaction(
        &self,
        read_only: bool,
        label: &str,
    ) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        self.open_transactions.fetch_add(1, Ordering::SeqCst);
        debug!(label = %label, read_only, "Opened memory transaction");
        Ok(Box::new(MemoryTransaction {
            store: self,
            label: label.to_string(),
        }))
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    label: String,
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn label(&self) -> &str {
        &self.label
    }

    fn equipment_by_id(&self, id: &str) -> Result<Equipment, StoreError> {
        self.store
            .equipment
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| StoreError::not_found("equipment", id))
    }

    fn equipment_class_by_id(&self, id: &str) -> Result<EquipmentClass, StoreError> {
        self.store
            .classes
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| StoreError::not_found("equipment class", id))
    }

    fn event_definition_by_id(&self, id: &str) -> Result<EventDefinition, StoreError> {
        self.store
            .event_definitions
            .get(id)
            .map(|d| d.clone())
            .ok_or_else(|| StoreError::not_found("event definition", id))
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        self.store.open_transactions.fetch_sub(1, Ordering::SeqCst);
        debug!(label = %self.label, "Released memory transaction");
    }
}
