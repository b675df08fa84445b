//! Data-store port for equipment master data.
//!
//! Lookups happen inside a transaction opened per logical operation with
//! [`DataStore::begin_transaction`]. The transaction is released when the
//! returned box is dropped, so every exit path (including `?`) disposes it.
//!
//! Two adapters are provided:
//! - [`MemoryStore`]: DashMap-backed, used by tests and for seeding from config
//! - [`SqliteStore`]: persistent store backed by SQLite

use crate::domain::{Equipment, EquipmentClass, EventDefinition};
use thiserror::Error;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Data-store errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("equipment class '{0}' appears twice in its own ancestry")]
    ClassCycle(String),

    #[error("data store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Scoped view over the data store
pub trait StoreTransaction {
    /// Label given when the transaction was opened (for logging)
    fn label(&self) -> &str;

    fn equipment_by_id(&self, id: &str) -> Result<Equipment, StoreError>;

    /// Class with its declared properties and parent reference
    fn equipment_class_by_id(&self, id: &str) -> Result<EquipmentClass, StoreError>;

    fn event_definition_by_id(&self, id: &str) -> Result<EventDefinition, StoreError>;
}

/// Source of transactions over equipment master data
pub trait DataStore: Send + Sync {
    fn begin_transaction(
        &self,
        read_only: bool,
        label: &str,
    ) -> Result<Box<dyn StoreTransaction + '_>, StoreError>;
}
