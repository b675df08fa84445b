//! Equipment master data persisted in SQLite.

use super::{DataStore, StoreError, StoreTransaction};
use crate::domain::{
    DataType, Equipment, EquipmentClass, EquipmentLevel, EventDefinition, PayloadField, Property,
};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Equipment data store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE equipment_class (id TEXT PRIMARY KEY, name TEXT, parent_id TEXT);
/// CREATE TABLE equipment (id TEXT PRIMARY KEY, name TEXT, description TEXT,
///                         equipment_level TEXT, equipment_class_id TEXT);
/// CREATE TABLE property (id TEXT PRIMARY KEY, name TEXT, data_type TEXT, value TEXT,
///                        equipment_id TEXT, equipment_class_id TEXT);
/// CREATE TABLE event_definition (id TEXT PRIMARY KEY, name TEXT, trigger_expression TEXT,
///                                payload_fields TEXT,      -- JSON array of {name, expression}
///                                payload_properties TEXT); -- JSON array of names
/// ```
///
/// A property row belongs to exactly one of `equipment_id` / `equipment_class_id`.
/// The connection is wrapped in a Mutex; an open transaction holds the lock
/// until it is dropped.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database and ensures the schema exists.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open equipment DB at {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// In-memory database, mostly useful in tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory DB")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS equipment_class (
                id        TEXT PRIMARY KEY,
                name      TEXT NOT NULL,
                parent_id TEXT
            );
            CREATE TABLE IF NOT EXISTS equipment (
                id                 TEXT PRIMARY KEY,
                name               TEXT NOT NULL,
                description        TEXT NOT NULL DEFAULT '',
                equipment_level    TEXT NOT NULL DEFAULT 'Other',
                equipment_class_id TEXT
            );
            CREATE TABLE IF NOT EXISTS property (
                id                 TEXT PRIMARY KEY,
                name               TEXT NOT NULL,
                data_type          TEXT NOT NULL,
                value              TEXT,
                equipment_id       TEXT,
                equipment_class_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_property_equipment ON property(equipment_id);
            CREATE INDEX IF NOT EXISTS idx_property_class ON property(equipment_class_id);
            CREATE TABLE IF NOT EXISTS event_definition (
                id                 TEXT PRIMARY KEY,
                name               TEXT NOT NULL DEFAULT '',
                trigger_expression TEXT NOT NULL,
                payload_fields     TEXT NOT NULL DEFAULT '[]',
                payload_properties TEXT NOT NULL DEFAULT '[]'
            );",
        )
        .context("Failed to create equipment schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("connection mutex poisoned".to_string()))
    }

    /// Inserts or replaces an equipment row and its own properties.
    pub fn upsert_equipment(&self, equipment: &Equipment) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin write transaction")?;
        tx.execute(
            "INSERT OR REPLACE INTO equipment (id, name, description, equipment_level, equipment_class_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                equipment.id,
                equipment.name,
                equipment.description,
                equipment.equipment_level.as_str(),
                equipment.equipment_class_id,
            ],
        )
        .context("Failed to upsert equipment")?;
        tx.execute(
            "DELETE FROM property WHERE equipment_id = ?1",
            params![equipment.id],
        )
        .context("Failed to clear equipment properties")?;
        for prop in &equipment.properties {
            tx.execute(
                "INSERT OR REPLACE INTO property (id, name, data_type, value, equipment_id, equipment_class_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
                params![prop.id, prop.name, prop.data_type.as_str(), prop.value, equipment.id],
            )
            .context("Failed to insert equipment property")?;
        }
        tx.commit().context("Failed to commit equipment")?;
        Ok(())
    }

    /// Inserts or replaces a class row and its declared properties.
    pub fn upsert_equipment_class(&self, class: &EquipmentClass) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin write transaction")?;
        tx.execute(
            "INSERT OR REPLACE INTO equipment_class (id, name, parent_id) VALUES (?1, ?2, ?3)",
            params![class.id, class.name, class.parent_id],
        )
        .context("Failed to upsert equipment class")?;
        tx.execute(
            "DELETE FROM property WHERE equipment_class_id = ?1 AND equipment_id IS NULL",
            params![class.id],
        )
        .context("Failed to clear class properties")?;
        for prop in &class.properties {
            tx.execute(
                "INSERT OR REPLACE INTO property (id, name, data_type, value, equipment_id, equipment_class_id)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
                params![prop.id, prop.name, prop.data_type.as_str(), prop.value, class.id],
            )
            .context("Failed to insert class property")?;
        }
        tx.commit().context("Failed to commit equipment class")?;
        Ok(())
    }

    pub fn upsert_event_definition(&self, definition: &EventDefinition) -> Result<()> {
        let fields = serde_json::to_string(&definition.payload_fields)
            .context("Failed to serialize payload fields")?;
        let props = serde_json::to_string(&definition.payload_properties)
            .context("Failed to serialize payload properties")?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO event_definition
                (id, name, trigger_expression, payload_fields, payload_properties)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                definition.id,
                definition.name,
                definition.trigger_expression,
                fields,
                props
            ],
        )
        .context("Failed to upsert event definition")?;
        Ok(())
    }
}

impl DataStore for SqliteStore {
    fn begin_transaction(
        &self,
        read_only: bool,
        label: &str,
    ) -> Result<Box<dyn StoreTransaction + '_>, StoreError> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN DEFERRED")?;
        debug!(label = %label, read_only, "Opened SQLite transaction");
        Ok(Box::new(SqliteTransaction {
            conn,
            label: label.to_string(),
            read_only,
        }))
    }
}

struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    label: String,
    read_only: bool,
}

impl SqliteTransaction<'_> {
    fn properties_where(&self, column: &str, owner_id: &str) -> Result<Vec<Property>, StoreError> {
        let sql = format!(
            "SELECT id, name, data_type, value, equipment_class_id FROM property
             WHERE {} = ?1 ORDER BY rowid",
            column
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut props = Vec::new();
        for row in rows {
            let (id, name, data_type, value, equipment_class_id) = row?;
            let data_type = data_type
                .parse::<DataType>()
                .map_err(|e| StoreError::Backend(format!("property '{}': {}", id, e)))?;
            props.push(Property {
                id,
                name,
                data_type,
                value,
                equipment_class_id,
            });
        }
        Ok(props)
    }
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn label(&self) -> &str {
        &self.label
    }

    fn equipment_by_id(&self, id: &str) -> Result<Equipment, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, description, equipment_level, equipment_class_id
                 FROM equipment WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let (id, name, description, level, equipment_class_id) =
            row.ok_or_else(|| StoreError::not_found("equipment", id))?;
        let equipment_level = level.parse::<EquipmentLevel>().unwrap_or_else(|e| {
            warn!(equipment_id = %id, error = %e, "Unknown equipment level, using Other");
            EquipmentLevel::Other
        });
        let properties = self.properties_where("equipment_id", &id)?;

        Ok(Equipment {
            id,
            name,
            description,
            equipment_level,
            equipment_class_id,
            properties,
        })
    }

    fn equipment_class_by_id(&self, id: &str) -> Result<EquipmentClass, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, parent_id FROM equipment_class WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        let (id, name, parent_id) = row.ok_or_else(|| StoreError::not_found("equipment class", id))?;
        let properties = self.properties_where("equipment_class_id", &id)?;

        Ok(EquipmentClass {
            id,
            name,
            properties,
            parent_id,
        })
    }

    fn event_definition_by_id(&self, id: &str) -> Result<EventDefinition, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, trigger_expression, payload_fields, payload_properties
                 FROM event_definition WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let (id, name, trigger_expression, fields, props) =
            row.ok_or_else(|| StoreError::not_found("event definition", id))?;
        let payload_fields: Vec<PayloadField> = serde_json::from_str(&fields)
            .map_err(|e| StoreError::Backend(format!("event definition '{}' fields: {}", id, e)))?;
        let payload_properties: Vec<String> = serde_json::from_str(&props).map_err(|e| {
            StoreError::Backend(format!("event definition '{}' properties: {}", id, e))
        })?;

        Ok(EventDefinition {
            id,
            name,
            trigger_expression,
            payload_fields,
            payload_properties,
        })
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        let end = if self.read_only { "ROLLBACK" } else { "COMMIT" };
        if let Err(e) = self.conn.execute_batch(end) {
            warn!(label = %self.label, error = %e, "Failed to release SQLite transaction");
        } else {
            debug!(label = %self.label, "Released SQLite transaction");
        }
    }
}
