use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

mod convert;

pub use convert::{convert_property_value, ConversionError};

/// Tier of an equipment instance in the plant hierarchy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquipmentLevel {
    Enterprise,
    Site,
    Area,
    ProcessCell,
    Unit,
    ProductionLine,
    WorkCell,
    ProductionUnit,
    StorageZone,
    StorageUnit,
    WorkCenter,
    WorkUnit,
    EquipmentModule,
    ControlModule,
    #[default]
    Other,
}

impl EquipmentLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentLevel::Enterprise => "Enterprise",
            EquipmentLevel::Site => "Site",
            EquipmentLevel::Area => "Area",
            EquipmentLevel::ProcessCell => "ProcessCell",
            EquipmentLevel::Unit => "Unit",
            EquipmentLevel::ProductionLine => "ProductionLine",
            EquipmentLevel::WorkCell => "WorkCell",
            EquipmentLevel::ProductionUnit => "ProductionUnit",
            EquipmentLevel::StorageZone => "StorageZone",
            EquipmentLevel::StorageUnit => "StorageUnit",
            EquipmentLevel::WorkCenter => "WorkCenter",
            EquipmentLevel::WorkUnit => "WorkUnit",
            EquipmentLevel::EquipmentModule => "EquipmentModule",
            EquipmentLevel::ControlModule => "ControlModule",
            EquipmentLevel::Other => "Other",
        }
    }
}

impl FromStr for EquipmentLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s {
            "Enterprise" => EquipmentLevel::Enterprise,
            "Site" => EquipmentLevel::Site,
            "Area" => EquipmentLevel::Area,
            "ProcessCell" => EquipmentLevel::ProcessCell,
            "Unit" => EquipmentLevel::Unit,
            "ProductionLine" => EquipmentLevel::ProductionLine,
            "WorkCell" => EquipmentLevel::WorkCell,
            "ProductionUnit" => EquipmentLevel::ProductionUnit,
            "StorageZone" => EquipmentLevel::StorageZone,
            "StorageUnit" => EquipmentLevel::StorageUnit,
            "WorkCenter" => EquipmentLevel::WorkCenter,
            "WorkUnit" => EquipmentLevel::WorkUnit,
            "EquipmentModule" => EquipmentLevel::EquipmentModule,
            "ControlModule" => EquipmentLevel::ControlModule,
            "Other" => EquipmentLevel::Other,
            other => return Err(format!("unknown equipment level '{}'", other)),
        };
        Ok(level)
    }
}

/// Primitive kinds a persisted property value can be parsed into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "INT")]
    Int,
    #[serde(rename = "FLOAT")]
    Float,
    #[serde(rename = "BOOL")]
    Bool,
    #[serde(rename = "DATETIME")]
    DateTime,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "STRING",
            DataType::Int => "INT",
            DataType::Float => "FLOAT",
            DataType::Bool => "BOOL",
            DataType::DateTime => "DATETIME",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STRING" => Ok(DataType::String),
            "INT" | "INTEGER" => Ok(DataType::Int),
            "FLOAT" | "NUMBER" => Ok(DataType::Float),
            "BOOL" | "BOOLEAN" => Ok(DataType::Bool),
            "DATETIME" | "TIMESTAMP" => Ok(DataType::DateTime),
            other => Err(format!("unknown data type '{}'", other)),
        }
    }
}

/// Typed property value produced by [`convert_property_value`]
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
}

impl PropertyValue {
    pub fn data_type(&self) -> DataType {
        match self {
            PropertyValue::String(_) => DataType::String,
            PropertyValue::Int(_) => DataType::Int,
            PropertyValue::Float(_) => DataType::Float,
            PropertyValue::Bool(_) => DataType::Bool,
            PropertyValue::DateTime(_) => DataType::DateTime,
        }
    }

    /// JSON form used in event payloads and published messages
    pub fn to_json(&self) -> Value {
        match self {
            PropertyValue::String(s) => Value::String(s.clone()),
            PropertyValue::Int(i) => Value::from(*i),
            PropertyValue::Float(f) => Value::from(*f),
            PropertyValue::Bool(b) => Value::Bool(*b),
            PropertyValue::DateTime(ts) => Value::String(ts.to_rfc3339()),
        }
    }
}

/// Property as persisted on an equipment instance or an equipment class
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,

    /// Unique within the equipment or class that declares it
    pub name: String,

    pub data_type: DataType,

    /// Raw value string, parsed according to `data_type`
    #[serde(default)]
    pub value: Option<String>,

    /// Set when the property is declared on a class rather than an instance
    #[serde(default)]
    pub equipment_class_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub equipment_level: EquipmentLevel,
    #[serde(default)]
    pub equipment_class_id: Option<String>,
    #[serde(default)]
    pub properties: Vec<Property>,
}

/// Equipment class with its own properties and at most one parent class
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquipmentClass {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// Resolved property held by a managed equipment actor
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EquipmentPropertyDescriptor {
    pub name: String,
    pub data_type: DataType,

    /// Unset when the persisted value was missing or failed conversion
    pub value: Option<PropertyValue>,

    /// Id of the class property that supplied this descriptor, if any
    pub class_property_id: Option<String>,

    pub equipment_class_id: Option<String>,

    /// Unset until the first live update
    pub last_update: Option<DateTime<Utc>>,
}

/// Entry in a managed equipment's event log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EquipmentEventDescriptor {
    /// UUIDv7 identifier (time-ordered)
    pub id: String,
    pub equipment_id: String,
    pub event_definition_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: HashMap<String, Value>,
}

impl EquipmentEventDescriptor {
    pub fn new(
        equipment_id: &str,
        definition: &EventDefinition,
        payload: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            equipment_id: equipment_id.to_string(),
            event_definition_id: definition.id.clone(),
            name: definition.name.clone(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Named payload value computed by expression when an event fires
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayloadField {
    pub name: String,
    pub expression: String,
}

/// Declarative rule deriving a domain event from live property state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub trigger_expression: String,
    #[serde(default)]
    pub payload_fields: Vec<PayloadField>,
    /// Property names copied verbatim into the payload
    #[serde(default)]
    pub payload_properties: Vec<String>,
}

/// Message category for tag data
pub const CATEGORY_TAGDATA: &str = "TAGDATA";
/// Message category for derived equipment events
pub const CATEGORY_EVENT: &str = "EVENT";

/// Standard message exchanged with field devices and the broker
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StdMessage {
    #[serde(default)]
    pub owning_asset_id: String,
    #[serde(default)]
    pub owning_asset: String,
    pub item_name: String,
    #[serde(default)]
    pub item_value: String,
    #[serde(default)]
    pub item_data_type: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    #[serde(rename = "TAGDATA")]
    TagData,
    #[serde(rename = "TAGDATA_ACK")]
    TagDataAck,
    #[serde(rename = "SHUTDOWN")]
    Shutdown,
    #[serde(rename = "SHUTDOWN_ACK")]
    ShutdownAck,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceType::TagData => "TAGDATA",
            ServiceType::TagDataAck => "TAGDATA_ACK",
            ServiceType::Shutdown => "SHUTDOWN",
            ServiceType::ShutdownAck => "SHUTDOWN_ACK",
        };
        f.write_str(s)
    }
}

/// Request (or acknowledgement) exchanged with a managed equipment actor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquipmentServiceRequest {
    pub service_type: ServiceType,
    pub time: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub tag_info: StdMessage,
}

impl EquipmentServiceRequest {
    pub fn new(service_type: ServiceType, message: impl Into<String>) -> Self {
        Self {
            service_type,
            time: Utc::now(),
            message: message.into(),
            tag_info: StdMessage::default(),
        }
    }

    pub fn tag_data(tag: StdMessage) -> Self {
        Self {
            service_type: ServiceType::TagData,
            time: Utc::now(),
            message: String::new(),
            tag_info: tag,
        }
    }

    pub fn shutdown() -> Self {
        Self::new(ServiceType::Shutdown, "Shutdown requested")
    }
}
