use super::*;
use crate::domain::{
    DataType, Equipment, EquipmentClass, EquipmentLevel, EquipmentServiceRequest, Property,
    PropertyValue, ServiceType, StdMessage,
};
use crate::store::{DataStore, MemoryStore, StoreError};
use std::sync::{Arc, Mutex};

fn prop(id: &str, name: &str, data_type: DataType, value: &str) -> Property {
    Property {
        id: id.to_string(),
        name: name.to_string(),
        data_type,
        value: Some(value.to_string()),
        equipment_class_id: None,
    }
}

fn class_prop(class_id: &str, id: &str, name: &str, data_type: DataType, value: &str) -> Property {
    Property {
        equipment_class_id: Some(class_id.to_string()),
        ..prop(id, name, data_type, value)
    }
}

fn equipment(id: &str, name: &str, class_id: Option<&str>, properties: Vec<Property>) -> Equipment {
    Equipment {
        id: id.to_string(),
        name: name.to_string(),
        description: format!("{} description", name),
        equipment_level: EquipmentLevel::WorkCell,
        equipment_class_id: class_id.map(str::to_string),
        properties,
    }
}

fn fixture_store() -> MemoryStore {
    let store = MemoryStore::new();

    store.insert_equipment(equipment(
        "eq-1",
        "Filler01",
        Some("cls-filler"),
        vec![
            prop("p-1", "P", DataType::String, "instance"),
            prop("p-2", "speed", DataType::Int, "120"),
            prop("p-3", "broken", DataType::Int, "abc"),
        ],
    ));
    store.insert_equipment_class(EquipmentClass {
        id: "cls-filler".to_string(),
        name: "Filler".to_string(),
        properties: vec![
            class_prop("cls-filler", "cp-1", "P", DataType::String, "class"),
            class_prop("cls-filler", "cp-2", "temp", DataType::Float, "20.5"),
        ],
        parent_id: Some("cls-machine".to_string()),
    });
    store.insert_equipment_class(EquipmentClass {
        id: "cls-machine".to_string(),
        name: "Machine".to_string(),
        properties: vec![
            class_prop("cls-machine", "mp-1", "P", DataType::String, "parent"),
            class_prop("cls-machine", "mp-2", "serial", DataType::String, "SN-1"),
        ],
        parent_id: None,
    });

    store.insert_equipment(equipment(
        "eq-solo",
        "Mixer01",
        None,
        vec![
            prop("s-1", "speed", DataType::Int, "10"),
            prop("s-2", "running", DataType::Bool, "true"),
        ],
    ));

    store.insert_equipment(equipment(
        "eq-orphan",
        "Capper01",
        Some("cls-orphan"),
        vec![prop("o-1", "a", DataType::Int, "1")],
    ));
    store.insert_equipment_class(EquipmentClass {
        id: "cls-orphan".to_string(),
        name: "Orphan".to_string(),
        properties: vec![class_prop("cls-orphan", "op-1", "b", DataType::Int, "2")],
        parent_id: Some("cls-missing".to_string()),
    });

    store
}

fn tag(item: &str, value: &str) -> StdMessage {
    StdMessage {
        item_name: item.to_string(),
        item_value: value.to_string(),
        category: "TAGDATA".to_string(),
        ..Default::default()
    }
}

fn new_actor(store: &MemoryStore, id: &str) -> (ManagedEquipment, EquipmentHandle) {
    let txn = store.begin_transaction(true, "fixture").unwrap();
    let eq = txn.equipment_by_id(id).unwrap();
    drop(txn);
    ManagedEquipment::new(eq, store).unwrap()
}

/// Handler with a fixed outcome and a recognisable ack text
struct StaticHandler {
    name: &'static str,
    fail: bool,
    seen: Mutex<Vec<StdMessage>>,
}

impl StaticHandler {
    fn new(name: &'static str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl TagChangeHandler for StaticHandler {
    fn name(&self) -> &str {
        self.name
    }

    fn handle_tag_change(
        &self,
        tag: &StdMessage,
        _equipment: &mut ManagedEquipment,
        _context: &mut HandlerContext,
    ) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(tag.clone());
        if self.fail {
            anyhow::bail!("{} exploded", self.name);
        }
        Ok(())
    }

    fn ack_message(&self, error: Option<&anyhow::Error>) -> String {
        match error {
            Some(e) => format!("[{}: {}]", self.name, e),
            None => format!("[{}: ok]", self.name),
        }
    }
}

// ── Property resolution ──────────────────────────────────────────────────────

#[test]
fn test_resolve_without_class_returns_own_properties() {
    let store = fixture_store();
    let txn = store.begin_transaction(true, "test").unwrap();

    let props = resolve_properties(txn.as_ref(), "eq-solo").unwrap();
    assert_eq!(props.len(), 2);

    let descriptors = resolve_descriptors(props);
    assert_eq!(descriptors["speed"].value, Some(PropertyValue::Int(10)));
    assert_eq!(descriptors["running"].value, Some(PropertyValue::Bool(true)));
    assert!(descriptors.values().all(|d| d.class_property_id.is_none()));
}

#[test]
fn test_resolve_ancestor_class_takes_precedence() {
    let store = fixture_store();
    let txn = store.begin_transaction(true, "test").unwrap();

    let props = resolve_properties(txn.as_ref(), "eq-1").unwrap();
    let names: std::collections::HashSet<&str> = props.keys().map(String::as_str).collect();
    assert_eq!(
        names,
        ["P", "speed", "broken", "temp", "serial"].into_iter().collect()
    );

    // Instance, class and parent class all define P: the parent wins
    assert_eq!(props["P"].value.as_deref(), Some("parent"));
    assert_eq!(props["P"].equipment_class_id.as_deref(), Some("cls-machine"));
}

#[test]
fn test_resolve_descriptors_tracks_class_origin() {
    let store = fixture_store();
    let txn = store.begin_transaction(true, "test").unwrap();
    let descriptors = resolve_descriptors(resolve_properties(txn.as_ref(), "eq-1").unwrap());

    let temp = &descriptors["temp"];
    assert_eq!(temp.value, Some(PropertyValue::Float(20.5)));
    assert_eq!(temp.class_property_id.as_deref(), Some("cp-2"));
    assert_eq!(temp.equipment_class_id.as_deref(), Some("cls-filler"));
    assert!(temp.last_update.is_none());

    let speed = &descriptors["speed"];
    assert!(speed.class_property_id.is_none());
    assert!(speed.equipment_class_id.is_none());
}

#[test]
fn test_resolve_conversion_failure_leaves_value_unset() {
    let store = fixture_store();
    let txn = store.begin_transaction(true, "test").unwrap();
    let descriptors = resolve_descriptors(resolve_properties(txn.as_ref(), "eq-1").unwrap());

    assert!(descriptors["broken"].value.is_none());
    assert_eq!(descriptors["broken"].data_type, DataType::Int);
    // Other properties are still converted
    assert_eq!(descriptors["speed"].value, Some(PropertyValue::Int(120)));
}

#[test]
fn test_resolve_missing_ancestor_keeps_partial_result() {
    let store = fixture_store();
    let txn = store.begin_transaction(true, "test").unwrap();

    let partial = resolve_properties(txn.as_ref(), "eq-orphan").unwrap_err();
    assert!(partial.source.is_not_found());
    assert_eq!(partial.properties.len(), 2);
    assert!(partial.properties.contains_key("a"));
    assert!(partial.properties.contains_key("b"));
}

#[test]
fn test_resolve_missing_equipment() {
    let store = fixture_store();
    let txn = store.begin_transaction(true, "test").unwrap();

    let partial = resolve_properties(txn.as_ref(), "nope").unwrap_err();
    assert!(partial.source.is_not_found());
    assert!(partial.properties.is_empty());
}

#[test]
fn test_resolve_stops_on_class_cycle() {
    let store = fixture_store();
    store.insert_equipment_class(EquipmentClass {
        id: "cls-loop-a".to_string(),
        name: "LoopA".to_string(),
        properties: vec![class_prop("cls-loop-a", "la", "x", DataType::Int, "1")],
        parent_id: Some("cls-loop-b".to_string()),
    });
    store.insert_equipment_class(EquipmentClass {
        id: "cls-loop-b".to_string(),
        name: "LoopB".to_string(),
        properties: vec![class_prop("cls-loop-b", "lb", "x", DataType::Int, "2")],
        parent_id: Some("cls-loop-a".to_string()),
    });
    store.insert_equipment(equipment("eq-loop", "Loop01", Some("cls-loop-a"), vec![]));

    let txn = store.begin_transaction(true, "test").unwrap();
    let partial = resolve_properties(txn.as_ref(), "eq-loop").unwrap_err();
    assert_eq!(partial.source, crate::store::StoreError::ClassCycle("cls-loop-a".to_string()));
    assert_eq!(partial.properties["x"].value.as_deref(), Some("2"));
}

// ── Actor state ──────────────────────────────────────────────────────────────

#[test]
fn test_new_actor_seeds_properties_and_releases_transaction() {
    let store = fixture_store();
    let (actor, handle) = new_actor(&store, "eq-1");

    assert_eq!(store.open_transactions(), 0);
    assert_eq!(actor.equipment_id(), "eq-1");
    assert_eq!(actor.equipment_name(), "Filler01");
    assert_eq!(actor.equipment_description(), "Filler01 description");
    assert_eq!(actor.equipment_level(), "WorkCell");
    assert_eq!(actor.config_level(), 0);
    assert_eq!(actor.property_map().len(), 5);
    assert_eq!(
        actor.property_value("serial"),
        Some(&PropertyValue::String("SN-1".to_string()))
    );
    assert_eq!(handle.equipment_name(), "Filler01");
}

#[test]
fn test_new_actor_keeps_partial_properties() {
    let store = fixture_store();
    let (actor, _handle) = new_actor(&store, "eq-orphan");
    assert_eq!(actor.property_map().len(), 2);
    assert_eq!(actor.property_value("b"), Some(&PropertyValue::Int(2)));
}

#[test]
fn test_new_actor_requires_stored_equipment() {
    let store = fixture_store();
    let unknown = equipment(
        "eq-unknown",
        "Ghost01",
        None,
        vec![prop("g-1", "temp", DataType::Int, "5")],
    );

    let err = ManagedEquipment::new(unknown, &store).err().unwrap();
    assert_eq!(err, StoreError::not_found("equipment", "eq-unknown"));
    assert_eq!(store.open_transactions(), 0);
}

#[test]
fn test_update_property_value() {
    let store = fixture_store();
    let (mut actor, _handle) = new_actor(&store, "eq-1");

    actor.update_property_value("temp", "98.6").unwrap();
    let temp = actor.property("temp").unwrap();
    assert_eq!(temp.value, Some(PropertyValue::Float(98.6)));
    assert!(temp.last_update.is_some());
}

#[test]
fn test_update_property_conversion_failure_leaves_property_unchanged() {
    let store = fixture_store();
    let (mut actor, _handle) = new_actor(&store, "eq-1");

    let before = actor.property("speed").unwrap().clone();
    let err = actor.update_property_value("speed", "fast").unwrap_err();
    assert!(matches!(err, EquipmentError::Conversion(_)));
    assert_eq!(actor.property("speed").unwrap(), &before);
}

#[test]
fn test_update_unknown_property() {
    let store = fixture_store();
    let (mut actor, _handle) = new_actor(&store, "eq-1");

    let err = actor.update_property_value("pressure", "1").unwrap_err();
    assert_eq!(
        err,
        EquipmentError::UnknownProperty {
            equipment: "eq-1".to_string(),
            property: "pressure".to_string(),
        }
    );
    assert!(actor.property("pressure").is_none());
}

#[test]
fn test_config_level_and_event_log() {
    let store = fixture_store();
    let (mut actor, _handle) = new_actor(&store, "eq-solo");

    actor.set_config_level(3);
    assert_eq!(actor.config_level(), 3);

    let definition = crate::domain::EventDefinition {
        id: "evt".to_string(),
        name: "Started".to_string(),
        trigger_expression: "running".to_string(),
        payload_fields: vec![],
        payload_properties: vec![],
    };
    let event = crate::domain::EquipmentEventDescriptor::new("eq-solo", &definition, Default::default());
    actor.add_event(event.clone());
    actor.add_event(event);

    // No deduplication
    assert_eq!(actor.events().len(), 2);
    assert_eq!(actor.events()[0].name, "Started");
}

// ── Request protocol ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_is_acknowledged_and_stops_loop() {
    let store = fixture_store();
    let (mut actor, handle) = new_actor(&store, "eq-solo");

    let sender = tokio::spawn(async move { handle.shutdown().await });

    assert!(!actor.accept_request(&[]).await);

    let ack = sender.await.unwrap().unwrap();
    assert_eq!(ack.service_type, ServiceType::ShutdownAck);
    assert_eq!(ack.message, "Shutdown request acknowledged");
}

#[tokio::test]
async fn test_tag_data_collects_every_handler_ack() {
    let store = fixture_store();
    let (mut actor, handle) = new_actor(&store, "eq-1");

    let first = StaticHandler::new("first", true);
    let second = StaticHandler::new("second", false);
    let handlers: Vec<Arc<dyn TagChangeHandler>> = vec![first.clone(), second.clone()];

    let sender = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.send_tag(tag("temp", "101")).await })
    };
    assert!(actor.accept_request(&handlers).await);

    let ack = sender.await.unwrap().unwrap();
    assert_eq!(ack.service_type, ServiceType::TagDataAck);
    assert_eq!(ack.message, "[first: first exploded][second: ok]");

    // Both handlers saw the tag, stamped with this equipment's id
    for handler in [&first, &second] {
        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].owning_asset_id, "eq-1");
        assert_eq!(seen[0].owning_asset, "Filler01");
    }

    // The loop keeps serving requests after a handler failure
    let sender = tokio::spawn(async move { handle.shutdown().await });
    assert!(!actor.accept_request(&handlers).await);
    assert_eq!(
        sender.await.unwrap().unwrap().service_type,
        ServiceType::ShutdownAck
    );
}

#[tokio::test]
async fn test_property_update_handler_through_request() {
    let store = fixture_store();
    let (actor, handle) = new_actor(&store, "eq-1");
    let handlers: Vec<Arc<dyn TagChangeHandler>> = vec![Arc::new(PropertyUpdateHandler)];
    let task = tokio::spawn(actor.run(handlers));

    let ack = handle.send_tag(tag("speed", "240")).await.unwrap();
    assert_eq!(ack.message, "property updated;");

    let ack = handle.send_tag(tag("speed", "fast")).await.unwrap();
    assert!(ack.message.starts_with("property update failed:"));

    let ack = handle.send_tag(tag("unknown", "1")).await.unwrap();
    assert!(ack.message.contains("has no property 'unknown'"));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_ack_service_types_are_rejected() {
    let store = fixture_store();
    let (actor, handle) = new_actor(&store, "eq-solo");
    let task = tokio::spawn(actor.run(Vec::new()));

    let err = handle
        .send_request(EquipmentServiceRequest::new(ServiceType::TagDataAck, "bogus"))
        .await
        .unwrap_err();
    assert!(matches!(err, EquipmentError::ProtocolViolation(_)));

    // Still running
    let ack = handle.shutdown().await.unwrap();
    assert_eq!(ack.service_type, ServiceType::ShutdownAck);
    task.await.unwrap();
}

#[tokio::test]
async fn test_requests_after_shutdown_fail() {
    let store = fixture_store();
    let (actor, handle) = new_actor(&store, "eq-solo");
    let task = tokio::spawn(actor.run(Vec::new()));

    handle.shutdown().await.unwrap();
    task.await.unwrap();

    let err = handle.send_tag(tag("speed", "1")).await.unwrap_err();
    assert_eq!(err, EquipmentError::ActorStopped("eq-solo".to_string()));
}

#[tokio::test]
async fn test_dropping_all_handles_ends_loop() {
    let store = fixture_store();
    let (mut actor, handle) = new_actor(&store, "eq-solo");
    drop(handle);
    assert!(!actor.accept_request(&[]).await);
}

#[tokio::test]
async fn test_sequential_requests_processed_in_order() {
    let store = fixture_store();
    let (actor, handle) = new_actor(&store, "eq-solo");
    let recorder = StaticHandler::new("recorder", false);
    let task = tokio::spawn(actor.run(vec![recorder.clone() as Arc<dyn TagChangeHandler>]));

    for i in 0..5 {
        handle.send_tag(tag("speed", &i.to_string())).await.unwrap();
    }
    handle.shutdown().await.unwrap();
    task.await.unwrap();

    let values: Vec<String> = recorder
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|t| t.item_value.clone())
        .collect();
    assert_eq!(values, vec!["0", "1", "2", "3", "4"]);
}

#[tokio::test]
async fn test_concurrent_senders_each_get_one_ack() {
    let store = fixture_store();
    let (actor, handle) = new_actor(&store, "eq-solo");
    let recorder = StaticHandler::new("recorder", false);
    let task = tokio::spawn(actor.run(vec![recorder.clone() as Arc<dyn TagChangeHandler>]));

    let mut senders = Vec::new();
    for i in 0..10 {
        let handle = handle.clone();
        senders.push(tokio::spawn(async move {
            handle.send_tag(tag("speed", &i.to_string())).await
        }));
    }
    for sender in senders {
        let ack = sender.await.unwrap().unwrap();
        assert_eq!(ack.message, "[recorder: ok]");
    }

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert_eq!(recorder.seen.lock().unwrap().len(), 10);
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_registry_spawn_lookup_and_shutdown() {
    let store = Arc::new(fixture_store());
    let registry = EquipmentRegistry::new(store.clone());

    let handlers: Vec<Arc<dyn TagChangeHandler>> = vec![Arc::new(PropertyUpdateHandler)];
    registry.spawn_by_id("eq-1", handlers.clone()).unwrap();
    registry.spawn_by_id("eq-solo", handlers.clone()).unwrap();
    assert_eq!(registry.len(), 2);

    let filler = registry.get_by_name("Filler01").unwrap();
    assert_eq!(filler.equipment_id(), "eq-1");
    assert!(registry.get_by_id("eq-solo").is_some());
    assert!(registry.get_by_name("Nope").is_none());

    let ack = filler.send_tag(tag("temp", "55.5")).await.unwrap();
    assert_eq!(ack.message, "property updated;");

    // Same id cannot be started twice
    assert!(matches!(
        registry.spawn_by_id("eq-1", handlers.clone()),
        Err(EquipmentError::ProtocolViolation(_))
    ));
    // Unknown equipment surfaces the store error
    assert!(matches!(
        registry.spawn_by_id("nope", handlers),
        Err(EquipmentError::Store(_))
    ));

    registry.shutdown_all().await;
    assert!(registry.is_empty());
    assert!(matches!(
        filler.send_tag(tag("temp", "1")).await,
        Err(EquipmentError::ActorStopped(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registry_rejects_concurrent_duplicate_spawns() {
    let store = Arc::new(fixture_store());
    let registry = Arc::new(EquipmentRegistry::new(store.clone()));

    let mut spawns = Vec::new();
    for _ in 0..8 {
        let registry = registry.clone();
        spawns.push(tokio::spawn(async move {
            let handlers: Vec<Arc<dyn TagChangeHandler>> = vec![Arc::new(PropertyUpdateHandler)];
            registry.spawn_by_id("eq-1", handlers).is_ok()
        }));
    }

    let mut started = 0;
    for spawn in spawns {
        if spawn.await.unwrap() {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    assert_eq!(registry.len(), 1);

    registry.shutdown_all().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_registry_rejects_duplicate_name() {
    let store = Arc::new(fixture_store());
    store.insert_equipment(equipment("eq-twin", "Filler01", None, vec![]));
    let registry = EquipmentRegistry::new(store.clone());

    let handlers: Vec<Arc<dyn TagChangeHandler>> = vec![Arc::new(PropertyUpdateHandler)];
    registry.spawn_by_id("eq-1", handlers.clone()).unwrap();
    assert!(matches!(
        registry.spawn_by_id("eq-twin", handlers),
        Err(EquipmentError::ProtocolViolation(_))
    ));

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get_by_name("Filler01").unwrap().equipment_id(), "eq-1");
    assert!(registry.get_by_id("eq-twin").is_none());

    registry.shutdown_all().await;
}
