use super::handler::{HandlerContext, TagChangeHandler};
use super::resolver::{resolve_descriptors, resolve_properties};
use super::EquipmentError;
use crate::domain::{
    convert_property_value, Equipment, EquipmentEventDescriptor, EquipmentPropertyDescriptor,
    EquipmentServiceRequest, PropertyValue, ServiceType, StdMessage,
};
use crate::store::{DataStore, StoreError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

type Reply = Result<EquipmentServiceRequest, EquipmentError>;

struct Envelope {
    request: EquipmentServiceRequest,
    reply: oneshot::Sender<Reply>,
}

/// Caller side of a managed equipment's request channel
///
/// Cloneable. All clones share one turn lock, so at most one request is in
/// flight per actor and waiting callers are served in FIFO order.
#[derive(Clone)]
pub struct EquipmentHandle {
    equipment_id: String,
    equipment_name: String,
    tx: mpsc::Sender<Envelope>,
    turn: Arc<Mutex<()>>,
}

impl EquipmentHandle {
    pub fn equipment_id(&self) -> &str {
        &self.equipment_id
    }

    pub fn equipment_name(&self) -> &str {
        &self.equipment_name
    }

    /// Sends one request and waits for the actor's acknowledgement.
    pub async fn send_request(&self, request: EquipmentServiceRequest) -> Reply {
        let _turn = self.turn.lock().await;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EquipmentError::ActorStopped(self.equipment_id.clone()))?;

        reply_rx
            .await
            .map_err(|_| EquipmentError::ActorStopped(self.equipment_id.clone()))?
    }

    /// Convenience wrapper sending a TAGDATA request
    pub async fn send_tag(&self, tag: StdMessage) -> Reply {
        self.send_request(EquipmentServiceRequest::tag_data(tag)).await
    }

    /// Convenience wrapper sending a SHUTDOWN request
    pub async fn shutdown(&self) -> Reply {
        self.send_request(EquipmentServiceRequest::shutdown()).await
    }
}

/// Actor owning the resolved property state of one equipment instance.
///
/// The property map and event log are only reachable through `&mut self`,
/// so the task running [`ManagedEquipment::run`] is their single writer.
pub struct ManagedEquipment {
    equipment: Equipment,
    config_level: i32,
    props: HashMap<String, EquipmentPropertyDescriptor>,
    events: Vec<EquipmentEventDescriptor>,
    requests: mpsc::Receiver<Envelope>,
    span: Span,
}

impl ManagedEquipment {
    /// Resolves the equipment's properties and creates the actor with its handle.
    ///
    /// The equipment itself must exist in the store; its properties are
    /// always re-read from there. The class walk is best-effort: if it fails
    /// part way the properties gathered so far are kept and the failure is
    /// logged.
    pub fn new(
        equipment: Equipment,
        store: &dyn DataStore,
    ) -> Result<(Self, EquipmentHandle), StoreError> {
        let span = info_span!("equipment", id = %equipment.id, name = %equipment.name);

        let raw = {
            let txn = store.begin_transaction(true, &format!("getProp{}", equipment.name))?;
            match resolve_properties(txn.as_ref(), &equipment.id) {
                Ok(props) => props,
                Err(partial) if partial.source == StoreError::not_found("equipment", &equipment.id) => {
                    return Err(partial.source);
                }
                Err(partial) => {
                    warn!(
                        parent: &span,
                        error = %partial.source,
                        kept = partial.properties.len(),
                        "Property resolution incomplete"
                    );
                    partial.properties
                }
            }
        };
        let props = resolve_descriptors(raw);

        info!(parent: &span, properties = props.len(), "Managed equipment created");

        let (tx, rx) = mpsc::channel(1);
        let handle = EquipmentHandle {
            equipment_id: equipment.id.clone(),
            equipment_name: equipment.name.clone(),
            tx,
            turn: Arc::new(Mutex::new(())),
        };

        let actor = Self {
            equipment,
            config_level: 0,
            props,
            events: Vec::new(),
            requests: rx,
            span,
        };

        Ok((actor, handle))
    }

    pub fn equipment_id(&self) -> &str {
        &self.equipment.id
    }

    pub fn equipment_name(&self) -> &str {
        &self.equipment.name
    }

    pub fn equipment_description(&self) -> &str {
        &self.equipment.description
    }

    pub fn equipment_level(&self) -> &str {
        self.equipment.equipment_level.as_str()
    }

    pub fn config_level(&self) -> i32 {
        self.config_level
    }

    pub fn set_config_level(&mut self, level: i32) {
        self.config_level = level;
    }

    /// Parses `raw` with the property's declared data type and stores it.
    ///
    /// On conversion failure the property keeps its previous value and
    /// update time.
    pub fn update_property_value(&mut self, name: &str, raw: &str) -> Result<(), EquipmentError> {
        let descriptor =
            self.props
                .get_mut(name)
                .ok_or_else(|| EquipmentError::UnknownProperty {
                    equipment: self.equipment.id.clone(),
                    property: name.to_string(),
                })?;

        let value = convert_property_value(descriptor.data_type, raw)?;
        let now = Utc::now();
        descriptor.value = Some(value.clone());
        descriptor.last_update = Some(now);

        info!(
            parent: &self.span,
            property = %name,
            value = ?value,
            at = %now,
            "Property update"
        );
        Ok(())
    }

    pub fn property_value(&self, name: &str) -> Option<&PropertyValue> {
        self.props.get(name).and_then(|p| p.value.as_ref())
    }

    pub fn property(&self, name: &str) -> Option<&EquipmentPropertyDescriptor> {
        self.props.get(name)
    }

    /// Live property map
    pub fn property_map(&self) -> &HashMap<String, EquipmentPropertyDescriptor> {
        &self.props
    }

    /// Appends to the event log. No deduplication and no cap.
    pub fn add_event(&mut self, event: EquipmentEventDescriptor) {
        debug!(parent: &self.span, event_id = %event.id, name = %event.name, "Event recorded");
        self.events.push(event);
    }

    pub fn events(&self) -> &[EquipmentEventDescriptor] {
        &self.events
    }

    /// Receives and answers exactly one request.
    ///
    /// Returns `false` once the actor must stop: after a SHUTDOWN request,
    /// or when every handle has been dropped.
    pub async fn accept_request(&mut self, handlers: &[Arc<dyn TagChangeHandler>]) -> bool {
        let Some(Envelope { request, reply }) = self.requests.recv().await else {
            info!(parent: &self.span, "All handles dropped, request loop ending");
            return false;
        };

        debug!(
            parent: &self.span,
            service_type = %request.service_type,
            "Managed equipment received request"
        );

        let (ack, keep_running) = match request.service_type {
            ServiceType::TagData => (Ok(self.process_tag_data(request.tag_info, handlers)), true),
            ServiceType::Shutdown => {
                info!(parent: &self.span, "Processing thread for equipment is shutting down");
                let ack = EquipmentServiceRequest::new(
                    ServiceType::ShutdownAck,
                    "Shutdown request acknowledged",
                );
                (Ok(ack), false)
            }
            other => {
                warn!(parent: &self.span, service_type = %other, "Rejected unsupported request");
                let err = EquipmentError::ProtocolViolation(format!(
                    "equipment '{}' cannot accept a {} request",
                    self.equipment.id, other
                ));
                (Err(err), true)
            }
        };

        if reply.send(ack).is_err() {
            warn!(parent: &self.span, "Requester went away before acknowledgement");
        }

        keep_running
    }

    /// Drives [`accept_request`](Self::accept_request) until the actor stops.
    pub async fn run(mut self, handlers: Vec<Arc<dyn TagChangeHandler>>) {
        let span = self.span.clone();
        async move {
            while self.accept_request(&handlers).await {}
            info!("Request loop stopped");
        }
        .instrument(span)
        .await
    }

    fn process_tag_data(
        &mut self,
        mut tag: StdMessage,
        handlers: &[Arc<dyn TagChangeHandler>],
    ) -> EquipmentServiceRequest {
        tag.owning_asset_id = self.equipment.id.clone();
        if tag.owning_asset.is_empty() {
            tag.owning_asset = self.equipment.name.clone();
        }

        let mut context = HandlerContext::new();
        let mut ack_msg = String::new();

        for handler in handlers {
            let result = handler.handle_tag_change(&tag, self, &mut context);
            if let Err(e) = &result {
                error!(
                    parent: &self.span,
                    handler = handler.name(),
                    item = %tag.item_name,
                    value = %tag.item_value,
                    error = %e,
                    "Tag change handler failed"
                );
            }
            ack_msg.push_str(&handler.ack_message(result.as_ref().err()));
        }

        EquipmentServiceRequest::new(ServiceType::TagDataAck, ack_msg)
    }
}
