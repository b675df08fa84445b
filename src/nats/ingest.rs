use crate::domain::{EquipmentServiceRequest, StdMessage, CATEGORY_EVENT};
use crate::equipment::{EquipmentHandle, EquipmentRegistry};
use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

/// Tags queued per equipment before new ones are dropped
pub const FORWARD_QUEUE_DEPTH: usize = 1024;

/// Routes inbound tag changes from NATS to the owning equipment actor
pub struct TagIngestor {
    client: async_nats::Client,
    subject: String,
    router: TagRouter,
}

impl TagIngestor {
    pub fn new(client: async_nats::Client, subject: String, registry: Arc<EquipmentRegistry>) -> Self {
        Self {
            client,
            subject,
            router: TagRouter::new(registry),
        }
    }

    /// Subscribe and route until the subscription ends
    pub async fn run(self) -> Result<()> {
        info!(subject = %self.subject, "Subscribing to tag changes");

        let mut subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to '{}'", self.subject))?;

        while let Some(msg) = subscriber.next().await {
            if let Err(e) = self.router.route(&msg.payload) {
                warn!(subject = %msg.subject, error = %e, "Tag change not processed");
            }
        }

        warn!(subject = %self.subject, "Tag subscription ended");
        Ok(())
    }
}

/// Hands tag changes to one forwarding task per equipment.
///
/// Each forwarder sends its queue to the actor in arrival order and waits
/// for every acknowledgement, so a stalled actor only backs up its own
/// queue. Forwarders stop once the router is dropped and their queue drains.
pub struct TagRouter {
    registry: Arc<EquipmentRegistry>,
    forwarders: DashMap<String, mpsc::Sender<StdMessage>>,
}

impl TagRouter {
    pub fn new(registry: Arc<EquipmentRegistry>) -> Self {
        Self {
            registry,
            forwarders: DashMap::new(),
        }
    }

    /// Decodes one payload and queues it for the owning equipment.
    ///
    /// Returns `Ok(false)` for EVENT messages, which are not routed.
    pub fn route(&self, payload: &[u8]) -> Result<bool> {
        let tag: StdMessage =
            serde_json::from_slice(payload).context("Failed to deserialize tag message")?;

        if tag.category == CATEGORY_EVENT {
            return Ok(false);
        }

        let handle = owner_of(&self.registry, &tag)?;
        let id = handle.equipment_id().to_string();

        let sender = self
            .forwarders
            .entry(id.clone())
            .or_insert_with(|| spawn_forwarder(handle))
            .clone();

        match sender.try_send(tag) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(tag)) => Err(anyhow!(
                "queue for equipment '{}' is full, dropped '{}'",
                id,
                tag.item_name
            )),
            Err(TrySendError::Closed(tag)) => {
                self.forwarders.remove(&id);
                Err(anyhow!(
                    "forwarder for equipment '{}' has stopped, dropped '{}'",
                    id,
                    tag.item_name
                ))
            }
        }
    }

    /// Number of equipment with a running forwarder
    pub fn forwarder_count(&self) -> usize {
        self.forwarders.len()
    }
}

fn spawn_forwarder(handle: EquipmentHandle) -> mpsc::Sender<StdMessage> {
    let (tx, mut rx) = mpsc::channel::<StdMessage>(FORWARD_QUEUE_DEPTH);

    tokio::spawn(async move {
        debug!(equipment_id = %handle.equipment_id(), "Tag forwarder started");
        while let Some(tag) = rx.recv().await {
            let item = tag.item_name.clone();
            match handle.send_tag(tag).await {
                Ok(ack) => {
                    debug!(equipment_id = %handle.equipment_id(), item = %item, ack = %ack.message, "Tag change acknowledged");
                }
                Err(e) => {
                    error!(equipment_id = %handle.equipment_id(), item = %item, error = %e, "Equipment rejected tag change");
                }
            }
        }
        debug!(equipment_id = %handle.equipment_id(), "Tag forwarder stopped");
    });

    tx
}

/// Looks the owner up by `owningAsset` (name) first, then by `owningAssetId`.
fn owner_of(registry: &EquipmentRegistry, tag: &StdMessage) -> Result<EquipmentHandle> {
    registry
        .get_by_name(&tag.owning_asset)
        .or_else(|| registry.get_by_id(&tag.owning_asset_id))
        .ok_or_else(|| {
            anyhow!(
                "no managed equipment for asset '{}' (id '{}')",
                tag.owning_asset,
                tag.owning_asset_id
            )
        })
}

/// Decodes one payload, sends it to the owning equipment as TAGDATA and
/// waits for the acknowledgement.
///
/// Returns `Ok(None)` for EVENT messages, which are outbound traffic echoed
/// back on a shared subject.
pub async fn dispatch_tag(
    registry: &EquipmentRegistry,
    payload: &[u8],
) -> Result<Option<EquipmentServiceRequest>> {
    let tag: StdMessage =
        serde_json::from_slice(payload).context("Failed to deserialize tag message")?;

    if tag.category == CATEGORY_EVENT {
        return Ok(None);
    }

    let handle = owner_of(registry, &tag)?;

    let item = tag.item_name.clone();
    let ack = handle.send_tag(tag).await.map_err(|e| {
        error!(equipment_id = %handle.equipment_id(), item = %item, error = %e, "Equipment rejected tag change");
        e
    })?;

    Ok(Some(ack))
}
