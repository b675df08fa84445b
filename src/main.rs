use anyhow::{Context, Result};
use edge_equipment::config::{load_config, EdgeConfig};
use edge_equipment::equipment::{EquipmentRegistry, PropertyUpdateHandler, TagChangeHandler};
use edge_equipment::evaluator::{EventEvaluator, EventTriggerHandler};
use edge_equipment::nats::{MessagePublisher, NatsClient, TagIngestor, TopicBuilder};
use edge_equipment::store::{DataStore, SqliteStore};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edge_equipment=info".into()),
        )
        .init();

    info!("Edge equipment service starting...");

    let config_path = std::env::var("EDGE_EQUIPMENT_CONFIG")
        .unwrap_or_else(|_| "edge-equipment.toml".to_string());
    let config = if Path::new(&config_path).exists() {
        load_config(&config_path)?
    } else {
        warn!(path = %config_path, "Config file not found, using defaults");
        EdgeConfig::default()
    };

    let store: Arc<dyn DataStore> = Arc::new(
        SqliteStore::open(&config.store.path).context("Failed to open equipment store")?,
    );
    info!(path = %config.store.path.display(), "Equipment store opened");

    let nats = NatsClient::connect(config.nats.clone()).await?;

    // Fired events are published from a single outbox task
    let publisher = MessagePublisher::new(
        nats.client().clone(),
        TopicBuilder::new(config.topics.clone()),
    );
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let outbox_task = tokio::spawn(publisher.run_outbox(outbox_rx));

    let evaluator = Arc::new(EventEvaluator::new(store.clone()));
    let registry = Arc::new(EquipmentRegistry::new(store.clone()));

    for eq in &config.equipment {
        let mut handlers: Vec<Arc<dyn TagChangeHandler>> = vec![Arc::new(PropertyUpdateHandler)];
        if !eq.event_definitions.is_empty() {
            handlers.push(Arc::new(EventTriggerHandler::new(
                evaluator.clone(),
                eq.event_definitions.clone(),
                Some(outbox_tx.clone()),
            )));
        }

        if let Err(e) = registry.spawn_by_id(&eq.id, handlers) {
            error!(equipment_id = %eq.id, error = %e, "Failed to start equipment actor");
        }
    }
    drop(outbox_tx);

    if registry.is_empty() {
        warn!("No equipment actors running");
    }
    info!(equipment = registry.len(), "Equipment actors started");

    let ingestor = TagIngestor::new(
        nats.client().clone(),
        config.nats.tag_subject.clone(),
        registry.clone(),
    );
    let ingest_task = tokio::spawn(async move {
        if let Err(e) = ingestor.run().await {
            error!(error = %e, "Tag ingestion stopped");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    ingest_task.abort();
    registry.shutdown_all().await;

    // Actors hold the last outbox senders; once they are gone the outbox drains and ends
    if let Err(e) = outbox_task.await {
        error!(error = %e, "Outbox task ended abnormally");
    }
    if let Err(e) = nats.close().await {
        warn!(error = %e, "Failed to flush NATS on shutdown");
    }

    info!("Edge equipment service stopped");
    Ok(())
}
