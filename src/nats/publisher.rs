use super::topic::TopicBuilder;
use crate::domain::StdMessage;
use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Publishes standard messages to NATS
#[derive(Clone)]
pub struct MessagePublisher {
    client: async_nats::Client,
    topics: TopicBuilder,
}

impl MessagePublisher {
    pub fn new(client: async_nats::Client, topics: TopicBuilder) -> Self {
        Self { client, topics }
    }

    /// Publish a single message
    ///
    /// Subject: rendered topic template (see [`TopicBuilder::subject`])
    /// Payload: JSON-serialized StdMessage
    pub async fn send_std_message(&self, msg: &StdMessage) -> Result<()> {
        let subject = self.topics.subject(msg);
        let mut outgoing = msg.clone();
        outgoing.topic = self.topics.topic(msg);

        let payload =
            serde_json::to_vec(&outgoing).context("Failed to serialize message to JSON")?;

        debug!(
            subject = %subject,
            item = %msg.item_name,
            category = %msg.category,
            "Publishing message to NATS"
        );

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish message to subject '{}'", subject))?;

        Ok(())
    }

    /// Publishes everything queued on `outbox` until every sender is dropped.
    ///
    /// Publish failures are logged and the message is dropped.
    pub async fn run_outbox(self, mut outbox: mpsc::UnboundedReceiver<StdMessage>) {
        info!("Starting message outbox");
        while let Some(msg) = outbox.recv().await {
            if let Err(e) = self.send_std_message(&msg).await {
                error!(error = %e, item = %msg.item_name, "Failed to publish message");
            }
        }
        info!("Message outbox closed");
    }
}
