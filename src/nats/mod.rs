// NATS transport: broker connection, topic rendering, publishing and tag ingestion

mod client;
mod ingest;
mod publisher;
mod topic;

pub use client::{NatsAuth, NatsClient, NatsConfig};
pub use ingest::{dispatch_tag, TagIngestor, TagRouter, FORWARD_QUEUE_DEPTH};
pub use publisher::MessagePublisher;
pub use topic::{TopicBuilder, TopicConfig, FALLBACK_CATEGORY};
