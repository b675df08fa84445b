// Equipment, class, property and message types
pub mod domain;

// Data-store port and adapters
pub mod store;

// Managed equipment actors and tag handlers
pub mod equipment;

// Event definition evaluation
pub mod evaluator;

// NATS transport integration
pub mod nats;

// Service configuration
pub mod config;
