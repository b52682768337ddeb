/// Error types for the observability pipeline
pub mod error;

/// Shared primitives: event emitters, environments, comparison operators
pub mod events;

/// Counters describing the pipeline's own throughput
pub mod monitoring;

/// Error classification, fingerprinting and the error store
pub mod tracking;

/// Alert rules, actions and dispatch
pub mod alerts;

/// Structured log pipeline with filters and transports
pub mod logging;

/// Performance metrics, Web Vitals, memory and budgets
pub mod performance;

/// Configuration management
pub mod config;

/// Periodic background tasks
pub mod tasks;

/// Integration hub facade
pub mod hub;

/// NDJSON signal ingestion
pub mod ingest;

// Re-export commonly used types
pub use config::MonitoringConfig;
pub use error::{AlertError, ConfigError, TransportError};
pub use hub::{HubEvent, MonitoringHub, MonitoringReport};
