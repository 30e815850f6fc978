// src/models/mod.rs

//! Domain models for the detector.
//!
//! This module contains the data structures shared by the source, the
//! classifier, the sink and the pipeline driver.

mod anomaly;
mod config;
mod record;

// Re-export all public types
pub use anomaly::AnomalyDocument;
pub use config::{
    BrokerConfig, CommitPolicy, Config, ENV_KAFKA_BROKER, ENV_OPENSEARCH_HOST,
    ENV_OPENSEARCH_PORT, IndexConfig, LoggingConfig, PipelineConfig, ProbeConfig,
};
pub use record::{LogRecord, StreamPosition};
