// src/pipeline/detect.rs

//! Detector startup: probe, wire collaborators, stream.

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::Config;
use crate::pipeline::{Pipeline, PipelineSettings, PipelineStats};
use crate::services::{KeywordClassifier, ProbeTarget, wait_for_broker};
use crate::source::KafkaSource;
use crate::storage::{DeadLetterLog, OpenSearchSink};
use crate::utils::http;

/// Run the detector until `shutdown` fires.
///
/// Blocks on the broker probe first; the Kafka consumer and the HTTP client
/// are created only once the broker answers, and are owned by the pipeline
/// from then on.
pub async fn run_detector(config: &Config, shutdown: &CancellationToken) -> Result<PipelineStats> {
    let target = ProbeTarget::from_bootstrap(&config.broker.bootstrap_servers)?;
    log::info!("Waiting for broker at {target}");
    wait_for_broker(&target, &config.probe, shutdown).await?;

    let source = KafkaSource::connect(&config.broker)?;

    let client = http::create_async_client(&config.index)?;
    let sink = OpenSearchSink::new(client, &config.index)?;
    log::info!("Indexing anomalies into {}", sink.endpoint());

    let classifier = KeywordClassifier::new(&config.pipeline.keyword);
    let dead_letter = DeadLetterLog::new(config.pipeline.dead_letter_path.clone());
    match dead_letter.path() {
        Some(path) => log::info!("Dead-letter entries go to {}", path.display()),
        None => log::info!("Dead-letter entries are logged only"),
    }

    let mut pipeline = Pipeline::new(
        source,
        classifier,
        sink,
        dead_letter,
        PipelineSettings::from_config(config),
    );
    pipeline.run(shutdown).await
}
