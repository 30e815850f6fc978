//! Kafka record source.
//!
//! Consumes one topic through rdkafka's `StreamConsumer` as part of a consumer
//! group. Automatic offset *storing* is disabled: only positions passed to
//! [`RecordSource::acknowledge`] are stored, and the consumer's background
//! auto-commit persists them. On restart the group resumes from the last
//! committed position, or from the earliest retained record when the group has
//! none.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::types::RDKafkaErrorCode;

use crate::error::{AppError, Result};
use crate::models::{BrokerConfig, StreamPosition};
use crate::source::{Delivery, RecordSource};

/// Kafka-backed [`RecordSource`].
pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaSource {
    /// Create the consumer and subscribe to the configured topic.
    pub fn connect(config: &BrokerConfig) -> Result<Self> {
        let consumer: StreamConsumer = client_config(config).create()?;
        consumer.subscribe(&[config.topic.as_str()])?;

        log::info!(
            "Subscribed to topic '{}' on {} as group '{}'",
            config.topic,
            config.bootstrap_servers,
            config.group_id
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

/// rdkafka settings for the detector's consumer.
pub fn client_config(config: &BrokerConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("group.id", &config.group_id)
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "true")
        .set(
            "auto.commit.interval.ms",
            config.auto_commit_interval_ms.to_string(),
        )
        .set("enable.auto.offset.store", "false")
        .set("enable.partition.eof", "false");
    client
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn poll(&mut self, max_records: usize, wait: Duration) -> Result<Vec<Delivery>> {
        let mut batch = Vec::new();
        let mut deadline = tokio::time::Instant::now() + wait;

        while batch.len() < max_records {
            let received = match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Ok(received) => received,
                Err(_) => break,
            };

            match received {
                Ok(message) => {
                    let position = StreamPosition::new(
                        message.topic(),
                        message.partition(),
                        message.offset(),
                    );
                    batch.push(Delivery::decode(position, message.payload().unwrap_or_default()));
                    // Drain what is already buffered, but do not wait for more.
                    deadline = tokio::time::Instant::now();
                }
                Err(e) if e.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal) => {
                    return Err(AppError::Kafka(e));
                }
                Err(e) => {
                    log::warn!("Kafka consumer error: {e}");
                }
            }
        }

        Ok(batch)
    }

    fn acknowledge(&mut self, position: &StreamPosition) -> Result<()> {
        // Kafka stores the next offset to read, not the last one handled.
        self.consumer
            .store_offset(&position.topic, position.partition, position.offset + 1)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        log::info!("Unsubscribed from topic '{}'", self.topic);
        Ok(())
    }
}
