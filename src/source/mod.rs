//! Record sources for the pipeline.
//!
//! A source yields deliveries in broker order and takes positions back through
//! [`RecordSource::acknowledge`]. When positions are acknowledged is the
//! driver's decision (see [`CommitPolicy`]).
//!
//! [`CommitPolicy`]: crate::models::CommitPolicy

pub mod kafka;
#[cfg(test)]
pub(crate) mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{DecodeError, Result};
use crate::models::{LogRecord, StreamPosition};

pub use kafka::KafkaSource;

/// One record handed over by a source.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub position: StreamPosition,
    /// Raw payload, kept for the dead-letter log
    pub payload: Vec<u8>,
    pub record: std::result::Result<LogRecord, DecodeError>,
}

impl Delivery {
    /// Decode `payload` and pair it with its position.
    pub fn decode(position: StreamPosition, payload: &[u8]) -> Self {
        Self {
            position,
            record: LogRecord::decode(payload),
            payload: payload.to_vec(),
        }
    }
}

/// Ordered, resumable stream of decoded log records.
#[async_trait]
pub trait RecordSource: Send {
    /// Wait up to `wait` for records and return at most `max_records`.
    ///
    /// An empty batch means nothing was available in time. Errors are
    /// reserved for faults the source cannot recover from.
    async fn poll(&mut self, max_records: usize, wait: Duration) -> Result<Vec<Delivery>>;

    /// Mark everything up to and including `position` as handled.
    fn acknowledge(&mut self, position: &StreamPosition) -> Result<()>;

    /// Release the subscription.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
