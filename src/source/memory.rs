//! In-memory broker used by the driver tests.
//!
//! Models one partition with a committed position that survives "restarts":
//! dropping a [`MemorySource`] and connecting a new one to the same
//! [`MemoryBroker`] resumes from the last acknowledged record.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::StreamPosition;
use crate::source::{Delivery, RecordSource};

#[derive(Debug, Default)]
struct Partition {
    log: Vec<Vec<u8>>,
    committed: Option<i64>,
}

/// Shared single-partition log.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryBroker {
    topic: String,
    inner: Arc<Mutex<Partition>>,
}

impl MemoryBroker {
    pub(crate) fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            inner: Arc::default(),
        }
    }

    pub(crate) fn produce(&self, payload: impl Into<Vec<u8>>) {
        self.inner.lock().unwrap().log.push(payload.into());
    }

    /// Next offset the group would read after a restart.
    pub(crate) fn committed(&self) -> Option<i64> {
        self.inner.lock().unwrap().committed
    }

    pub(crate) fn connect(&self) -> MemorySource {
        let next = self.committed().unwrap_or(0);
        MemorySource {
            broker: self.clone(),
            next,
        }
    }
}

pub(crate) struct MemorySource {
    broker: MemoryBroker,
    next: i64,
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn poll(&mut self, max_records: usize, _wait: Duration) -> Result<Vec<Delivery>> {
        let partition = self.broker.inner.lock().unwrap();
        let start = self.next as usize;
        let batch: Vec<Delivery> = partition
            .log
            .iter()
            .enumerate()
            .skip(start)
            .take(max_records)
            .map(|(offset, payload)| {
                Delivery::decode(
                    StreamPosition::new(&self.broker.topic, 0, offset as i64),
                    payload,
                )
            })
            .collect();
        self.next += batch.len() as i64;
        Ok(batch)
    }

    fn acknowledge(&mut self, position: &StreamPosition) -> Result<()> {
        let mut partition = self.broker.inner.lock().unwrap();
        partition.committed = Some(position.offset + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_run_starts_from_earliest() {
        let broker = MemoryBroker::new("logs");
        broker.produce(br#"{"message": "a"}"#.to_vec());
        broker.produce(br#"{"message": "b"}"#.to_vec());

        let mut source = broker.connect();
        let batch = source.poll(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].position.offset, 0);
    }

    #[tokio::test]
    async fn test_restart_resumes_after_acknowledged() {
        let broker = MemoryBroker::new("logs");
        for i in 0..3 {
            broker.produce(format!(r#"{{"n": {i}}}"#));
        }

        let mut source = broker.connect();
        let batch = source.poll(2, Duration::ZERO).await.unwrap();
        source.acknowledge(&batch[1].position).unwrap();
        drop(source);

        let mut restarted = broker.connect();
        let batch = restarted.poll(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].position.offset, 2);
    }
}
