// src/pipeline/driver.rs

//! The consume-detect-index loop.
//!
//! ## States
//!
//! ```text
//! Starting ──► Streaming ◄──► IdleWait
//!                  │
//!                  ▼
//!              Stopping
//! ```
//!
//! `Streaming` polls the source and handles each delivery in order. An empty
//! poll moves to `IdleWait` for a fixed interval. Cancellation is observed
//! around every blocking call and leads to `Stopping`.
//!
//! Per-record failures never leave the loop: undecodable payloads and dropped
//! documents go to the dead-letter log, and a position the source refuses to
//! acknowledge (for example after its partition was revoked) is logged and
//! counted. Only poll faults end `run` with an error.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::models::{AnomalyDocument, CommitPolicy, Config, StreamPosition};
use crate::services::Classifier;
use crate::source::{Delivery, RecordSource};
use crate::storage::{AnomalySink, DeadLetterLog, IndexOutcome};
use crate::utils::Backoff;

/// Driver lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Streaming,
    IdleWait,
    Stopping,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Starting => "STARTING",
            PipelineState::Streaming => "STREAMING",
            PipelineState::IdleWait => "IDLE-WAIT",
            PipelineState::Stopping => "STOPPING",
        };
        f.write_str(name)
    }
}

/// Loop tuning, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_poll_records: usize,
    pub poll_timeout: Duration,
    pub idle_interval: Duration,
    pub commit_policy: CommitPolicy,
    /// Extra attempts after a transient index failure
    pub index_retries: u32,
    pub retry_initial: Duration,
    pub retry_max: Duration,
    /// Period of the running-totals log line
    pub stats_interval: Option<Duration>,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        let pipeline = &config.pipeline;
        Self {
            max_poll_records: config.broker.max_poll_records.max(1),
            poll_timeout: config.broker.poll_timeout(),
            idle_interval: pipeline.idle_interval(),
            commit_policy: pipeline.commit_policy,
            index_retries: pipeline.index_retries,
            retry_initial: Duration::from_millis(pipeline.retry_initial_ms),
            retry_max: Duration::from_millis(pipeline.retry_max_ms),
            stats_interval: (pipeline.stats_interval_secs > 0)
                .then(|| Duration::from_secs(pipeline.stats_interval_secs)),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Running totals of one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub received: u64,
    pub decode_failures: u64,
    pub anomalies: u64,
    pub indexed: u64,
    pub transient_failures: u64,
    pub permanent_failures: u64,
    pub ack_failures: u64,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} decode_failures={} anomalies={} indexed={} transient_failures={} permanent_failures={} ack_failures={}",
            self.received,
            self.decode_failures,
            self.anomalies,
            self.indexed,
            self.transient_failures,
            self.permanent_failures,
            self.ack_failures
        )
    }
}

/// Owns the source, classifier and sink for the lifetime of the loop.
pub struct Pipeline<S, C, K> {
    source: S,
    classifier: C,
    sink: K,
    dead_letter: DeadLetterLog,
    settings: PipelineSettings,
    backoff: Backoff,
    state: PipelineState,
    stats: PipelineStats,
    last_report: Instant,
    reports: u32,
}

impl<S, C, K> Pipeline<S, C, K>
where
    S: RecordSource,
    C: Classifier,
    K: AnomalySink,
{
    pub fn new(
        source: S,
        classifier: C,
        sink: K,
        dead_letter: DeadLetterLog,
        settings: PipelineSettings,
    ) -> Self {
        let backoff = Backoff::new(settings.retry_initial, settings.retry_max);
        Self {
            source,
            classifier,
            sink,
            dead_letter,
            settings,
            backoff,
            state: PipelineState::Starting,
            stats: PipelineStats::default(),
            last_report: Instant::now(),
            reports: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Stream until `shutdown` fires or the source fails.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Result<PipelineStats> {
        log::info!(
            "Starting pipeline (commit policy: {}, index retries: {})",
            self.settings.commit_policy,
            self.settings.index_retries
        );
        self.transition(PipelineState::Streaming);

        self.last_report = Instant::now();

        let result = 'stream: loop {
            self.report_totals();

            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                batch = self.source.poll(self.settings.max_poll_records, self.settings.poll_timeout) => Some(batch),
            };
            let batch = match polled {
                None => break 'stream Ok(()),
                Some(Ok(batch)) => batch,
                Some(Err(e)) => break 'stream Err(e),
            };

            if batch.is_empty() {
                self.transition(PipelineState::IdleWait);
                let interrupted = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => true,
                    _ = tokio::time::sleep(self.settings.idle_interval) => false,
                };
                if interrupted {
                    break 'stream Ok(());
                }
                self.transition(PipelineState::Streaming);
                continue;
            }

            log::debug!("Polled {} records", batch.len());

            for delivery in &batch {
                let interrupted = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => true,
                    () = self.handle(delivery) => false,
                };
                if interrupted {
                    log::info!("Shutdown requested while handling {}", delivery.position);
                    break 'stream Ok(());
                }
            }
        };

        self.transition(PipelineState::Stopping);
        if let Err(e) = self.source.close().await {
            log::warn!("Failed to close record source: {e}");
        }

        match &result {
            Ok(()) => log::info!("Pipeline stopped: {}", self.stats),
            Err(e) => log::error!("Pipeline failed: {e} ({})", self.stats),
        }

        result.map(|()| self.stats.clone())
    }

    /// Classify one delivery and index it if anomalous.
    async fn handle(&mut self, delivery: &Delivery) {
        self.stats.received += 1;

        if self.settings.commit_policy == CommitPolicy::OnReceipt {
            self.acknowledge(&delivery.position);
        }

        match &delivery.record {
            Err(e) => {
                self.stats.decode_failures += 1;
                log::warn!("Skipping undecodable record at {}: {e}", delivery.position);
                self.dead_letter
                    .record(delivery, &format!("decode failed: {e}"))
                    .await;
            }
            Ok(record) => {
                let verdict = self.classifier.classify(record);
                if verdict.anomaly {
                    self.stats.anomalies += 1;
                    let document =
                        AnomalyDocument::from_record(record, verdict.annotation, Utc::now());
                    self.index(delivery, &document).await;
                }
            }
        }

        if self.settings.commit_policy == CommitPolicy::AfterIndex {
            self.acknowledge(&delivery.position);
        }
    }

    fn acknowledge(&mut self, position: &StreamPosition) {
        if let Err(e) = self.source.acknowledge(position) {
            self.stats.ack_failures += 1;
            log::warn!("Failed to acknowledge {position}, continuing: {e}");
        }
    }

    async fn index(&mut self, delivery: &Delivery, document: &AnomalyDocument) {
        self.backoff.reset();
        let mut retries_left = self.settings.index_retries;

        let outcome = loop {
            let outcome = self.sink.index(document).await;
            if !outcome.is_transient() || retries_left == 0 {
                break outcome;
            }
            retries_left -= 1;
            let delay = self.backoff.next_delay();
            log::warn!(
                "Indexing anomaly from {} failed ({outcome}), retrying in {:?}",
                delivery.position,
                delay
            );
            tokio::time::sleep(delay).await;
        };

        match &outcome {
            IndexOutcome::Accepted { .. } => {
                self.stats.indexed += 1;
                log::info!(
                    "Anomaly detected and indexed from {}: {outcome}",
                    delivery.position
                );
            }
            IndexOutcome::Transient(_) => {
                self.stats.transient_failures += 1;
                log::warn!(
                    "Dropping anomaly from {} after index failure: {outcome}",
                    delivery.position
                );
                self.dead_letter.record(delivery, &outcome.to_string()).await;
            }
            IndexOutcome::Permanent(_) => {
                self.stats.permanent_failures += 1;
                log::error!(
                    "Dropping anomaly from {}, store {outcome}",
                    delivery.position
                );
                self.dead_letter.record(delivery, &outcome.to_string()).await;
            }
        }
    }

    /// Log running totals once per `stats_interval`, idle or not.
    fn report_totals(&mut self) {
        let Some(interval) = self.settings.stats_interval else {
            return;
        };
        if self.last_report.elapsed() >= interval {
            log::info!("Pipeline totals: {}", self.stats);
            self.last_report = Instant::now();
            self.reports += 1;
        }
    }

    fn transition(&mut self, next: PipelineState) {
        if self.state != next {
            log::debug!("Pipeline {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rdkafka::error::KafkaError;
    use rdkafka::types::RDKafkaErrorCode;
    use serde_json::json;
    use tokio::sync::Notify;

    use crate::models::LogRecord;
    use crate::services::{KeywordClassifier, Verdict};
    use crate::source::memory::MemoryBroker;

    /// Records every document; replies from a script, then accepts.
    #[derive(Clone, Default)]
    struct RecordingSink {
        documents: Arc<Mutex<Vec<AnomalyDocument>>>,
        script: Arc<Mutex<VecDeque<IndexOutcome>>>,
    }

    impl RecordingSink {
        fn scripted(outcomes: impl IntoIterator<Item = IndexOutcome>) -> Self {
            let sink = Self::default();
            sink.script.lock().unwrap().extend(outcomes);
            sink
        }

        fn documents(&self) -> Vec<AnomalyDocument> {
            self.documents.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AnomalySink for RecordingSink {
        async fn index(&self, document: &AnomalyDocument) -> IndexOutcome {
            self.documents.lock().unwrap().push(document.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(IndexOutcome::Accepted {
                    id: Some(format!("doc-{}", self.documents.lock().unwrap().len())),
                })
        }
    }

    /// Never completes; signals when a call has started.
    #[derive(Clone, Default)]
    struct StalledSink {
        entered: Arc<Notify>,
    }

    #[async_trait]
    impl AnomalySink for StalledSink {
        async fn index(&self, _document: &AnomalyDocument) -> IndexOutcome {
            self.entered.notify_one();
            std::future::pending().await
        }
    }

    /// Counts calls and annotates every anomaly.
    #[derive(Default)]
    struct CountingClassifier {
        calls: AtomicUsize,
    }

    impl Classifier for CountingClassifier {
        fn classify(&self, record: &LogRecord) -> Verdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if KeywordClassifier::default().classify(record).anomaly {
                Verdict::anomaly().with_annotation("keyword:error")
            } else {
                Verdict::normal()
            }
        }
    }

    /// Hands out one batch, then refuses acknowledgements for a partition the
    /// group no longer owns.
    struct RevokedPartitionSource {
        pending: Vec<Delivery>,
        revoked: i32,
        acknowledged: Arc<Mutex<Vec<StreamPosition>>>,
    }

    #[async_trait]
    impl RecordSource for RevokedPartitionSource {
        async fn poll(&mut self, _max_records: usize, _wait: Duration) -> Result<Vec<Delivery>> {
            Ok(std::mem::take(&mut self.pending))
        }

        fn acknowledge(&mut self, position: &StreamPosition) -> Result<()> {
            if position.partition == self.revoked {
                return Err(KafkaError::StoreOffset(RDKafkaErrorCode::State).into());
            }
            self.acknowledged.lock().unwrap().push(position.clone());
            Ok(())
        }
    }

    /// A poll that never returns.
    #[derive(Default)]
    struct SilentSource {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RecordSource for SilentSource {
        async fn poll(&mut self, _max_records: usize, _wait: Duration) -> Result<Vec<Delivery>> {
            std::future::pending().await
        }

        fn acknowledge(&mut self, _position: &StreamPosition) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn settings(commit_policy: CommitPolicy) -> PipelineSettings {
        PipelineSettings {
            max_poll_records: 10,
            poll_timeout: Duration::from_millis(10),
            idle_interval: Duration::from_millis(10),
            commit_policy,
            index_retries: 0,
            retry_initial: Duration::from_millis(1),
            retry_max: Duration::from_millis(4),
            stats_interval: None,
        }
    }

    /// Run until the source has been idle for a while, then stop.
    async fn drain<S, C, K>(pipeline: &mut Pipeline<S, C, K>) -> PipelineStats
    where
        S: RecordSource,
        C: Classifier,
        K: AnomalySink,
    {
        let token = CancellationToken::new();
        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });
        pipeline.run(&token).await.unwrap()
    }

    fn epoch_now() -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }

    #[tokio::test]
    async fn test_normal_record_not_indexed() {
        let broker = MemoryBroker::new("logs");
        broker.produce(r#"{"message": "User logged in", "timestamp": 100}"#);

        let sink = RecordingSink::default();
        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            sink.clone(),
            DeadLetterLog::log_only(),
            settings(CommitPolicy::OnReceipt),
        );
        let stats = drain(&mut pipeline).await;

        assert!(sink.documents().is_empty());
        assert_eq!(stats.received, 1);
        assert_eq!(stats.anomalies, 0);
        assert_eq!(pipeline.state(), PipelineState::Stopping);
    }

    #[tokio::test]
    async fn test_error_record_indexed_with_detection_time() {
        let broker = MemoryBroker::new("logs");
        broker.produce(r#"{"message": "Connection ERROR: timeout"}"#);

        let sink = RecordingSink::default();
        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            sink.clone(),
            DeadLetterLog::log_only(),
            settings(CommitPolicy::OnReceipt),
        );

        let before = epoch_now();
        let stats = drain(&mut pipeline).await;
        let after = epoch_now();

        let documents = sink.documents();
        assert_eq!(documents.len(), 1);
        let document = &documents[0];
        assert_eq!(document.message, json!("Connection ERROR: timeout"));
        assert!(document.anomaly);
        let ts = document.timestamp.as_f64().unwrap();
        assert!(ts >= before - 0.001 && ts <= after + 0.001, "{ts}");
        assert_eq!(stats.indexed, 1);
    }

    #[tokio::test]
    async fn test_null_message_is_not_a_fault() {
        let broker = MemoryBroker::new("logs");
        broker.produce(r#"{"message": null}"#);

        let sink = RecordingSink::default();
        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            sink.clone(),
            DeadLetterLog::log_only(),
            settings(CommitPolicy::OnReceipt),
        );
        let stats = drain(&mut pipeline).await;

        assert!(sink.documents().is_empty());
        assert_eq!(stats.received, 1);
        assert_eq!(stats.decode_failures, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_not_retried_and_loop_continues() {
        let broker = MemoryBroker::new("logs");
        broker.produce(r#"{"message": "first error", "timestamp": 1}"#);
        broker.produce(r#"{"message": "second error", "timestamp": 2}"#);

        let sink = RecordingSink::scripted([IndexOutcome::Transient("timeout".into())]);
        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            sink.clone(),
            DeadLetterLog::log_only(),
            settings(CommitPolicy::OnReceipt),
        );
        let stats = drain(&mut pipeline).await;

        let messages: Vec<_> = sink.documents().into_iter().map(|d| d.message).collect();
        assert_eq!(messages, vec![json!("first error"), json!("second error")]);
        assert_eq!(stats.transient_failures, 1);
        assert_eq!(stats.indexed, 1);
        assert_eq!(broker.committed(), Some(2));
    }

    #[tokio::test]
    async fn test_transient_failure_retried_with_backoff_when_enabled() {
        let broker = MemoryBroker::new("logs");
        broker.produce(r#"{"message": "error", "timestamp": 1}"#);

        let sink = RecordingSink::scripted([
            IndexOutcome::Transient("503".into()),
            IndexOutcome::Transient("503".into()),
        ]);
        let mut config = settings(CommitPolicy::AfterIndex);
        config.index_retries = 3;
        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            sink.clone(),
            DeadLetterLog::log_only(),
            config,
        );
        let stats = drain(&mut pipeline).await;

        assert_eq!(sink.documents().len(), 3);
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.transient_failures, 0);
    }

    #[tokio::test]
    async fn test_permanent_failure_never_retried() {
        let dir = tempfile::tempdir().unwrap();
        let dead_letter_path = dir.path().join("dead.jsonl");

        let broker = MemoryBroker::new("logs");
        broker.produce(r#"{"message": "error", "timestamp": 1}"#);

        let sink = RecordingSink::scripted([IndexOutcome::Permanent("HTTP 400".into())]);
        let mut config = settings(CommitPolicy::OnReceipt);
        config.index_retries = 5;
        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            sink.clone(),
            DeadLetterLog::new(Some(dead_letter_path.clone())),
            config,
        );
        let stats = drain(&mut pipeline).await;

        assert_eq!(sink.documents().len(), 1);
        assert_eq!(stats.permanent_failures, 1);
        let trail = tokio::fs::read_to_string(&dead_letter_path).await.unwrap();
        assert_eq!(trail.lines().count(), 1);
        assert!(trail.contains("HTTP 400"));
    }

    #[tokio::test]
    async fn test_malformed_records_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let dead_letter_path = dir.path().join("dead.jsonl");

        let broker = MemoryBroker::new("logs");
        broker.produce("{not json");
        broker.produce(vec![0xffu8, 0xfe]);
        broker.produce("[\"error\"]");
        broker.produce(r#"{"message": "error after garbage", "timestamp": 9}"#);

        let sink = RecordingSink::default();
        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            sink.clone(),
            DeadLetterLog::new(Some(dead_letter_path.clone())),
            settings(CommitPolicy::AfterIndex),
        );
        let stats = drain(&mut pipeline).await;

        assert_eq!(stats.received, 4);
        assert_eq!(stats.decode_failures, 3);
        assert_eq!(stats.indexed, 1);
        assert_eq!(broker.committed(), Some(4));
        let trail = tokio::fs::read_to_string(&dead_letter_path).await.unwrap();
        assert_eq!(trail.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_each_delivery_classified_once() {
        let broker = MemoryBroker::new("logs");
        for i in 0..25 {
            broker.produce(format!(r#"{{"message": "line {i}", "timestamp": {i}}}"#));
        }
        broker.produce(r#"{"message": "ERROR", "timestamp": 99}"#);

        let sink = RecordingSink::default();
        let mut pipeline = Pipeline::new(
            broker.connect(),
            CountingClassifier::default(),
            sink.clone(),
            DeadLetterLog::log_only(),
            settings(CommitPolicy::OnReceipt),
        );
        drain(&mut pipeline).await;

        assert_eq!(pipeline.classifier.calls.load(Ordering::SeqCst), 26);
        let documents = sink.documents();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].annotation.as_deref(), Some("keyword:error"));
        assert_eq!(documents[0].timestamp, json!(99));
    }

    #[tokio::test]
    async fn test_restart_does_not_redeliver_committed_records() {
        let broker = MemoryBroker::new("logs");
        broker.produce(r#"{"message": "error one", "timestamp": 1}"#);
        broker.produce(r#"{"message": "fine", "timestamp": 2}"#);

        let first_sink = RecordingSink::default();
        let mut first = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            first_sink.clone(),
            DeadLetterLog::log_only(),
            settings(CommitPolicy::AfterIndex),
        );
        drain(&mut first).await;
        drop(first);
        assert_eq!(first_sink.documents().len(), 1);

        broker.produce(r#"{"message": "error two", "timestamp": 3}"#);

        let second_sink = RecordingSink::default();
        let mut second = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            second_sink.clone(),
            DeadLetterLog::log_only(),
            settings(CommitPolicy::AfterIndex),
        );
        let stats = drain(&mut second).await;

        assert_eq!(stats.received, 1);
        let documents = second_sink.documents();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].message, json!("error two"));
    }

    /// Stop the pipeline while the sink holds the only anomaly, restart, and
    /// return what the restarted pipeline indexed.
    async fn stop_mid_index_then_restart(policy: CommitPolicy) -> (Option<i64>, Vec<AnomalyDocument>) {
        let broker = MemoryBroker::new("logs");
        broker.produce(r#"{"message": "disk ERROR", "timestamp": 7}"#);

        let stalled = StalledSink::default();
        let entered = Arc::clone(&stalled.entered);
        let token = CancellationToken::new();

        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            stalled,
            DeadLetterLog::log_only(),
            settings(policy),
        );
        let run_token = token.clone();
        let running = tokio::spawn(async move { pipeline.run(&run_token).await });

        entered.notified().await;
        token.cancel();
        let stats = running.await.unwrap().unwrap();
        assert_eq!(stats.anomalies, 1);
        assert_eq!(stats.indexed, 0);

        let committed = broker.committed();
        let sink = RecordingSink::default();
        let mut restarted = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            sink.clone(),
            DeadLetterLog::log_only(),
            settings(policy),
        );
        drain(&mut restarted).await;
        (committed, sink.documents())
    }

    #[tokio::test]
    async fn test_commit_on_receipt_loses_anomaly_stopped_before_indexing() {
        let (committed, documents) = stop_mid_index_then_restart(CommitPolicy::OnReceipt).await;
        assert_eq!(committed, Some(1));
        assert!(documents.is_empty(), "anomaly was redelivered");
    }

    #[tokio::test]
    async fn test_commit_after_index_redelivers_anomaly_stopped_before_indexing() {
        let (committed, documents) = stop_mid_index_then_restart(CommitPolicy::AfterIndex).await;
        assert_eq!(committed, None);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].message, json!("disk ERROR"));
    }

    #[tokio::test]
    async fn test_idle_source_waits_until_shutdown() {
        let broker = MemoryBroker::new("logs");
        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            RecordingSink::default(),
            DeadLetterLog::log_only(),
            settings(CommitPolicy::OnReceipt),
        );

        let started = Instant::now();
        let stats = drain(&mut pipeline).await;
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(stats, PipelineStats::default());
    }

    #[tokio::test]
    async fn test_indexes_into_anomalies_over_http() {
        use crate::storage::OpenSearchSink;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/anomalies/_doc"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"_id": "abc"})))
            .expect(1)
            .mount(&server)
            .await;

        let broker = MemoryBroker::new("logs");
        broker.produce(r#"{"message": "Connection ERROR: timeout"}"#);
        broker.produce(r#"{"message": "User logged in", "timestamp": 100}"#);

        let sink = OpenSearchSink::with_base_url(
            reqwest::Client::new(),
            url::Url::parse(&server.uri()).unwrap(),
            "anomalies",
            false,
        )
        .unwrap();
        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            sink,
            DeadLetterLog::log_only(),
            settings(CommitPolicy::AfterIndex),
        );
        let stats = drain(&mut pipeline).await;
        assert_eq!(stats.indexed, 1);

        let requests = server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["message"], json!("Connection ERROR: timeout"));
        assert_eq!(sent["anomaly"], json!(true));
        assert!(sent["timestamp"].is_f64());
    }

    #[tokio::test]
    async fn test_acknowledge_failure_on_revoked_partition_keeps_streaming() {
        for policy in [CommitPolicy::OnReceipt, CommitPolicy::AfterIndex] {
            let acknowledged = Arc::new(Mutex::new(Vec::new()));
            let source = RevokedPartitionSource {
                pending: vec![
                    Delivery::decode(
                        StreamPosition::new("logs", 0, 4),
                        br#"{"message": "disk error", "timestamp": 1}"#,
                    ),
                    Delivery::decode(
                        StreamPosition::new("logs", 1, 9),
                        br#"{"message": "network error", "timestamp": 2}"#,
                    ),
                ],
                revoked: 0,
                acknowledged: Arc::clone(&acknowledged),
            };

            let sink = RecordingSink::default();
            let mut pipeline = Pipeline::new(
                source,
                KeywordClassifier::default(),
                sink.clone(),
                DeadLetterLog::log_only(),
                settings(policy),
            );
            let stats = drain(&mut pipeline).await;

            let messages: Vec<_> = sink.documents().into_iter().map(|d| d.message).collect();
            assert_eq!(messages, vec![json!("disk error"), json!("network error")], "{policy}");
            assert_eq!(stats.indexed, 2);
            assert_eq!(stats.ack_failures, 1);
            assert_eq!(
                *acknowledged.lock().unwrap(),
                vec![StreamPosition::new("logs", 1, 9)]
            );
        }
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retry_backoff() {
        let broker = MemoryBroker::new("logs");
        broker.produce(r#"{"message": "error", "timestamp": 1}"#);

        let sink = RecordingSink::scripted(
            std::iter::repeat_with(|| IndexOutcome::Transient("503".into())).take(10),
        );
        let mut config = settings(CommitPolicy::AfterIndex);
        config.index_retries = 5;
        config.retry_initial = Duration::from_secs(30);
        config.retry_max = Duration::from_secs(60);
        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            sink.clone(),
            DeadLetterLog::log_only(),
            config,
        );

        let token = CancellationToken::new();
        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let stats = tokio::time::timeout(Duration::from_secs(5), pipeline.run(&token))
            .await
            .expect("run did not stop during backoff")
            .unwrap();

        assert_eq!(sink.documents().len(), 1);
        assert_eq!(stats.anomalies, 1);
        assert_eq!(stats.indexed, 0);
        assert_eq!(stats.transient_failures, 0);
        assert_eq!(broker.committed(), None);
        assert_eq!(pipeline.state(), PipelineState::Stopping);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_poll() {
        let source = SilentSource::default();
        let closed = Arc::clone(&source.closed);
        let mut pipeline = Pipeline::new(
            source,
            KeywordClassifier::default(),
            RecordingSink::default(),
            DeadLetterLog::log_only(),
            settings(CommitPolicy::OnReceipt),
        );

        let token = CancellationToken::new();
        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.cancel();
        });

        let stats = tokio::time::timeout(Duration::from_secs(5), pipeline.run(&token))
            .await
            .expect("run did not stop during poll")
            .unwrap();

        assert_eq!(stats, PipelineStats::default());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_totals_reported_while_idle() {
        let broker = MemoryBroker::new("logs");
        let mut config = settings(CommitPolicy::OnReceipt);
        config.stats_interval = Some(Duration::from_millis(20));
        let mut pipeline = Pipeline::new(
            broker.connect(),
            KeywordClassifier::default(),
            RecordingSink::default(),
            DeadLetterLog::log_only(),
            config,
        );

        drain(&mut pipeline).await;
        assert!(pipeline.reports >= 2, "reports = {}", pipeline.reports);
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.idle_interval, Duration::from_secs(1));
        assert_eq!(settings.commit_policy, CommitPolicy::OnReceipt);
        assert_eq!(settings.index_retries, 0);
        assert_eq!(settings.stats_interval, Some(Duration::from_secs(60)));
    }
}
