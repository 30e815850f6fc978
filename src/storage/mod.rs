//! Persistence for detected anomalies.
//!
//! - `opensearch`: the index store sink, one HTTP request per document
//! - `dead_letter`: JSON-lines trail of records the pipeline gave up on
//!
//! ## Outcome contract
//!
//! ```text
//! Accepted   store acknowledged the write        -> count, move on
//! Transient  network, timeout, 408/429/5xx       -> optional retry, then drop
//! Permanent  document rejected (other 4xx)       -> drop, never retry
//! ```

pub mod dead_letter;
pub mod opensearch;

use std::fmt;

use async_trait::async_trait;

use crate::models::AnomalyDocument;

// Re-export for convenience
pub use dead_letter::DeadLetterLog;
pub use opensearch::OpenSearchSink;

/// Result of a single index attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Store acknowledged the write
    Accepted { id: Option<String> },
    /// Worth retrying later
    Transient(String),
    /// Retrying cannot help
    Permanent(String),
}

impl IndexOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IndexOutcome::Accepted { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, IndexOutcome::Transient(_))
    }
}

impl fmt::Display for IndexOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexOutcome::Accepted { id: Some(id) } => write!(f, "accepted as {id}"),
            IndexOutcome::Accepted { id: None } => write!(f, "accepted"),
            IndexOutcome::Transient(reason) => write!(f, "transient failure: {reason}"),
            IndexOutcome::Permanent(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// Trait for anomaly index backends.
#[async_trait]
pub trait AnomalySink: Send + Sync {
    /// Persist one document. Never panics and never returns an error: every
    /// failure is folded into the outcome.
    async fn index(&self, document: &AnomalyDocument) -> IndexOutcome;
}
