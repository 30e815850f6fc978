// src/services/classifier.rs

//! Anomaly classification.
//!
//! A classifier is a pure predicate over one record. The driver only sees the
//! [`Classifier`] trait, so richer rules can replace the keyword match without
//! touching the loop.

use crate::models::LogRecord;

/// Keyword used by the baseline rule.
pub const DEFAULT_KEYWORD: &str = "error";

/// Outcome of classifying one record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
    pub anomaly: bool,
    /// Optional note copied into the indexed document
    pub annotation: Option<String>,
}

impl Verdict {
    pub fn normal() -> Self {
        Self::default()
    }

    pub fn anomaly() -> Self {
        Self {
            anomaly: true,
            annotation: None,
        }
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }
}

/// Maps a record to a verdict. Must be stateless and must not fail.
pub trait Classifier: Send + Sync {
    fn classify(&self, record: &LogRecord) -> Verdict;
}

/// Flags records whose `message` contains a keyword, ignoring case.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    keyword: String,
}

impl KeywordClassifier {
    pub fn new(keyword: impl AsRef<str>) -> Self {
        Self {
            keyword: keyword.as_ref().to_lowercase(),
        }
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    fn matches(&self, message: &str) -> bool {
        message.to_lowercase().contains(&self.keyword)
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORD)
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, record: &LogRecord) -> Verdict {
        if self.matches(record.message_text()) {
            Verdict::anomaly()
        } else {
            Verdict::normal()
        }
    }
}

/// Baseline rule: does the lower-cased message contain `"error"`?
pub fn classify(record: &LogRecord) -> bool {
    record.message_text().to_lowercase().contains(DEFAULT_KEYWORD)
}
