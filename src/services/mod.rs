// src/services/mod.rs

//! Stateless services used around the main loop.
//!
//! - `probe`: blocking startup gate on broker reachability
//! - `classifier`: anomaly predicate over a single record

pub mod classifier;
pub mod probe;

pub use classifier::{Classifier, KeywordClassifier, Verdict, classify};
pub use probe::{ProbeTarget, probe_until_reachable, wait_for_broker};
