//! Pipeline entry points.
//!
//! - `run_detector`: probe the broker, then stream records into the index
//! - `Pipeline`: the consume-detect-index loop itself

pub mod detect;
pub mod driver;

pub use detect::run_detector;
pub use driver::{Pipeline, PipelineSettings, PipelineState, PipelineStats};
