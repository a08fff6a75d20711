//! Pipeline orchestration module.

mod orchestrator;
mod source;
mod stats;

pub use orchestrator::{Pipeline, RunOptions};
pub use source::LineSource;
pub use stats::RunStats;
