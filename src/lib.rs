//! Client for multi-variant prompt runs: consumes a run's event stream live or
//! replays its recorded log, deriving the same run state either way.

pub mod cli;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod reducer;
pub mod storage;
pub mod text_summary;
