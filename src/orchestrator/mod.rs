//! Application-level orchestration.
//!
//! This module owns run lifecycle control (start/replay/reset) and post-run processing
//! such as log export and auto-save. CLI layers call into this module to keep
//! responsibilities separated.

mod controller;
mod post_process;

pub use controller::{
    run_controller, Command, ControllerSettings, Mode, ReplaySource, RunController, RunUpdate,
    SessionRecord,
};
pub use post_process::{process_session, OutputTargets, ProcessedSession};
