use crate::model::{RunAggregate, RunStatus};

/// Variant count assumed until the server tells us otherwise.
pub const DEFAULT_BASELINE: usize = 3;
/// Highest value reported while a run is still open.
pub const OPEN_RUN_CAP: f64 = 90.0;

/// Completion estimate in `[0, 100]`.
///
/// Terminal variants (`scored` or `error`) count against the larger of the
/// variants seen so far and `baseline`. The result stays at or below
/// [`OPEN_RUN_CAP`] until the run is `complete`, which reports exactly 100.
pub fn progress(agg: &RunAggregate, baseline: usize) -> f64 {
    if agg.status == RunStatus::Complete {
        return 100.0;
    }
    let announced = agg.total_variants.map(|n| n as usize).unwrap_or(0);
    let total = agg.variants.len().max(baseline).max(announced).max(1);
    let done = agg.terminal_variants();
    ((done as f64 / total as f64) * OPEN_RUN_CAP).clamp(0.0, OPEN_RUN_CAP)
}
