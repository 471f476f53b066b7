//! Run reducer: the single transition function from (aggregate, event) to aggregate.
//!
//! Live streaming and replay both feed events through [`apply`], so the two paths
//! cannot derive different state from the same log. The reducer never fails; input
//! it cannot use is logged and leaves the aggregate unchanged.

use crate::model::{
    Event, RunAggregate, RunEvent, RunStatus, Variant, VariantResult, VariantState,
};
use tracing::{debug, warn};

/// Apply one event. Terminal aggregates (`complete`/`error`) are frozen.
pub fn apply(mut agg: RunAggregate, event: &Event) -> RunAggregate {
    match agg.status {
        RunStatus::Complete | RunStatus::Error => {
            debug!(
                kind = event.kind.kind(),
                status = ?agg.status,
                "dropping event for terminated run"
            );
            return agg;
        }
        RunStatus::Idle => {
            debug!(kind = event.kind.kind(), "dropping event with no run requested");
            return agg;
        }
        // Any event means the server is producing output for this run.
        RunStatus::Compiling => agg.status = RunStatus::Running,
        RunStatus::Running => {}
    }

    match &event.kind {
        RunEvent::VariantStart(p) => match agg.variant_mut(&p.variant_id) {
            Some(existing) => {
                if existing.prompt_spec != p.prompt_spec {
                    warn!(
                        variant_id = %p.variant_id,
                        "conflicting VariantStart payload; keeping the latest prompt_spec"
                    );
                }
                existing.prompt_spec = p.prompt_spec.clone();
            }
            None => agg
                .variants
                .push(Variant::new(p.variant_id.clone(), p.prompt_spec.clone())),
        },
        RunEvent::VariantOutput(p) => match agg.variant_mut(&p.variant_id) {
            None => debug!(variant_id = %p.variant_id, "output for unknown variant ignored"),
            Some(v) if v.result.is_some() => {
                debug!(variant_id = %p.variant_id, "duplicate output ignored")
            }
            Some(v) => {
                v.result = Some(VariantResult {
                    output: p.output.clone(),
                    latency_ms: p.latency_ms,
                    error: p.error.clone(),
                });
            }
        },
        RunEvent::VariantScored(p) => match agg.variant_mut(&p.variant_id) {
            None => debug!(variant_id = %p.variant_id, "score for unknown variant ignored"),
            Some(v) => match v.state() {
                VariantState::Output => v.score = Some(p.score.clone()),
                VariantState::Error => debug!(
                    variant_id = %p.variant_id,
                    "score for failed variant accepted but not applied"
                ),
                VariantState::Scored => {
                    debug!(variant_id = %p.variant_id, "duplicate score ignored")
                }
                VariantState::Idle | VariantState::Querying => debug!(
                    variant_id = %p.variant_id,
                    "score before output ignored"
                ),
            },
        },
        RunEvent::LeaderChange(p) => {
            agg.leader = Some(p.new_leader.clone());
        }
        RunEvent::RunComplete(p) => {
            agg.status = RunStatus::Complete;
            agg.winner = p.winner_variant_id.clone().or_else(|| agg.leader.clone());
            if agg.winner.is_some() {
                agg.leader = agg.winner.clone();
            }
            agg.total_variants = p.total_variants;
        }
        RunEvent::Error(p) => {
            agg.status = RunStatus::Error;
            agg.error = Some(
                p.error
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "Unknown error occurred".to_string()),
            );
        }
    }

    agg
}

/// Record that the server accepted the run, before any event has arrived.
pub fn run_created(mut agg: RunAggregate) -> RunAggregate {
    if agg.status == RunStatus::Compiling {
        agg.status = RunStatus::Running;
    }
    agg
}

/// Fold a whole log into a fresh aggregate.
pub fn fold<'a>(events: impl IntoIterator<Item = &'a Event>) -> RunAggregate {
    events
        .into_iter()
        .fold(RunAggregate::compiling(), |agg, ev| apply(agg, ev))
}
