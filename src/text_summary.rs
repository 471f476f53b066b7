//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for text mode: one progress line per applied
//! event and a final per-variant table.

use crate::metrics;
use crate::model::{RunAggregate, RunEvent, Variant, VariantState};
use crate::orchestrator::{RunUpdate, SessionRecord};

/// Pre-formatted lines for text output.
pub struct TextSummary {
    pub lines: Vec<String>,
}

fn state_label(state: VariantState) -> &'static str {
    match state {
        VariantState::Idle => "idle",
        VariantState::Querying => "querying",
        VariantState::Output => "output",
        VariantState::Error => "error",
        VariantState::Scored => "scored",
    }
}

/// One stderr line describing what the latest event changed.
pub fn progress_line(update: &RunUpdate) -> Option<String> {
    let event = update.cause.as_ref()?;
    let what = match &event.kind {
        RunEvent::VariantStart(p) => format!("{} started", p.variant_id),
        RunEvent::VariantOutput(p) => match (&p.error, &p.output) {
            (Some(err), _) => format!("{} failed: {err}", p.variant_id),
            (None, Some(out)) => format!("{} -> {}", p.variant_id, out.category),
            (None, None) => format!("{} returned no output", p.variant_id),
        },
        RunEvent::VariantScored(p) => format!("{} scored {:.2}", p.variant_id, p.score.total),
        RunEvent::LeaderChange(p) => format!("leader: {}", p.new_leader),
        RunEvent::RunComplete(_) => match update.aggregate.winner.as_deref() {
            Some(w) => format!("complete, winner {w}"),
            None => "complete, no winner".to_string(),
        },
        RunEvent::Error(_) => format!(
            "error: {}",
            update.aggregate.error.as_deref().unwrap_or("unknown")
        ),
    };
    Some(format!("[{:>5.1}%] {what}", update.progress))
}

fn variant_line(v: &Variant, agg: &RunAggregate) -> String {
    let marker = if agg.winner.as_deref() == Some(v.variant_id.as_str()) {
        '*'
    } else {
        ' '
    };
    let category = v.output().map(|o| o.category.as_str()).unwrap_or("-");
    let score = v
        .score
        .as_ref()
        .map(|s| format!("{:.2}", s.total))
        .unwrap_or_else(|| "-".into());
    let latency = v
        .latency_ms()
        .map(|ms| format!("{ms} ms"))
        .unwrap_or_else(|| "-".into());
    let mut line = format!(
        "{marker} {:<8} {:<9} {:<16} score {:<6} latency {latency}",
        v.variant_id,
        state_label(v.state()),
        category,
        score
    );
    if let Some(err) = v.error() {
        line.push_str(&format!(" ({err})"));
    }
    line
}

/// Build the final summary for a finished session.
pub fn build_text_summary(record: &SessionRecord) -> TextSummary {
    let agg = &record.aggregate;
    let mut lines = Vec::new();

    if let Some(run_id) = record.run_id.as_deref() {
        lines.push(format!("Run: {run_id}"));
    }
    lines.push(format!(
        "Status: {:?} ({:.0}%)",
        agg.status, record.progress
    ));
    match agg.winner.as_deref() {
        Some(w) => lines.push(format!("Winner: {w}")),
        None => {
            if let Some(l) = agg.leader.as_deref() {
                lines.push(format!("Leader: {l}"));
            }
        }
    }
    if let Some((id, total)) = metrics::best_score(agg) {
        lines.push(format!("Best score: {total:.2} ({id})"));
    }
    if let Some(err) = record.error.as_deref() {
        lines.push(format!("Error: {err}"));
    }

    for v in &agg.variants {
        lines.push(variant_line(v, agg));
    }

    if let Some(m) = metrics::run_latency_metrics(agg) {
        lines.push(format!(
            "Latency: avg {:.0} p50 {} p95 {} max {} ms ({} variants)",
            m.mean_ms, m.p50_ms, m.p95_ms, m.max_ms, m.samples
        ));
    }

    TextSummary { lines }
}
