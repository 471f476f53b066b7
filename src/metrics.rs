use crate::model::RunAggregate;
use hdrhistogram::Histogram;

/// Latency distribution over the variants that reported one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyMetrics {
    pub samples: u64,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
}

/// Compute latency metrics (mean, median, p95, max) from millisecond samples
pub fn compute_latency_metrics(samples: &[u64]) -> Option<LatencyMetrics> {
    if samples.is_empty() {
        return None;
    }
    // 1 ms .. 1 h at 3 significant digits.
    let mut hist = Histogram::<u64>::new_with_bounds(1, 3_600_000, 3).ok()?;
    for &ms in samples {
        hist.saturating_record(ms.max(1));
    }
    Some(LatencyMetrics {
        samples: hist.len(),
        mean_ms: hist.mean(),
        p50_ms: hist.value_at_quantile(0.50),
        p95_ms: hist.value_at_quantile(0.95),
        max_ms: hist.max(),
    })
}

/// Latency metrics for every variant of `agg` that finished with a latency.
pub fn run_latency_metrics(agg: &RunAggregate) -> Option<LatencyMetrics> {
    let samples: Vec<u64> = agg.variants.iter().filter_map(|v| v.latency_ms()).collect();
    compute_latency_metrics(&samples)
}

/// Highest-scoring variant, ties broken by first-seen order.
pub fn best_score(agg: &RunAggregate) -> Option<(&str, f64)> {
    agg.variants
        .iter()
        .filter_map(|v| v.score.as_ref().map(|s| (v.variant_id.as_str(), s.total)))
        .fold(None, |best, (id, total)| match best {
            Some((_, t)) if t >= total => best,
            _ => Some((id, total)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Score, Variant, VariantResult};
    use std::collections::BTreeMap;

    #[test]
    fn empty_samples_have_no_metrics() {
        assert!(compute_latency_metrics(&[]).is_none());
    }

    #[test]
    fn quantiles_follow_the_samples() {
        let samples: Vec<u64> = (1..=100).collect();
        let m = compute_latency_metrics(&samples).expect("metrics");
        assert_eq!(m.samples, 100);
        assert!((49..=51).contains(&m.p50_ms));
        assert!((94..=96).contains(&m.p95_ms));
        assert_eq!(m.max_ms, 100);
        assert!((m.mean_ms - 50.5).abs() < 0.5);
    }

    #[test]
    fn best_score_prefers_first_on_ties() {
        let mut agg = RunAggregate::compiling();
        for (id, total) in [("v1", 3.0), ("v2", 4.5), ("v3", 4.5)] {
            let mut v = Variant::new(id, "p");
            v.result = Some(VariantResult {
                output: None,
                latency_ms: Some(100),
                error: None,
            });
            v.score = Some(Score {
                variant_id: None,
                total,
                components: BTreeMap::new(),
            });
            agg.variants.push(v);
        }
        assert_eq!(best_score(&agg), Some(("v2", 4.5)));
        assert_eq!(run_latency_metrics(&agg).map(|m| m.samples), Some(3));
    }
}
