//! Damped geometric extrapolation from a probe.

use serde::Serialize;

use super::{EstimationConfig, GrowthTrend, SampleResult};

/// Projection ceiling; keeps runaway growth out of floating-point infinity.
const PROJECTION_CEILING: f64 = 1e15;

/// Bounded estimate of nodes reachable within a planned depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Estimate {
    /// Final figure compared against budgets.
    pub nodes: usize,
    /// Projection before margin and cap.
    pub raw: f64,
    pub margin: f64,
    /// Clipped to the table bound.
    pub capped: bool,
    /// Every level up to the planned depth was observed by the probe.
    pub exact: bool,
}

fn geometric_mean(ratios: &[f64]) -> f64 {
    let positive: Vec<f64> = ratios.iter().copied().filter(|r| *r > 0.0).collect();
    if positive.is_empty() {
        return 0.0;
    }
    let log_sum: f64 = positive.iter().map(|r| r.ln()).sum();
    (log_sum / positive.len() as f64).exp()
}

/// Estimate nodes reachable within `max_depth`.
///
/// Non-decreasing in `max_depth` for a fixed sample and never above `table_bound`.
pub fn estimate(
    sample: &SampleResult,
    max_depth: usize,
    table_bound: Option<usize>,
    config: &EstimationConfig,
) -> Estimate {
    let sampled_depth = sample.sampled_depth();
    let min_margin = config.min_safety_margin.max(1.05);
    let margin_default = config.safety_margin.max(min_margin);

    let (raw, margin, exact) = if sample.terminated || max_depth <= sampled_depth {
        let upto = max_depth.min(sampled_depth);
        let observed: usize = sample.level_sizes.iter().take(upto + 1).sum();
        (observed as f64, min_margin, true)
    } else {
        let growth = geometric_mean(&sample.growth_ratios());
        let convergence = if sample.convergence_ratio < config.convergence_threshold {
            sample
                .convergence_ratio
                .max(config.min_convergence_multiplier)
        } else {
            1.0
        };
        let trend = match sample.growth_trend {
            GrowthTrend::Decreasing => config.decreasing_damping,
            _ => 1.0,
        };

        let mut total: f64 = sample.level_sizes.iter().sum::<usize>() as f64;
        let mut level = sample.level_sizes.last().copied().unwrap_or(0) as f64;
        for k in 1..=(max_depth - sampled_depth) {
            let rate = growth * config.damping.powi(k as i32) * convergence * trend;
            level *= rate;
            total += level;
            if level < 0.5 || total > PROJECTION_CEILING {
                break;
            }
        }
        (total.min(PROJECTION_CEILING), margin_default, false)
    };

    let mut nodes = (raw * margin).ceil() as usize;
    let mut capped = false;
    if let Some(bound) = table_bound {
        if nodes > bound {
            nodes = bound;
            capped = true;
        }
    }

    Estimate {
        nodes,
        raw,
        margin,
        capped,
        exact,
    }
}
