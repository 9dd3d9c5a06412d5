//! Size estimation: probe a few BFS levels, then extrapolate to the planned depth.
//!
//! A plain geometric projection badly overestimates graphs whose descendants
//! are shared (bills of materials, org charts with dotted lines), so the
//! projection is damped per level and again when the probe saw convergence or
//! shrinking growth. The result is multiplied by a safety margin and capped
//! by whatever the edge table can possibly hold.

mod extrapolate;
mod sample;

pub use extrapolate::{estimate, Estimate};
pub use sample::{sample, GrowthTrend, SampleResult};

use serde::{Deserialize, Serialize};

/// Tuning for sampling, extrapolation and the guard's tolerance band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationConfig {
    /// Levels explored by the probe.
    #[serde(default = "default_probe_depth")]
    pub probe_depth: usize,
    /// Level-to-level expansion factor treated as a hub.
    #[serde(default = "default_hub_threshold")]
    pub hub_threshold: f64,
    /// Per-extra-level damping of the growth rate.
    #[serde(default = "default_damping")]
    pub damping: f64,
    /// Convergence ratios below this count as shared descendants.
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,
    /// Floor for the convergence multiplier.
    #[serde(default = "default_min_convergence_multiplier")]
    pub min_convergence_multiplier: f64,
    /// Extra damping when growth is shrinking.
    #[serde(default = "default_decreasing_damping")]
    pub decreasing_damping: f64,
    /// Relative change in growth ratio that counts as a trend.
    #[serde(default = "default_stable_growth_threshold")]
    pub stable_growth_threshold: f64,
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    /// Margin applied when the probe saw the whole reachable set.
    #[serde(default = "default_min_safety_margin")]
    pub min_safety_margin: f64,
    /// Probe stops once this many nodes are visited.
    #[serde(default = "default_sample_node_cap")]
    pub sample_node_cap: usize,
    /// Estimates up to `budget * warn_tolerance` proceed with a warning.
    #[serde(default = "default_warn_tolerance")]
    pub warn_tolerance: f64,
    /// Edge tables up to this size are cheap to load whole.
    #[serde(default = "default_whole_graph_edge_limit")]
    pub whole_graph_edge_limit: usize,
}

fn default_probe_depth() -> usize {
    5
}

fn default_hub_threshold() -> f64 {
    50.0
}

fn default_damping() -> f64 {
    0.85
}

fn default_convergence_threshold() -> f64 {
    0.9
}

fn default_min_convergence_multiplier() -> f64 {
    0.1
}

fn default_decreasing_damping() -> f64 {
    0.7
}

fn default_stable_growth_threshold() -> f64 {
    0.2
}

fn default_safety_margin() -> f64 {
    1.2
}

fn default_min_safety_margin() -> f64 {
    1.05
}

fn default_sample_node_cap() -> usize {
    5_000
}

fn default_warn_tolerance() -> f64 {
    1.25
}

fn default_whole_graph_edge_limit() -> usize {
    10_000
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            probe_depth: default_probe_depth(),
            hub_threshold: default_hub_threshold(),
            damping: default_damping(),
            convergence_threshold: default_convergence_threshold(),
            min_convergence_multiplier: default_min_convergence_multiplier(),
            decreasing_damping: default_decreasing_damping(),
            stable_growth_threshold: default_stable_growth_threshold(),
            safety_margin: default_safety_margin(),
            min_safety_margin: default_min_safety_margin(),
            sample_node_cap: default_sample_node_cap(),
            warn_tolerance: default_warn_tolerance(),
            whole_graph_edge_limit: default_whole_graph_edge_limit(),
        }
    }
}
