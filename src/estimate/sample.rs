//! Bounded probe BFS.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::EstimationConfig;
use crate::db::store::{EdgeQuery, GraphStore};
use crate::db::Deadline;
use crate::error::Result;
use crate::graph::{GraphHandle, NodeId};

/// Shape of level-to-level growth in the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowthTrend {
    Increasing,
    Stable,
    Decreasing,
}

/// What the probe saw.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleResult {
    pub visited: usize,
    /// Nodes first reached at each depth; `level_sizes[0]` is the start.
    pub level_sizes: Vec<usize>,
    /// The frontier emptied inside the probe, so the reachable set is known exactly.
    pub terminated: bool,
    pub growth_trend: GrowthTrend,
    /// Newly discovered nodes per distinct edge examined; 1.0 for a tree, lower with
    /// shared children, lateral edges or cycles.
    pub convergence_ratio: f64,
    /// Largest level-to-level expansion factor.
    pub max_expansion: f64,
    pub hub_detected: bool,
    /// Distinct stored edges examined; a row fetched from both endpoints counts once.
    pub edges_seen: usize,
    /// Edges returned by the store across all levels, echoes included.
    pub edges_fetched: usize,
    /// The probe hit `sample_node_cap` before its depth.
    pub truncated: bool,
}

impl SampleResult {
    /// Deepest level the probe recorded.
    pub fn sampled_depth(&self) -> usize {
        self.level_sizes.len().saturating_sub(1)
    }

    /// Consecutive level ratios.
    pub fn growth_ratios(&self) -> Vec<f64> {
        self.level_sizes
            .windows(2)
            .filter(|w| w[0] > 0)
            .map(|w| w[1] as f64 / w[0] as f64)
            .collect()
    }
}

/// Classify growth from the first and last consecutive-level ratios.
pub(crate) fn classify_trend(ratios: &[f64], threshold: f64) -> GrowthTrend {
    if ratios.len() < 2 {
        return GrowthTrend::Stable;
    }
    let first = ratios[0];
    let last = ratios[ratios.len() - 1];
    if first <= 0.0 {
        return GrowthTrend::Stable;
    }
    let change = (last - first) / first;
    if change > threshold {
        GrowthTrend::Increasing
    } else if change < -threshold {
        GrowthTrend::Decreasing
    } else {
        GrowthTrend::Stable
    }
}

/// Walk at most `probe_depth` levels from `start`, one batched fetch per level.
pub fn sample<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    start: NodeId,
    probe_depth: usize,
    query: &EdgeQuery<'_>,
    config: &EstimationConfig,
    deadline: &Deadline,
) -> Result<SampleResult> {
    let mut depth_of: HashMap<NodeId, usize> = HashMap::new();
    depth_of.insert(start, 0);
    let mut frontier = vec![start];
    let mut level_sizes = vec![1usize];
    let mut seen_rows: HashSet<(NodeId, NodeId)> = HashSet::new();
    let mut edges_fetched = 0usize;
    let mut terminated = false;
    let mut truncated = false;

    for depth in 0..probe_depth {
        deadline.check()?;
        let edges = store.fetch_edges_for_frontier(handle, &frontier, query)?;
        edges_fetched += edges.len();

        let mut next = Vec::new();
        for edge in &edges {
            // key by stored orientation so an undirected walk sees each row once
            let row = if edge.reversed {
                (edge.to, edge.from)
            } else {
                (edge.from, edge.to)
            };
            seen_rows.insert(row);
            if !depth_of.contains_key(&edge.to) {
                depth_of.insert(edge.to, depth + 1);
                next.push(edge.to);
            }
        }

        if next.is_empty() {
            terminated = true;
            break;
        }
        level_sizes.push(next.len());

        if depth_of.len() > config.sample_node_cap {
            truncated = true;
            break;
        }
        frontier = next;
    }

    let visited = depth_of.len();
    let edges_seen = seen_rows.len();
    let convergence_ratio = if edges_seen == 0 {
        1.0
    } else {
        (visited - 1) as f64 / edges_seen as f64
    };

    let mut result = SampleResult {
        visited,
        level_sizes,
        terminated,
        growth_trend: GrowthTrend::Stable,
        convergence_ratio,
        max_expansion: 0.0,
        hub_detected: false,
        edges_seen,
        edges_fetched,
        truncated,
    };
    let ratios = result.growth_ratios();
    result.max_expansion = ratios.iter().copied().fold(0.0, f64::max);
    result.hub_detected = result.max_expansion > config.hub_threshold;
    result.growth_trend = classify_trend(&ratios, config.stable_growth_threshold);

    log::debug!(
        "Sampled {} nodes from {} over {} levels {:?} (terminated: {}, convergence: {:.2}, hub: {})",
        result.visited,
        start,
        result.sampled_depth(),
        result.level_sizes,
        result.terminated,
        result.convergence_ratio,
        result.hub_detected
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::SqliteStore;
    use crate::testutil::{self, handle};

    fn run_sample(conn: &rusqlite::Connection, depth: usize, config: &EstimationConfig) -> SampleResult {
        let store = SqliteStore::new(conn);
        sample(
            &store,
            &handle(),
            1,
            depth,
            &EdgeQuery::default(),
            config,
            &Deadline::none(),
        )
        .unwrap()
    }

    #[test]
    fn test_tree_sample() {
        let conn = testutil::tree_graph(4, 3);
        let s = run_sample(&conn, 2, &EstimationConfig::default());
        assert_eq!(s.level_sizes, vec![1, 4, 16]);
        assert_eq!(s.visited, 21);
        assert!(!s.terminated);
        assert_eq!(s.growth_trend, GrowthTrend::Stable);
        assert!((s.convergence_ratio - 1.0).abs() < 1e-9);
        assert!(!s.hub_detected);
        assert!((s.max_expansion - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_terminates_inside_probe() {
        let conn = testutil::tree_graph(4, 3);
        let s = run_sample(&conn, 5, &EstimationConfig::default());
        assert!(s.terminated);
        assert_eq!(s.level_sizes, vec![1, 4, 16, 64]);
        assert_eq!(s.visited, 85);
    }

    #[test]
    fn test_dag_convergence_below_one() {
        let conn = testutil::bom_graph();
        let s = run_sample(&conn, 5, &EstimationConfig::default());
        // 4 discovered nodes over 5 edges; two parts share the bolt
        assert_eq!(s.visited, 5);
        assert!(s.convergence_ratio < 1.0);
        assert!(s.terminated);
    }

    #[test]
    fn test_lateral_and_back_edges_lower_convergence() {
        let conn = testutil::open_memory();
        testutil::insert_nodes(&conn, 1..=6);
        testutil::insert_edges(&conn, &[(1, 2), (1, 3), (2, 3), (2, 4), (4, 5), (1, 5), (3, 6)]);
        let s = run_sample(&conn, 4, &EstimationConfig::default());
        assert!(s.terminated);
        assert_eq!(s.visited, 6);
        assert_eq!(s.edges_seen, 7);
        // 2->3 is lateral and 4->5 points back at level one
        assert!((s.convergence_ratio - 5.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_undirected_sample_counts_each_row_once() {
        let conn = testutil::tree_graph(2, 3);
        let store = SqliteStore::new(&conn);
        let s = sample(
            &store,
            &GraphHandle {
                direction: crate::graph::Direction::Both,
                ..handle()
            },
            1,
            3,
            &EdgeQuery::default(),
            &EstimationConfig::default(),
            &Deadline::none(),
        )
        .unwrap();
        assert_eq!(s.visited, 15);
        assert_eq!(s.edges_seen, 14);
        assert!(s.edges_fetched > s.edges_seen);
        assert!((s.convergence_ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hub_detection() {
        let conn = testutil::open_memory();
        testutil::insert_nodes(&conn, 1..=61);
        let edges: Vec<_> = (2..=61).map(|c| (1, c)).collect();
        testutil::insert_edges(&conn, &edges);
        let s = run_sample(&conn, 3, &EstimationConfig::default());
        assert!(s.hub_detected);
        assert!((s.max_expansion - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_cap() {
        let conn = testutil::tree_graph(4, 3);
        let config = EstimationConfig {
            sample_node_cap: 10,
            ..EstimationConfig::default()
        };
        let s = run_sample(&conn, 5, &config);
        assert!(s.truncated);
        assert!(!s.terminated);
        assert_eq!(s.level_sizes, vec![1, 4, 16]);
    }

    #[test]
    fn test_trend_classification() {
        assert_eq!(classify_trend(&[2.0, 2.1, 2.0], 0.2), GrowthTrend::Stable);
        assert_eq!(classify_trend(&[2.0, 3.0, 4.0], 0.2), GrowthTrend::Increasing);
        assert_eq!(classify_trend(&[4.0, 2.0, 1.0], 0.2), GrowthTrend::Decreasing);
        assert_eq!(classify_trend(&[5.0], 0.2), GrowthTrend::Stable);
    }
}
