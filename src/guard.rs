//! Pre-execution guards: decide whether a planned graph operation may start.
//!
//! Guards are pure functions of their inputs. Nothing is cached between calls
//! because table statistics drift.

use serde::Serialize;

use crate::db::stats::TableStats;
use crate::db::store::{EdgeQuery, GraphStore};
use crate::db::Deadline;
use crate::error::{RelgraphError, Result};
use crate::estimate::{estimate, sample, Estimate, EstimationConfig, SampleResult};
use crate::graph::{EstimationPolicy, GraphHandle, NodeId, Warning};

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendedAction {
    Traverse,
    Aggregate,
    UseWholeGraphAnalytics,
    Abort,
    WarnAndProceed,
}

/// A guard decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardResult {
    /// The planned work fits the budget (possibly within tolerance).
    pub safe: bool,
    pub action: RecommendedAction,
    pub reason: String,
    pub estimate: Option<usize>,
    pub warnings: Vec<Warning>,
}

/// Operation families, for deciding whether incremental loading can work at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    Traversal,
    ShortestPath,
    AllShortestPaths,
    DegreeCentrality,
    BetweennessCentrality,
    ClosenessCentrality,
    PageRank,
    ConnectedComponents,
}

impl AlgorithmKind {
    /// Needs every node and edge before the first answer is meaningful.
    pub fn requires_global_view(self) -> bool {
        matches!(
            self,
            AlgorithmKind::DegreeCentrality
                | AlgorithmKind::BetweennessCentrality
                | AlgorithmKind::ClosenessCentrality
                | AlgorithmKind::PageRank
                | AlgorithmKind::ConnectedComponents
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            AlgorithmKind::Traversal => "traversal",
            AlgorithmKind::ShortestPath => "shortest_path",
            AlgorithmKind::AllShortestPaths => "all_shortest_paths",
            AlgorithmKind::DegreeCentrality => "degree_centrality",
            AlgorithmKind::BetweennessCentrality => "betweenness_centrality",
            AlgorithmKind::ClosenessCentrality => "closeness_centrality",
            AlgorithmKind::PageRank => "pagerank",
            AlgorithmKind::ConnectedComponents => "connected_components",
        }
    }
}

/// Compare a node count against the budget and its tolerance band.
pub fn check_volume(
    estimate: usize,
    node_budget: usize,
    config: &EstimationConfig,
    source: &str,
) -> GuardResult {
    let tolerance = (node_budget as f64 * config.warn_tolerance).floor() as usize;
    if estimate <= node_budget {
        GuardResult {
            safe: true,
            action: RecommendedAction::Traverse,
            reason: format!("{} of {} nodes fits budget of {}", source, estimate, node_budget),
            estimate: Some(estimate),
            warnings: Vec::new(),
        }
    } else if estimate <= tolerance {
        log::warn!(
            "{} of {} nodes exceeds budget {} within tolerance, proceeding",
            source,
            estimate,
            node_budget
        );
        GuardResult {
            safe: true,
            action: RecommendedAction::WarnAndProceed,
            reason: format!(
                "{} of {} nodes exceeds budget of {} but is within tolerance {}",
                source, estimate, node_budget, tolerance
            ),
            estimate: Some(estimate),
            warnings: vec![Warning::OverBudget {
                estimate,
                budget: node_budget,
            }],
        }
    } else {
        GuardResult {
            safe: false,
            action: RecommendedAction::Abort,
            reason: format!(
                "{} of {} nodes exceeds budget of {} beyond tolerance {}",
                source, estimate, node_budget, tolerance
            ),
            estimate: Some(estimate),
            warnings: Vec::new(),
        }
    }
}

/// Hub check, then junction check, then volume check.
pub fn check_guards(
    sample: &SampleResult,
    max_depth: usize,
    node_budget: usize,
    stats: Option<&TableStats>,
    table_bound: Option<usize>,
    config: &EstimationConfig,
) -> GuardResult {
    let est = estimate(sample, max_depth, table_bound, config);

    if sample.hub_detected {
        let result = GuardResult {
            safe: false,
            action: RecommendedAction::Abort,
            reason: format!(
                "hub detected: expansion factor {:.1} exceeds threshold {:.1}, estimate unreliable",
                sample.max_expansion, config.hub_threshold
            ),
            estimate: Some(est.nodes),
            warnings: Vec::new(),
        };
        log::info!("Guard: {}", result.reason);
        return result;
    }

    let volume = check_volume(est.nodes, node_budget, config, "estimated reach");
    let mut result = match stats.filter(|s| s.is_bipartite_junction()) {
        // aggregate wins at any size; `safe` still says whether a walk would fit
        Some(stats) => GuardResult {
            safe: volume.safe,
            action: RecommendedAction::Aggregate,
            reason: format!(
                "{} is a pure junction between two relations; a count or join answers this cheaper ({})",
                stats.edge_table, volume.reason
            ),
            estimate: Some(est.nodes),
            warnings: vec![Warning::AggregateRecommended {
                edge_table: stats.edge_table.clone(),
            }],
        },
        None => volume,
    };
    if sample.truncated {
        result.warnings.push(Warning::SampleTruncated {
            visited: sample.visited,
            cap: config.sample_node_cap,
        });
    }

    log::debug!("Guard: {:?} ({})", result.action, result.reason);
    result
}

/// Guard for loading a whole relation: exact counts replace the estimate.
pub fn check_table_guards(
    node_count: usize,
    edge_count: usize,
    node_budget: usize,
    edge_budget: usize,
    config: &EstimationConfig,
) -> GuardResult {
    if edge_count > edge_budget {
        return GuardResult {
            safe: false,
            action: RecommendedAction::Abort,
            reason: format!(
                "whole-graph load of {} edges exceeds edge budget of {}",
                edge_count, edge_budget
            ),
            estimate: Some(node_count),
            warnings: Vec::new(),
        };
    }
    check_volume(node_count, node_budget, config, "whole-graph load")
}

/// Whether to load the subgraph whole instead of walking it incrementally.
pub fn should_use_whole_graph_analytics(
    sample: &SampleResult,
    stats: Option<&TableStats>,
    algorithm: AlgorithmKind,
    config: &EstimationConfig,
) -> bool {
    if algorithm.requires_global_view() {
        return true;
    }
    // hubs defeat estimation; a small edge table is cheaper to load outright
    sample.hub_detected
        && stats.is_some_and(|s| s.row_count <= config.whole_graph_edge_limit)
}

/// Recommendation record for [`should_use_whole_graph_analytics`].
pub fn whole_graph_recommendation(algorithm: AlgorithmKind) -> GuardResult {
    GuardResult {
        safe: true,
        action: RecommendedAction::UseWholeGraphAnalytics,
        reason: format!(
            "{} needs global information; load the bounded graph whole",
            algorithm.name()
        ),
        estimate: None,
        warnings: vec![Warning::WholeGraphRecommended {
            algorithm: algorithm.name().to_string(),
        }],
    }
}

/// Everything the estimation phase learned about a planned walk.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Assessment {
    pub sample: Option<SampleResult>,
    pub stats: Option<TableStats>,
    pub estimate: Option<Estimate>,
    /// `None` only when estimation was skipped.
    pub guard: Option<GuardResult>,
}

impl Assessment {
    /// Fail with `SubgraphTooLarge` unless the guard allows the walk.
    pub fn enforce(&self, node_budget: usize) -> Result<()> {
        match &self.guard {
            Some(guard) if !guard.safe => Err(RelgraphError::SubgraphTooLarge {
                estimate: guard.estimate.unwrap_or(0),
                budget: node_budget,
                reason: guard.reason.clone(),
            }),
            _ => Ok(()),
        }
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.guard
            .as_ref()
            .map(|g| g.warnings.clone())
            .unwrap_or_default()
    }
}

/// Run the estimation phase a policy asks for, without expanding anything.
#[allow(clippy::too_many_arguments)]
pub fn assess<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    start: NodeId,
    max_depth: usize,
    node_budget: usize,
    query: &EdgeQuery<'_>,
    policy: &EstimationPolicy,
    deadline: &Deadline,
) -> Result<Assessment> {
    match policy {
        EstimationPolicy::Skip => {
            log::debug!("Estimation skipped by caller for start {}", start);
            Ok(Assessment::default())
        }
        EstimationPolicy::Override { bound, config } => Ok(Assessment {
            guard: Some(check_volume(*bound, node_budget, config, "caller-supplied bound")),
            ..Assessment::default()
        }),
        EstimationPolicy::Estimate(config) => {
            let stats = store.table_stats(handle)?;
            let probe_depth = config.probe_depth.min(max_depth);
            let sampled = sample(store, handle, start, probe_depth, query, config, deadline)?;
            let table_bound = Some(stats.reachable_bound(handle.direction));
            let est = estimate(&sampled, max_depth, table_bound, config);
            let guard = check_guards(&sampled, max_depth, node_budget, Some(&stats), table_bound, config);
            if guard.action != RecommendedAction::Traverse {
                log::info!("Guard for start {}: {:?} ({})", start, guard.action, guard.reason);
            }
            Ok(Assessment {
                sample: Some(sampled),
                stats: Some(stats),
                estimate: Some(est),
                guard: Some(guard),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::GrowthTrend;

    fn sample(levels: Vec<usize>, terminated: bool) -> SampleResult {
        SampleResult {
            visited: levels.iter().sum(),
            level_sizes: levels,
            terminated,
            growth_trend: GrowthTrend::Stable,
            convergence_ratio: 1.0,
            max_expansion: 4.0,
            hub_detected: false,
            edges_seen: 0,
            edges_fetched: 0,
            truncated: false,
        }
    }

    fn stats(junction: bool, self_ref: bool, rows: usize) -> TableStats {
        TableStats {
            edge_table: "links".to_string(),
            row_count: rows,
            distinct_sources: rows,
            distinct_targets: rows,
            is_junction: junction,
            is_self_referential: self_ref,
            forbids_self_loops: false,
            density: 0.1,
            from_statistics: false,
        }
    }

    #[test]
    fn test_within_budget_traverses() {
        let s = sample(vec![1, 4, 16, 64], true);
        let g = check_guards(&s, 3, 10_000, None, None, &EstimationConfig::default());
        assert!(g.safe);
        assert_eq!(g.action, RecommendedAction::Traverse);
        assert_eq!(g.estimate, Some(90));
        assert!(g.warnings.is_empty());
    }

    #[test]
    fn test_tolerance_band_warns() {
        let s = sample(vec![1, 4, 16, 64], true);
        // 85 * 1.05 = 89.25 -> 90, budget 80, tolerance 100
        let g = check_guards(&s, 3, 80, None, None, &EstimationConfig::default());
        assert!(g.safe);
        assert_eq!(g.action, RecommendedAction::WarnAndProceed);
        assert!(matches!(
            g.warnings[0],
            Warning::OverBudget { estimate: 90, budget: 80 }
        ));
    }

    #[test]
    fn test_far_over_budget_aborts() {
        let s = sample(vec![1, 4, 16, 64], true);
        let g = check_guards(&s, 3, 20, None, None, &EstimationConfig::default());
        assert!(!g.safe);
        assert_eq!(g.action, RecommendedAction::Abort);
        assert_eq!(g.estimate, Some(90));
    }

    #[test]
    fn test_hub_aborts_regardless_of_estimate() {
        let mut s = sample(vec![1, 60], true);
        s.hub_detected = true;
        s.max_expansion = 60.0;
        let g = check_guards(&s, 1, 10_000, None, None, &EstimationConfig::default());
        assert!(!g.safe);
        assert_eq!(g.action, RecommendedAction::Abort);
        assert!(g.reason.contains("hub"));
    }

    #[test]
    fn test_bipartite_junction_recommends_aggregate() {
        let s = sample(vec![1, 4, 16, 64], true);
        let st = stats(true, false, 100);
        let g = check_guards(&s, 3, 10_000, Some(&st), None, &EstimationConfig::default());
        assert!(g.safe);
        assert_eq!(g.action, RecommendedAction::Aggregate);
        assert!(g
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::AggregateRecommended { .. })));

        // over budget the aggregate is still the answer, carrying the estimate
        let far = check_guards(&s, 3, 20, Some(&st), None, &EstimationConfig::default());
        assert!(!far.safe);
        assert_eq!(far.action, RecommendedAction::Aggregate);
        assert_eq!(far.estimate, Some(90));
        assert!(far.reason.contains("links"));
        assert!(far.reason.contains("20"));

        let self_ref = stats(true, true, 100);
        let g = check_guards(&s, 3, 10_000, Some(&self_ref), None, &EstimationConfig::default());
        assert_eq!(g.action, RecommendedAction::Traverse);
    }

    #[test]
    fn test_guard_is_deterministic() {
        let s = sample(vec![1, 5, 25, 125], false);
        let config = EstimationConfig::default();
        let first = check_guards(&s, 10, 2_000, None, Some(5_000), &config);
        for _ in 0..5 {
            let again = check_guards(&s, 10, 2_000, None, Some(5_000), &config);
            assert_eq!(again.action, first.action);
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_whole_graph_recommendation() {
        let config = EstimationConfig::default();
        let mut s = sample(vec![1, 4], false);
        assert!(should_use_whole_graph_analytics(
            &s,
            None,
            AlgorithmKind::PageRank,
            &config
        ));
        assert!(!should_use_whole_graph_analytics(
            &s,
            None,
            AlgorithmKind::Traversal,
            &config
        ));
        s.hub_detected = true;
        let small = stats(false, true, 500);
        assert!(should_use_whole_graph_analytics(
            &s,
            Some(&small),
            AlgorithmKind::ShortestPath,
            &config
        ));
        let large = stats(false, true, 1_000_000);
        assert!(!should_use_whole_graph_analytics(
            &s,
            Some(&large),
            AlgorithmKind::ShortestPath,
            &config
        ));
        let rec = whole_graph_recommendation(AlgorithmKind::PageRank);
        assert_eq!(rec.action, RecommendedAction::UseWholeGraphAnalytics);
    }

    #[test]
    fn test_assess_policies() {
        let conn = crate::testutil::tree_graph(4, 3);
        let store = crate::db::store::SqliteStore::new(&conn);
        let h = crate::testutil::handle();
        let q = EdgeQuery::default();
        let none = Deadline::none();

        let skipped = assess(&store, &h, 1, 3, 10, &q, &EstimationPolicy::Skip, &none).unwrap();
        assert!(skipped.guard.is_none());
        assert!(skipped.enforce(10).is_ok());

        let override_policy = EstimationPolicy::Override {
            bound: 500,
            config: EstimationConfig::default(),
        };
        let overridden = assess(&store, &h, 1, 3, 10, &q, &override_policy, &none).unwrap();
        assert!(overridden.sample.is_none());
        assert!(matches!(
            overridden.enforce(10),
            Err(RelgraphError::SubgraphTooLarge { estimate: 500, budget: 10, .. })
        ));

        let estimated = assess(&store, &h, 1, 3, 10_000, &q, &EstimationPolicy::default(), &none)
            .unwrap();
        let sampled = estimated.sample.as_ref().unwrap();
        assert_eq!(sampled.level_sizes, vec![1, 4, 16, 64]);
        // 85 * 1.05 rounds to 90, then the table bound (84 targets + start) caps it
        let est = estimated.estimate.as_ref().unwrap();
        assert_eq!(est.nodes, 85);
        assert!(est.capped);
        assert!(estimated.enforce(10_000).is_ok());

        let tight = assess(&store, &h, 1, 3, 20, &q, &EstimationPolicy::default(), &none).unwrap();
        assert!(tight.enforce(20).is_err());
    }

    #[test]
    fn test_override_uses_callers_tolerance() {
        let conn = crate::testutil::tree_graph(2, 2);
        let store = crate::db::store::SqliteStore::new(&conn);
        let h = crate::testutil::handle();
        let q = EdgeQuery::default();
        let none = Deadline::none();

        // 120 against 100 is inside the default 1.25 band
        let lenient = EstimationPolicy::Override {
            bound: 120,
            config: EstimationConfig::default(),
        };
        let a = assess(&store, &h, 1, 2, 100, &q, &lenient, &none).unwrap();
        assert_eq!(a.guard.as_ref().unwrap().action, RecommendedAction::WarnAndProceed);
        assert!(a.enforce(100).is_ok());

        let strict = EstimationPolicy::Override {
            bound: 120,
            config: EstimationConfig {
                warn_tolerance: 1.1,
                ..EstimationConfig::default()
            },
        };
        let a = assess(&store, &h, 1, 2, 100, &q, &strict, &none).unwrap();
        assert_eq!(a.guard.as_ref().unwrap().action, RecommendedAction::Abort);
        assert!(a.enforce(100).is_err());
    }

    #[test]
    fn test_table_guards_use_exact_counts() {
        let config = EstimationConfig::default();
        let ok = check_table_guards(900, 5_000, 1_000, 100_000, &config);
        assert_eq!(ok.action, RecommendedAction::Traverse);
        assert_eq!(ok.estimate, Some(900));

        let warn = check_table_guards(1_100, 5_000, 1_000, 100_000, &config);
        assert_eq!(warn.action, RecommendedAction::WarnAndProceed);

        let too_many_edges = check_table_guards(10, 200_000, 1_000, 100_000, &config);
        assert!(!too_many_edges.safe);
        assert!(too_many_edges.reason.contains("edge budget"));
    }
}
