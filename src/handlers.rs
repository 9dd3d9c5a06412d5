//! Async entry points: one blocking worker, one read-only connection and one
//! deadline per call.
//!
//! Every handler takes its options by value so the work can move onto the
//! blocking pool. The synchronous engines remain available for callers that
//! manage their own connections.

use serde::Serialize;

use crate::analytics::{
    self, AnalyticsOptions, CentralityResult, ComponentsResult, DensityResult, NeighborOptions,
    NeighborsResult,
};
use crate::config::Config;
use crate::db::filter::Filter;
use crate::db::stats::TableStats;
use crate::db::store::{EdgeQuery, GraphStore, SqliteStore};
use crate::db::Db;
use crate::error::{RelgraphError, Result};
use crate::estimate::{Estimate, EstimationConfig, SampleResult};
use crate::graph::{EstimationPolicy, GraphHandle, Limits, NodeId, Warning};
use crate::guard::{self, AlgorithmKind, GuardResult};
use crate::pathfinding::{self, AllPathsResult, PathOptions, PathResult};
use crate::traversal::{
    self, CollectResult, HierarchyOptions, HierarchyResult, TraversalOptions, TraversalResult,
};

impl Config {
    /// Traversal options seeded from the configured limits and estimator.
    pub fn traversal_options(&self, max_depth: usize) -> TraversalOptions {
        TraversalOptions {
            limits: self.limits,
            estimation: EstimationPolicy::Estimate(self.estimation.clone()),
            ..TraversalOptions::new(max_depth)
        }
    }

    pub fn path_options(&self) -> PathOptions {
        PathOptions {
            limits: self.limits,
            estimation: EstimationPolicy::Estimate(self.estimation.clone()),
            ..PathOptions::default()
        }
    }

    pub fn analytics_options(&self) -> AnalyticsOptions {
        AnalyticsOptions {
            limits: self.limits,
            estimation: EstimationPolicy::Estimate(self.estimation.clone()),
            ..AnalyticsOptions::default()
        }
    }

    pub fn preflight_options(&self, max_depth: usize) -> PreflightOptions {
        PreflightOptions {
            max_depth,
            limits: self.limits,
            estimation: self.estimation.clone(),
            ..PreflightOptions::default()
        }
    }
}

pub async fn traverse(
    db: &Db,
    handle: GraphHandle,
    start: NodeId,
    options: TraversalOptions,
) -> Result<TraversalResult> {
    db.with_deadline(options.limits.timeout(), move |conn, deadline| {
        traversal::traverse(&SqliteStore::new(conn), &handle, start, &options, deadline)
    })
    .await
}

pub async fn traverse_collecting(
    db: &Db,
    handle: GraphHandle,
    start: NodeId,
    target: Filter,
    options: TraversalOptions,
) -> Result<CollectResult> {
    db.with_deadline(options.limits.timeout(), move |conn, deadline| {
        traversal::traverse_collecting(
            &SqliteStore::new(conn),
            &handle,
            start,
            &target,
            &options,
            deadline,
        )
    })
    .await
}

pub async fn traverse_hierarchy(
    db: &Db,
    handle: GraphHandle,
    root: NodeId,
    options: HierarchyOptions,
) -> Result<HierarchyResult> {
    db.with_deadline(options.traversal.limits.timeout(), move |conn, deadline| {
        traversal::traverse_hierarchy(&SqliteStore::new(conn), &handle, root, &options, deadline)
    })
    .await
}

pub async fn shortest_path(
    db: &Db,
    handle: GraphHandle,
    start: NodeId,
    end: NodeId,
    options: PathOptions,
) -> Result<PathResult> {
    db.with_deadline(options.limits.timeout(), move |conn, deadline| {
        pathfinding::shortest_path(&SqliteStore::new(conn), &handle, start, end, &options, deadline)
    })
    .await
}

pub async fn all_shortest_paths(
    db: &Db,
    handle: GraphHandle,
    start: NodeId,
    end: NodeId,
    options: PathOptions,
) -> Result<AllPathsResult> {
    db.with_deadline(options.limits.timeout(), move |conn, deadline| {
        pathfinding::all_shortest_paths(
            &SqliteStore::new(conn),
            &handle,
            start,
            end,
            &options,
            deadline,
        )
    })
    .await
}

/// Run one of the centrality measures named by `algorithm`.
pub async fn centrality(
    db: &Db,
    handle: GraphHandle,
    algorithm: AlgorithmKind,
    options: AnalyticsOptions,
) -> Result<CentralityResult> {
    if !matches!(
        algorithm,
        AlgorithmKind::DegreeCentrality
            | AlgorithmKind::BetweennessCentrality
            | AlgorithmKind::ClosenessCentrality
            | AlgorithmKind::PageRank
    ) {
        return Err(RelgraphError::InvalidInput(format!(
            "{} is not a centrality measure",
            algorithm.name()
        )));
    }
    db.with_deadline(options.limits.timeout(), move |conn, deadline| {
        let store = SqliteStore::new(conn);
        match algorithm {
            AlgorithmKind::BetweennessCentrality => {
                analytics::betweenness_centrality(&store, &handle, &options, deadline)
            }
            AlgorithmKind::ClosenessCentrality => {
                analytics::closeness_centrality(&store, &handle, &options, deadline)
            }
            AlgorithmKind::PageRank => analytics::pagerank(&store, &handle, &options, deadline),
            _ => analytics::degree_centrality(&store, &handle, &options, deadline),
        }
    })
    .await
}

pub async fn connected_components(
    db: &Db,
    handle: GraphHandle,
    min_size: usize,
    options: AnalyticsOptions,
) -> Result<ComponentsResult> {
    db.with_deadline(options.limits.timeout(), move |conn, deadline| {
        analytics::connected_components(&SqliteStore::new(conn), &handle, min_size, &options, deadline)
    })
    .await
}

pub async fn graph_density(
    db: &Db,
    handle: GraphHandle,
    edge_filter: Option<Filter>,
    limits: Limits,
) -> Result<DensityResult> {
    db.with_deadline(limits.timeout(), move |conn, _| {
        analytics::graph_density(&SqliteStore::new(conn), &handle, edge_filter.as_ref())
    })
    .await
}

pub async fn neighbors(
    db: &Db,
    handle: GraphHandle,
    node: NodeId,
    options: NeighborOptions,
) -> Result<NeighborsResult> {
    db.with_deadline(options.limits.timeout(), move |conn, _| {
        analytics::neighbors(&SqliteStore::new(conn), &handle, node, &options)
    })
    .await
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreflightOptions {
    pub max_depth: usize,
    pub limits: Limits,
    pub estimation: EstimationConfig,
    pub edge_filter: Option<Filter>,
    /// Algorithm the caller intends to run; `Traversal` when unset.
    pub algorithm: AlgorithmKind,
}

impl Default for PreflightOptions {
    fn default() -> Self {
        Self {
            max_depth: 5,
            limits: Limits::default(),
            estimation: EstimationConfig::default(),
            edge_filter: None,
            algorithm: AlgorithmKind::Traversal,
        }
    }
}

/// What a walk from `start` would look like, without walking it.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub start: NodeId,
    pub start_exists: bool,
    pub max_depth: usize,
    pub sample: Option<SampleResult>,
    pub stats: Option<TableStats>,
    pub estimate: Option<Estimate>,
    pub guard: Option<GuardResult>,
    /// Present when the algorithm is better served by a bounded whole-graph load.
    pub whole_graph: Option<GuardResult>,
    pub warnings: Vec<Warning>,
}

/// Sample, estimate and guard a planned walk.
pub async fn preflight(
    db: &Db,
    handle: GraphHandle,
    start: NodeId,
    options: PreflightOptions,
) -> Result<PreflightReport> {
    db.with_deadline(options.limits.timeout(), move |conn, deadline| {
        handle.validate()?;
        let store = SqliteStore::new(conn);
        let mut warnings = Vec::new();
        let (max_depth, clamped) = options.limits.clamp_depth(options.max_depth);
        warnings.extend(clamped);

        let start_exists = store.node_exists(&handle, start)?;
        if !start_exists {
            return Ok(PreflightReport {
                start,
                start_exists,
                max_depth,
                sample: None,
                stats: None,
                estimate: None,
                guard: None,
                whole_graph: None,
                warnings,
            });
        }

        let query = EdgeQuery::new(None, options.edge_filter.as_ref());
        let policy = EstimationPolicy::Estimate(options.estimation.clone());
        let assessment = guard::assess(
            &store,
            &handle,
            start,
            max_depth,
            options.limits.max_nodes,
            &query,
            &policy,
            deadline,
        )?;
        warnings.extend(assessment.warnings());

        let whole_graph = assessment
            .sample
            .as_ref()
            .filter(|sample| {
                guard::should_use_whole_graph_analytics(
                    sample,
                    assessment.stats.as_ref(),
                    options.algorithm,
                    &options.estimation,
                )
            })
            .map(|_| guard::whole_graph_recommendation(options.algorithm));
        if let Some(rec) = &whole_graph {
            warnings.extend(rec.warnings.iter().cloned());
        }

        log::info!(
            "Preflight from {} to depth {}: estimate {:?}, action {:?}",
            start,
            max_depth,
            assessment.estimate.as_ref().map(|e| e.nodes),
            assessment.guard.as_ref().map(|g| g.action)
        );
        Ok(PreflightReport {
            start,
            start_exists,
            max_depth,
            sample: assessment.sample,
            stats: assessment.stats,
            estimate: assessment.estimate,
            guard: assessment.guard,
            whole_graph,
            warnings,
        })
    })
    .await
}
