//! Network analytics over a bounded, fully loaded subgraph.
//!
//! Centralities and components need the whole (sub)graph in memory before the
//! first answer means anything. The loader refuses anything the guard would not
//! let a traversal touch: whole relations are checked with exact counts, a
//! neighborhood is sampled first and then walked under the node budget.

mod centrality;
mod components;
mod local;

pub use centrality::{
    betweenness_centrality, closeness_centrality, degree_centrality, pagerank, CentralityResult,
    RankedNode,
};
pub use components::{connected_components, Component, ComponentsResult};
pub use local::{graph_density, neighbors, DensityResult, NeighborOptions, NeighborsResult};

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::db::filter::Filter;
use crate::db::store::{EdgeQuery, GraphStore};
use crate::db::Deadline;
use crate::error::{RelgraphError, Result};
use crate::estimate::EstimationConfig;
use crate::guard::{self, AlgorithmKind, GuardResult};
use crate::graph::{Direction, EstimationPolicy, GraphHandle, Limits, NodeId, Warning};
use crate::traversal::{self, TraversalOptions};

/// Which part of the graph an analytics call loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyticsScope {
    /// Every row of the node and edge relations.
    WholeGraph,
    /// Nodes within `max_depth` hops of `start`.
    Neighborhood { start: NodeId, max_depth: usize },
}

/// Per-call analytics parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsOptions {
    pub scope: AnalyticsScope,
    pub limits: Limits,
    /// Whole-graph loads above this many edges are refused.
    pub max_edges: usize,
    pub estimation: EstimationPolicy,
    pub edge_filter: Option<Filter>,
    pub node_columns: Option<Vec<String>>,
    /// Ranked nodes returned by centrality calls.
    pub top_n: usize,
    /// Member attribute maps returned per component.
    pub sample_size: usize,
    pub pagerank_damping: f64,
    pub pagerank_max_iterations: usize,
    pub pagerank_tolerance: f64,
}

impl Default for AnalyticsOptions {
    fn default() -> Self {
        Self {
            scope: AnalyticsScope::WholeGraph,
            limits: Limits::default(),
            max_edges: 100_000,
            estimation: EstimationPolicy::default(),
            edge_filter: None,
            node_columns: None,
            top_n: 10,
            sample_size: 3,
            pagerank_damping: 0.85,
            pagerank_max_iterations: 100,
            pagerank_tolerance: 1e-6,
        }
    }
}

impl AnalyticsOptions {
    pub fn neighborhood(start: NodeId, max_depth: usize) -> Self {
        Self {
            scope: AnalyticsScope::Neighborhood { start, max_depth },
            ..Self::default()
        }
    }

    fn estimation_config(&self) -> EstimationConfig {
        self.estimation.config().cloned().unwrap_or_default()
    }
}

/// Shape of the loaded graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub density: f64,
    pub directed: bool,
    pub weakly_connected: bool,
    pub strongly_connected: bool,
    pub component_count: usize,
}

/// Compact adjacency over dense indices. Self-loops and duplicate edges are dropped.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoadedGraph {
    /// Node ids, ascending; position is the dense index.
    pub ids: Vec<NodeId>,
    /// Neighbors in walk direction (both sides when undirected).
    pub succ: Vec<Vec<usize>>,
    pub pred: Vec<Vec<usize>>,
    pub directed: bool,
    pub edge_count: usize,
}

impl LoadedGraph {
    /// Build from stored-orientation pairs. Pairs touching unknown ids are skipped.
    pub fn build(
        mut ids: Vec<NodeId>,
        pairs: impl IntoIterator<Item = (NodeId, NodeId)>,
        direction: Direction,
    ) -> Self {
        ids.sort_unstable();
        ids.dedup();
        let index: HashMap<NodeId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let n = ids.len();
        let directed = direction != Direction::Both;

        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut dangling = 0usize;
        for (a, b) in pairs {
            let (Some(&ia), Some(&ib)) = (index.get(&a), index.get(&b)) else {
                dangling += 1;
                continue;
            };
            if ia == ib {
                continue;
            }
            let key = match direction {
                Direction::Outbound => (ia, ib),
                Direction::Inbound => (ib, ia),
                Direction::Both => (ia.min(ib), ia.max(ib)),
            };
            seen.insert(key);
        }
        if dangling > 0 {
            log::debug!("Skipped {} edges with endpoints outside the loaded node set", dangling);
        }

        let mut succ = vec![Vec::new(); n];
        let mut pred = vec![Vec::new(); n];
        for &(a, b) in &seen {
            succ[a].push(b);
            if directed {
                pred[b].push(a);
            } else {
                succ[b].push(a);
            }
        }
        if !directed {
            pred = succ.clone();
        }
        for list in succ.iter_mut().chain(pred.iter_mut()) {
            list.sort_unstable();
        }

        Self {
            ids,
            succ,
            pred,
            directed,
            edge_count: seen.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn degree(&self, i: usize) -> usize {
        if self.directed {
            self.succ[i].len() + self.pred[i].len()
        } else {
            self.succ[i].len()
        }
    }

    /// Hop distances from `source` along `succ`; `usize::MAX` when unreachable.
    pub fn bfs_distances(&self, source: usize) -> Vec<usize> {
        let mut dist = vec![usize::MAX; self.len()];
        dist[source] = 0;
        let mut queue = VecDeque::from([source]);
        while let Some(v) = queue.pop_front() {
            for &w in &self.succ[v] {
                if dist[w] == usize::MAX {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
            }
        }
        dist
    }

    fn reaches_all(&self, adjacency: &[Vec<usize>]) -> bool {
        let mut seen = vec![false; self.len()];
        seen[0] = true;
        let mut queue = VecDeque::from([0usize]);
        let mut count = 1;
        while let Some(v) = queue.pop_front() {
            for &w in &adjacency[v] {
                if !seen[w] {
                    seen[w] = true;
                    count += 1;
                    queue.push_back(w);
                }
            }
        }
        count == self.len()
    }

    pub fn stats(&self) -> GraphStats {
        let n = self.len();
        let density = local::density(n, self.edge_count, self.directed);
        let component_count = components::weak_components(self).len();
        let weakly_connected = n > 0 && component_count == 1;
        let strongly_connected = if self.directed {
            n > 0 && self.reaches_all(&self.succ) && self.reaches_all(&self.pred)
        } else {
            weakly_connected
        };
        GraphStats {
            node_count: n,
            edge_count: self.edge_count,
            density,
            directed: self.directed,
            weakly_connected,
            strongly_connected,
            component_count,
        }
    }
}

/// A loaded graph plus what the guard said about loading it.
pub(crate) struct Loaded {
    pub graph: LoadedGraph,
    pub guard: Option<GuardResult>,
    pub warnings: Vec<Warning>,
}

/// Load the scope's subgraph under the guard.
pub(crate) fn load<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    kind: AlgorithmKind,
    options: &AnalyticsOptions,
    deadline: &Deadline,
) -> Result<Loaded> {
    handle.validate()?;
    match options.scope {
        AnalyticsScope::WholeGraph => load_whole(store, handle, options, deadline),
        AnalyticsScope::Neighborhood { start, max_depth } => {
            load_neighborhood(store, handle, kind, start, max_depth, options, deadline)
        }
    }
}

fn load_whole<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    options: &AnalyticsOptions,
    deadline: &Deadline,
) -> Result<Loaded> {
    let budget = options.limits.max_nodes;
    let node_count = store.count_nodes(handle)?;
    let edge_count = store.count_edges(handle, options.edge_filter.as_ref())?;

    let guard = match &options.estimation {
        EstimationPolicy::Skip => {
            if node_count > budget {
                return Err(RelgraphError::SafetyLimitExceeded {
                    depth: 0,
                    nodes: node_count,
                    limit: budget,
                });
            }
            None
        }
        EstimationPolicy::Override { bound, config } => Some(guard::check_volume(
            *bound,
            budget,
            config,
            "caller-supplied bound",
        )),
        EstimationPolicy::Estimate(config) => Some(guard::check_table_guards(
            node_count,
            edge_count,
            budget,
            options.max_edges,
            config,
        )),
    };
    if let Some(g) = guard.as_ref().filter(|g| !g.safe) {
        return Err(RelgraphError::SubgraphTooLarge {
            estimate: g.estimate.unwrap_or(node_count),
            budget,
            reason: g.reason.clone(),
        });
    }
    deadline.check()?;

    let ids = store.node_ids(handle, node_count)?;
    let query = EdgeQuery::new(None, options.edge_filter.as_ref());
    let edges = store.edge_list(handle, &query, edge_count)?;
    log::debug!(
        "Loaded whole graph {}: {} nodes, {} edges",
        handle.edge_table,
        ids.len(),
        edges.len()
    );

    let graph = LoadedGraph::build(
        ids,
        edges.into_iter().map(|e| (e.from, e.to)),
        handle.direction,
    );
    let warnings = guard
        .as_ref()
        .map(|g| g.warnings.clone())
        .unwrap_or_default();
    Ok(Loaded {
        graph,
        guard,
        warnings,
    })
}

fn load_neighborhood<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    kind: AlgorithmKind,
    start: NodeId,
    max_depth: usize,
    options: &AnalyticsOptions,
    deadline: &Deadline,
) -> Result<Loaded> {
    let budget = options.limits.max_nodes;
    let (depth, _) = options.limits.clamp_depth(max_depth);
    let query = EdgeQuery::new(None, options.edge_filter.as_ref());
    let mut warnings = Vec::new();

    let assessment = if store.node_exists(handle, start)? {
        let assessment = guard::assess(
            store,
            handle,
            start,
            depth,
            budget,
            &query,
            &options.estimation,
            deadline,
        )?;
        assessment.enforce(budget)?;
        warnings.extend(assessment.warnings());
        Some(assessment)
    } else {
        None
    };

    let global = match assessment.as_ref().and_then(|a| a.sample.as_ref()) {
        Some(sample) => guard::should_use_whole_graph_analytics(
            sample,
            assessment.as_ref().and_then(|a| a.stats.as_ref()),
            kind,
            &options.estimation_config(),
        ),
        None => kind.requires_global_view(),
    };
    if global {
        warnings.extend(guard::whole_graph_recommendation(kind).warnings);
    }

    // the estimate above already vetted the walk
    let walk_options = TraversalOptions {
        max_depth,
        limits: options.limits,
        edge_filter: options.edge_filter.clone(),
        estimation: EstimationPolicy::Skip,
        ..TraversalOptions::default()
    };
    let walk = traversal::walk(store, handle, start, &walk_options, None, deadline)?;
    warnings.extend(walk.warnings.iter().cloned());

    let mut pairs: Vec<(NodeId, NodeId)> = walk
        .edges
        .iter()
        .map(|e| if e.reversed { (e.to, e.from) } else { (e.from, e.to) })
        .collect();

    // nodes the walk never expanded still share edges with the rest of the neighborhood
    let unexpanded: Vec<NodeId> = walk
        .order
        .iter()
        .copied()
        .filter(|id| {
            walk.visited.get(id).is_some_and(|v| v.depth >= walk.max_depth)
                || walk.terminated_at.contains(id)
        })
        .collect();
    if !unexpanded.is_empty() {
        deadline.check()?;
        let boundary = store.fetch_edges_for_frontier(handle, &unexpanded, &query)?;
        pairs.extend(
            boundary
                .iter()
                .filter(|e| walk.visited.contains_key(&e.to))
                .map(|e| if e.reversed { (e.to, e.from) } else { (e.from, e.to) }),
        );
    }
    let graph = LoadedGraph::build(walk.order.clone(), pairs, handle.direction);
    log::debug!(
        "Loaded neighborhood of {} to depth {}: {} nodes, {} edges",
        start,
        depth,
        graph.len(),
        graph.edge_count
    );

    Ok(Loaded {
        graph,
        guard: assessment.and_then(|a| a.guard),
        warnings,
    })
}
