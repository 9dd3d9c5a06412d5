//! Frontier-batched breadth-first traversal over relational edges.
//!
//! A walk moves through `Initializing -> Estimating -> Expanding(depth) -> Terminal`.
//! Each `Expanding` step issues exactly one edge fetch for the whole frontier, so a
//! walk that reaches depth D costs at most D + 1 round-trips however wide it gets.
//! A node enters at most one frontier: the first depth at which it is reached.

mod hierarchy;

pub use hierarchy::{traverse_hierarchy, HierarchyNode, HierarchyOptions, HierarchyResult};

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::db::filter::Filter;
use crate::db::ident::validate_identifier;
use crate::db::store::{EdgeQuery, GraphStore};
use crate::db::Deadline;
use crate::error::{RelgraphError, Result};
use crate::guard::{self, GuardResult};
use crate::graph::{
    Edge, EstimationPolicy, GraphHandle, Limits, Node, NodeId, OverflowPolicy, Warning,
};

/// Per-call traversal parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalOptions {
    pub max_depth: usize,
    pub limits: Limits,
    /// Keep the start node in `nodes` and `paths`. It is walked from either way.
    pub include_start: bool,
    /// Attribute columns to return; `None` means all.
    pub node_columns: Option<Vec<String>>,
    /// Reached nodes matching this are kept but not expanded.
    pub stop_condition: Option<Filter>,
    /// Applied to edge rows before they reach the frontier.
    pub edge_filter: Option<Filter>,
    pub estimation: EstimationPolicy,
    pub overflow: OverflowPolicy,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_depth: 5,
            limits: Limits::default(),
            include_start: true,
            node_columns: None,
            stop_condition: None,
            edge_filter: None,
            estimation: EstimationPolicy::default(),
            overflow: OverflowPolicy::default(),
        }
    }
}

impl TraversalOptions {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }
}

/// Where and how a node was first reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Visit {
    pub depth: usize,
    pub parent: Option<NodeId>,
}

/// Result of [`traverse`].
#[derive(Debug, Clone, Serialize)]
pub struct TraversalResult {
    pub start: NodeId,
    /// Reached nodes in discovery order, capped at `max_results`.
    pub nodes: Vec<Node>,
    /// Node id -> ids from the start, for every returned node.
    pub paths: BTreeMap<NodeId, Vec<NodeId>>,
    pub edges: Vec<Edge>,
    pub depth_reached: usize,
    pub nodes_visited: usize,
    pub terminated_at: Vec<NodeId>,
    /// The walk stopped early at the node budget.
    pub truncated: bool,
    pub guard: Option<GuardResult>,
    pub warnings: Vec<Warning>,
}

/// Result of [`traverse_collecting`].
#[derive(Debug, Clone, Serialize)]
pub struct CollectResult {
    pub start: NodeId,
    /// Reached nodes matching the target condition, capped at `max_results`.
    pub matches: Vec<Node>,
    pub paths: BTreeMap<NodeId, Vec<NodeId>>,
    pub match_count: usize,
    pub nodes_traversed: usize,
    pub depth_reached: usize,
    pub terminated_at: Vec<NodeId>,
    pub truncated: bool,
    pub guard: Option<GuardResult>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initializing,
    Estimating,
    Expanding { depth: usize },
    Terminal,
}

/// Bookkeeping left behind by a finished walk, before attributes are resolved.
#[derive(Debug, Default)]
pub(crate) struct Walk {
    pub start: NodeId,
    pub visited: HashMap<NodeId, Visit>,
    /// Visited ids in discovery order.
    pub order: Vec<NodeId>,
    /// Edges from expanded nodes to visited nodes, in walk orientation.
    pub edges: Vec<Edge>,
    pub terminated_at: Vec<NodeId>,
    pub max_depth: usize,
    pub truncated: bool,
    pub guard: Option<GuardResult>,
    pub warnings: Vec<Warning>,
}

impl Walk {
    pub fn start_exists(&self) -> bool {
        !self.visited.is_empty()
    }

    /// Ids from the start to `id` along first-discovery parents.
    pub fn path_to(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            path.push(node);
            current = self.visited.get(&node).and_then(|v| v.parent);
        }
        path.reverse();
        path
    }

    pub fn deepest(&self, ids: &[NodeId]) -> usize {
        ids.iter()
            .filter_map(|id| self.visited.get(id))
            .map(|v| v.depth)
            .max()
            .unwrap_or(0)
    }

    /// Discovery-ordered ids a caller sees, honouring `include_start`.
    pub fn reported(&self, include_start: bool) -> Vec<NodeId> {
        self.order
            .iter()
            .copied()
            .filter(|id| include_start || *id != self.start)
            .collect()
    }
}

/// Sort edges by the frontier position of their walk-side endpoint.
///
/// The sort is stable, so within one parent the store's row order is kept and
/// the earliest-discovered parent always claims a shared child first.
pub(crate) fn order_by_frontier(mut edges: Vec<Edge>, frontier: &[NodeId]) -> Vec<Edge> {
    let position: HashMap<NodeId, usize> = frontier
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i))
        .collect();
    edges.sort_by_key(|e| position.get(&e.from).copied().unwrap_or(usize::MAX));
    edges
}

/// Cap `ids` at `max_results`, recording a warning when anything is dropped.
pub(crate) fn cap_results(
    ids: &[NodeId],
    max_results: usize,
    warnings: &mut Vec<Warning>,
) -> Vec<NodeId> {
    if ids.len() > max_results {
        log::warn!(
            "{} nodes reached, returning the first {}",
            ids.len(),
            max_results
        );
        warnings.push(Warning::ResultsTruncated {
            total: ids.len(),
            returned: max_results,
        });
    }
    ids.iter().take(max_results).copied().collect()
}

struct Walker<'a, S> {
    store: &'a S,
    handle: &'a GraphHandle,
    options: &'a TraversalOptions,
    query: EdgeQuery<'a>,
    deadline: &'a Deadline,
    frontier: Vec<NodeId>,
    walk: Walk,
}

impl<'a, S: GraphStore> Walker<'a, S> {
    fn run(mut self) -> Result<Walk> {
        let mut phase = Phase::Initializing;
        loop {
            phase = match phase {
                Phase::Initializing => self.initialize()?,
                Phase::Estimating => self.estimate()?,
                Phase::Expanding { depth } => self.expand(depth)?,
                Phase::Terminal => break,
            };
            log::trace!("Walk from {} entering {:?}", self.walk.start, phase);
        }
        Ok(self.walk)
    }

    fn initialize(&mut self) -> Result<Phase> {
        self.handle.validate()?;
        if let Some(columns) = &self.options.node_columns {
            for column in columns {
                validate_identifier(column)?;
            }
        }

        let (max_depth, clamped) = self.options.limits.clamp_depth(self.options.max_depth);
        self.walk.max_depth = max_depth;
        self.walk.warnings.extend(clamped);

        let start = self.walk.start;
        if !self.store.node_exists(self.handle, start)? {
            log::debug!("Start node {} not found in {}", start, self.handle.node_table);
            return Ok(Phase::Terminal);
        }

        self.walk.visited.insert(
            start,
            Visit {
                depth: 0,
                parent: None,
            },
        );
        self.walk.order.push(start);
        self.frontier = vec![start];
        Ok(Phase::Estimating)
    }

    fn estimate(&mut self) -> Result<Phase> {
        let budget = self.options.limits.max_nodes;
        let assessment = guard::assess(
            self.store,
            self.handle,
            self.walk.start,
            self.walk.max_depth,
            budget,
            &self.query,
            &self.options.estimation,
            self.deadline,
        )?;
        assessment.enforce(budget)?;
        self.walk.warnings.extend(assessment.warnings());
        self.walk.guard = assessment.guard;

        if self.walk.max_depth == 0 {
            Ok(Phase::Terminal)
        } else {
            Ok(Phase::Expanding { depth: 0 })
        }
    }

    fn expand(&mut self, depth: usize) -> Result<Phase> {
        self.deadline.check()?;
        if self.frontier.is_empty() {
            return Ok(Phase::Terminal);
        }

        let fetched = self
            .store
            .fetch_edges_for_frontier(self.handle, &self.frontier, &self.query)?;
        let budget = self.options.limits.max_nodes;
        let mut next = Vec::new();

        for edge in order_by_frontier(fetched, &self.frontier) {
            if !self.walk.visited.contains_key(&edge.to) {
                if self.walk.visited.len() >= budget {
                    match self.options.overflow {
                        OverflowPolicy::Fail => {
                            return Err(RelgraphError::SafetyLimitExceeded {
                                depth: depth + 1,
                                nodes: self.walk.visited.len() + 1,
                                limit: budget,
                            });
                        }
                        OverflowPolicy::Truncate => {
                            self.walk.truncated = true;
                            continue;
                        }
                    }
                }
                self.walk.visited.insert(
                    edge.to,
                    Visit {
                        depth: depth + 1,
                        parent: Some(edge.from),
                    },
                );
                self.walk.order.push(edge.to);
                next.push(edge.to);
            }
            self.walk.edges.push(edge);
        }

        if let Some(condition) = &self.options.stop_condition {
            let stopped = self.store.matching_ids(self.handle, &next, condition)?;
            if !stopped.is_empty() {
                self.walk
                    .terminated_at
                    .extend(next.iter().filter(|id| stopped.contains(*id)));
                next.retain(|id| !stopped.contains(id));
            }
        }

        log::debug!(
            "Depth {}: frontier {} -> {} to expand, {} visited",
            depth + 1,
            self.frontier.len(),
            next.len(),
            self.walk.visited.len()
        );
        self.frontier = next;

        if self.walk.truncated {
            log::warn!(
                "Walk from {} truncated at {} nodes",
                self.walk.start,
                self.walk.visited.len()
            );
            Ok(Phase::Terminal)
        } else if depth + 1 >= self.walk.max_depth || self.frontier.is_empty() {
            Ok(Phase::Terminal)
        } else {
            Ok(Phase::Expanding { depth: depth + 1 })
        }
    }
}

/// Run the state machine and return its bookkeeping.
pub(crate) fn walk<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    start: NodeId,
    options: &TraversalOptions,
    weight_column: Option<&str>,
    deadline: &Deadline,
) -> Result<Walk> {
    Walker {
        store,
        handle,
        options,
        query: EdgeQuery::new(weight_column, options.edge_filter.as_ref()),
        deadline,
        frontier: Vec::new(),
        walk: Walk {
            start,
            ..Walk::default()
        },
    }
    .run()
}

/// Walk from `start` and return reached nodes, paths and traversed edges.
pub fn traverse<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    start: NodeId,
    options: &TraversalOptions,
    deadline: &Deadline,
) -> Result<TraversalResult> {
    let mut walk = walk(store, handle, start, options, None, deadline)?;

    let reported = walk.reported(options.include_start);
    let returned = cap_results(&reported, options.limits.max_results, &mut walk.warnings);
    let nodes = store.fetch_nodes(handle, &returned, options.node_columns.as_deref())?;
    let paths = returned.iter().map(|id| (*id, walk.path_to(*id))).collect();

    Ok(TraversalResult {
        start,
        nodes,
        paths,
        depth_reached: walk.deepest(&returned),
        nodes_visited: reported.len(),
        edges: walk.edges,
        terminated_at: walk.terminated_at,
        truncated: walk.truncated,
        guard: walk.guard,
        warnings: walk.warnings,
    })
}

/// Same walk as [`traverse`], but only nodes matching `target` are returned.
pub fn traverse_collecting<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    start: NodeId,
    target: &Filter,
    options: &TraversalOptions,
    deadline: &Deadline,
) -> Result<CollectResult> {
    let mut walk = walk(store, handle, start, options, None, deadline)?;

    let mut matched: HashSet<NodeId> = HashSet::new();
    if walk.start_exists() {
        let rest: Vec<NodeId> = walk.reported(false);
        matched = store.matching_ids(handle, &rest, target)?;
        if options.include_start && store.evaluate_condition(handle, start, target)? {
            matched.insert(start);
        }
    }
    let matching: Vec<NodeId> = walk
        .order
        .iter()
        .copied()
        .filter(|id| matched.contains(id))
        .collect();

    let returned = cap_results(&matching, options.limits.max_results, &mut walk.warnings);
    let matches = store.fetch_nodes(handle, &returned, options.node_columns.as_deref())?;
    let paths = returned.iter().map(|id| (*id, walk.path_to(*id))).collect();
    log::debug!(
        "Collected {} of {} traversed nodes from {}",
        matching.len(),
        walk.visited.len(),
        start
    );

    Ok(CollectResult {
        start,
        matches,
        paths,
        match_count: matching.len(),
        nodes_traversed: walk.reported(options.include_start).len(),
        depth_reached: walk.deepest(&walk.order),
        terminated_at: walk.terminated_at,
        truncated: walk.truncated,
        guard: walk.guard,
        warnings: walk.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::SqliteStore;
    use crate::graph::Direction;
    use crate::testutil::{self, handle, CountingStore};

    fn skip(max_depth: usize) -> TraversalOptions {
        TraversalOptions {
            estimation: EstimationPolicy::Skip,
            ..TraversalOptions::new(max_depth)
        }
    }

    fn run(conn: &rusqlite::Connection, start: NodeId, options: &TraversalOptions) -> TraversalResult {
        let store = SqliteStore::new(conn);
        traverse(&store, &handle(), start, options, &Deadline::none()).unwrap()
    }

    fn ids(result: &TraversalResult) -> Vec<NodeId> {
        result.nodes.iter().map(|n| n.id).collect()
    }

    #[test]
    fn test_four_ary_tree_depth_three() {
        let conn = testutil::tree_graph(4, 3);
        let result = run(&conn, 1, &TraversalOptions::new(3));
        assert_eq!(result.nodes_visited, 85);
        assert_eq!(result.nodes.len(), 85);
        assert_eq!(result.depth_reached, 3);
        assert!(result.terminated_at.is_empty());
        assert_eq!(result.paths[&22], vec![1, 2, 6, 22]);
        assert_eq!(result.edges.len(), 84);
        assert!(result.guard.is_some());
    }

    #[test]
    fn test_start_without_outgoing_edges() {
        let conn = testutil::open_memory();
        testutil::insert_nodes(&conn, 1..=2);
        let result = run(&conn, 1, &TraversalOptions::new(4));
        assert_eq!(result.nodes_visited, 1);
        assert_eq!(result.depth_reached, 0);
        assert_eq!(ids(&result), vec![1]);
    }

    #[test]
    fn test_missing_start_is_empty_not_error() {
        let conn = testutil::tree_graph(2, 2);
        let result = run(&conn, 999, &TraversalOptions::new(3));
        assert_eq!(result.nodes_visited, 0);
        assert!(result.nodes.is_empty());
        assert!(result.paths.is_empty());
    }

    #[test]
    fn test_one_fetch_per_level() {
        let conn = testutil::tree_graph(4, 3);
        let store = CountingStore::new(SqliteStore::new(&conn));
        let result = traverse(&store, &handle(), 1, &skip(3), &Deadline::none()).unwrap();
        assert_eq!(result.depth_reached, 3);
        assert!(store.edge_fetches.get() <= result.depth_reached + 1);
        assert_eq!(store.edge_fetches.get(), 3);
        assert_eq!(store.node_fetches.get(), 1);
    }

    #[test]
    fn test_shared_descendants_not_reexpanded() {
        let conn = testutil::bom_graph();
        let result = run(&conn, 1, &skip(5));
        assert_eq!(result.nodes_visited, 5);
        assert_eq!(result.paths.len(), 5);
        assert_eq!(result.paths[&4], vec![1, 2, 4]);
        assert_eq!(result.paths[&5], vec![1, 3, 5]);
        assert_eq!(result.depth_reached, 2);
        let max_path = result.paths.values().map(|p| p.len() - 1).max().unwrap();
        assert_eq!(max_path, result.depth_reached);
    }

    #[test]
    fn test_cycle_terminates() {
        let conn = testutil::open_memory();
        testutil::insert_nodes(&conn, 1..=3);
        testutil::insert_edges(&conn, &[(1, 2), (2, 3), (3, 1)]);
        let result = run(&conn, 1, &skip(10));
        assert_eq!(ids(&result), vec![1, 2, 3]);
        assert_eq!(result.depth_reached, 2);
    }

    #[test]
    fn test_stop_condition_containment() {
        let conn = testutil::tree_graph(2, 3);
        conn.execute("UPDATE nodes SET kind = 'raw' WHERE id = 2", [])
            .unwrap();
        let options = TraversalOptions {
            stop_condition: Some(Filter::eq("kind", "raw")),
            ..skip(3)
        };
        let result = run(&conn, 1, &options);
        assert_eq!(result.terminated_at, vec![2]);
        let reached = ids(&result);
        assert!(reached.contains(&2));
        for child in [4, 5, 8, 9, 10, 11] {
            assert!(!reached.contains(&child), "{} should not be reached", child);
        }
        assert_eq!(result.nodes_visited, 9);
    }

    #[test]
    fn test_exclude_start() {
        let conn = testutil::tree_graph(2, 1);
        let options = TraversalOptions {
            include_start: false,
            ..skip(2)
        };
        let result = run(&conn, 1, &options);
        assert_eq!(ids(&result), vec![2, 3]);
        assert_eq!(result.nodes_visited, 2);
        assert!(!result.paths.contains_key(&1));
        assert_eq!(result.paths[&3], vec![1, 3]);
    }

    #[test]
    fn test_inbound_walk() {
        let conn = testutil::tree_graph(2, 2);
        let store = SqliteStore::new(&conn);
        let h = handle().with_direction(Direction::Inbound);
        let result = traverse(&store, &h, 7, &skip(5), &Deadline::none()).unwrap();
        assert_eq!(ids(&result), vec![7, 3, 1]);
        assert!(result.edges.iter().all(|e| e.reversed));
    }

    #[test]
    fn test_depth_clamped_with_warning() {
        let conn = testutil::tree_graph(2, 3);
        let mut options = skip(10);
        options.limits.max_depth_ceiling = 2;
        let result = run(&conn, 1, &options);
        assert_eq!(result.depth_reached, 2);
        assert!(result
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::DepthClamped { requested: 10, ceiling: 2 })));
    }

    #[test]
    fn test_node_budget_in_loop() {
        let conn = testutil::tree_graph(4, 3);
        let store = SqliteStore::new(&conn);
        let mut options = skip(3);
        options.limits.max_nodes = 10;
        let err = traverse(&store, &handle(), 1, &options, &Deadline::none()).unwrap_err();
        assert!(matches!(
            err,
            RelgraphError::SafetyLimitExceeded { depth: 2, nodes: 11, limit: 10 }
        ));

        options.overflow = OverflowPolicy::Truncate;
        let result = traverse(&store, &handle(), 1, &options, &Deadline::none()).unwrap();
        assert!(result.truncated);
        assert_eq!(result.nodes_visited, 10);
    }

    #[test]
    fn test_estimate_over_budget_aborts_before_expansion() {
        let conn = testutil::tree_graph(4, 3);
        let store = CountingStore::new(SqliteStore::new(&conn));
        let mut options = TraversalOptions::new(3);
        options.limits.max_nodes = 20;
        let err = traverse(&store, &handle(), 1, &options, &Deadline::none()).unwrap_err();
        assert!(matches!(err, RelgraphError::SubgraphTooLarge { budget: 20, .. }));
        assert_eq!(store.node_fetches.get(), 0);
    }

    #[test]
    fn test_results_capped() {
        let conn = testutil::tree_graph(4, 3);
        let mut options = skip(3);
        options.limits.max_results = 10;
        let result = run(&conn, 1, &options);
        assert_eq!(result.nodes.len(), 10);
        assert_eq!(result.paths.len(), 10);
        assert_eq!(result.nodes_visited, 85);
        assert!(result
            .warnings
            .iter()
            .any(|w| matches!(w, Warning::ResultsTruncated { total: 85, returned: 10 })));
    }

    #[test]
    fn test_edge_filter() {
        let conn = testutil::open_memory();
        testutil::insert_nodes(&conn, 1..=4);
        testutil::insert_weighted_edges(&conn, &[(1, 2, 1.0), (1, 3, 9.0), (3, 4, 1.0)]);
        let options = TraversalOptions {
            edge_filter: Some(Filter::lt("weight", 5.0)),
            ..skip(3)
        };
        let result = run(&conn, 1, &options);
        assert_eq!(ids(&result), vec![1, 2]);
    }

    #[test]
    fn test_collecting_reports_total() {
        let conn = testutil::tree_graph(2, 3);
        conn.execute("UPDATE nodes SET kind = 'raw' WHERE id IN (1, 4, 5, 12)", [])
            .unwrap();
        let store = SqliteStore::new(&conn);
        let target = Filter::eq("kind", "raw");
        let result =
            traverse_collecting(&store, &handle(), 1, &target, &skip(3), &Deadline::none())
                .unwrap();
        let found: Vec<_> = result.matches.iter().map(|n| n.id).collect();
        assert_eq!(found, vec![1, 4, 5, 12]);
        assert_eq!(result.match_count, 4);
        assert_eq!(result.nodes_traversed, 15);
        assert_eq!(result.paths[&12], vec![1, 3, 6, 12]);

        let options = TraversalOptions {
            include_start: false,
            ..skip(3)
        };
        let result =
            traverse_collecting(&store, &handle(), 1, &target, &options, &Deadline::none())
                .unwrap();
        assert_eq!(result.match_count, 3);
        assert_eq!(result.nodes_traversed, 14);
    }
}
