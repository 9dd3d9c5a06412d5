//! Shortest paths over incrementally loaded relational edges.
//!
//! Dijkstra where every pop takes all queued nodes sharing the minimal tentative
//! distance and expands them with one edge fetch. Without a weight column each
//! batch is exactly one BFS level. Relaxation is strict, so among equal-length
//! routes the one discovered first keeps the predecessor slot.
//!
//! "No path" is an answer, not an error: results carry `path: None` plus a message
//! that says whether the search was exhaustive or stopped at a limit.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::Serialize;

use crate::db::filter::Filter;
use crate::db::ident::validate_identifier;
use crate::db::store::{EdgeQuery, GraphStore};
use crate::db::Deadline;
use crate::error::{RelgraphError, Result};
use crate::guard::{self, GuardResult};
use crate::graph::{Edge, EstimationPolicy, GraphHandle, Limits, Node, NodeId, Warning};
use crate::traversal::order_by_frontier;

const DISTANCE_EPSILON: f64 = 1e-9;

/// Per-call pathfinding parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PathOptions {
    /// Numeric edge column; `None` means every edge costs 1. NULL cells cost 1.
    pub weight_column: Option<String>,
    /// Hop limit for the search.
    pub max_depth: usize,
    pub limits: Limits,
    pub node_columns: Option<Vec<String>>,
    pub edge_filter: Option<Filter>,
    pub estimation: EstimationPolicy,
    /// Cap for [`all_shortest_paths`].
    pub max_paths: usize,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            weight_column: None,
            max_depth: 10,
            limits: Limits::default(),
            node_columns: None,
            edge_filter: None,
            estimation: EstimationPolicy::default(),
            max_paths: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PathResult {
    pub start: NodeId,
    pub end: NodeId,
    pub path: Option<Vec<NodeId>>,
    pub distance: Option<f64>,
    /// Attribute maps along the path, in path order.
    pub nodes: Vec<Node>,
    /// Edges along the path, each carrying the weight that was paid.
    pub edges: Vec<Edge>,
    pub nodes_loaded: usize,
    pub error: Option<String>,
    pub guard: Option<GuardResult>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllPathsResult {
    pub start: NodeId,
    pub end: NodeId,
    pub paths: Vec<Vec<NodeId>>,
    pub distance: Option<f64>,
    pub path_count: usize,
    /// More optimal paths exist than `max_paths`; the list is not complete.
    pub truncated: bool,
    pub nodes_loaded: usize,
    pub error: Option<String>,
    pub guard: Option<GuardResult>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    distance: f64,
    seq: u64,
    node: NodeId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // reversed: BinaryHeap is a max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

fn same_distance(a: f64, b: f64) -> bool {
    (a - b).abs() <= DISTANCE_EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// How a search ended.
#[derive(Debug, Clone, Copy)]
enum Outcome {
    Found(f64),
    StartMissing,
    EndMissing,
    Exhausted,
    BudgetExhausted(usize),
    DepthLimited(usize),
}

struct Search<'a, S> {
    store: &'a S,
    handle: &'a GraphHandle,
    options: &'a PathOptions,
    deadline: &'a Deadline,
    distance: HashMap<NodeId, f64>,
    hops: HashMap<NodeId, usize>,
    /// Predecessors on optimal routes, first-discovered first.
    preds: HashMap<NodeId, Vec<NodeId>>,
    /// Cheapest edge seen per (from, to) pair.
    edge_info: HashMap<(NodeId, NodeId), (f64, bool)>,
    settled: HashSet<NodeId>,
    guard: Option<GuardResult>,
    warnings: Vec<Warning>,
}

impl<'a, S: GraphStore> Search<'a, S> {
    fn new(
        store: &'a S,
        handle: &'a GraphHandle,
        options: &'a PathOptions,
        deadline: &'a Deadline,
    ) -> Self {
        Self {
            store,
            handle,
            options,
            deadline,
            distance: HashMap::new(),
            hops: HashMap::new(),
            preds: HashMap::new(),
            edge_info: HashMap::new(),
            settled: HashSet::new(),
            guard: None,
            warnings: Vec::new(),
        }
    }

    fn run(&mut self, start: NodeId, end: NodeId) -> Result<Outcome> {
        self.handle.validate()?;
        if let Some(column) = &self.options.weight_column {
            validate_identifier(column)?;
        }
        let (max_depth, clamped) = self.options.limits.clamp_depth(self.options.max_depth);
        self.warnings.extend(clamped);

        if !self.store.node_exists(self.handle, start)? {
            return Ok(Outcome::StartMissing);
        }
        if !self.store.node_exists(self.handle, end)? {
            return Ok(Outcome::EndMissing);
        }

        let query = EdgeQuery::new(
            self.options.weight_column.as_deref(),
            self.options.edge_filter.as_ref(),
        );
        let budget = self.options.limits.max_nodes;
        let assessment = guard::assess(
            self.store,
            self.handle,
            start,
            max_depth,
            budget,
            &query,
            &self.options.estimation,
            self.deadline,
        )?;
        assessment.enforce(budget)?;
        self.warnings.extend(assessment.warnings());
        self.guard = assessment.guard;

        self.distance.insert(start, 0.0);
        self.hops.insert(start, 0);
        let mut heap = BinaryHeap::new();
        let mut seq = 0u64;
        heap.push(QueueEntry {
            distance: 0.0,
            seq,
            node: start,
        });

        let mut budget_hit = false;
        let mut depth_hit = false;

        while let Some(first) = heap.pop() {
            if self.settled.contains(&first.node) {
                continue;
            }
            self.deadline.check()?;

            let current = first.distance;
            let mut batch = vec![first.node];
            while let Some(peek) = heap.peek() {
                if !same_distance(peek.distance, current) {
                    break;
                }
                if let Some(entry) = heap.pop() {
                    if !self.settled.contains(&entry.node) && !batch.contains(&entry.node) {
                        batch.push(entry.node);
                    }
                }
            }
            self.settled.extend(batch.iter().copied());

            if batch.contains(&end) {
                return Ok(Outcome::Found(self.distance[&end]));
            }

            let expandable: Vec<NodeId> = batch
                .iter()
                .copied()
                .filter(|n| self.hops.get(n).copied().unwrap_or(0) < max_depth)
                .collect();
            if expandable.len() < batch.len() {
                depth_hit = true;
            }
            if expandable.is_empty() {
                continue;
            }

            let fetched = self
                .store
                .fetch_edges_for_frontier(self.handle, &expandable, &query)?;
            for edge in order_by_frontier(fetched, &expandable) {
                let weight = match (self.options.weight_column.is_some(), edge.weight) {
                    (true, Some(w)) if w < 0.0 => {
                        return Err(RelgraphError::InvalidInput(format!(
                            "negative weight {} on edge {} -> {}",
                            w, edge.from, edge.to
                        )));
                    }
                    (true, Some(w)) => w,
                    _ => 1.0,
                };
                if self.settled.contains(&edge.to) {
                    continue;
                }

                let candidate = self.distance[&edge.from] + weight;
                let hops = self.hops[&edge.from] + 1;
                match self.distance.get(&edge.to).copied() {
                    None => {
                        if self.distance.len() >= budget {
                            budget_hit = true;
                            continue;
                        }
                        self.relax(&edge, weight, candidate, hops);
                        seq += 1;
                        heap.push(QueueEntry {
                            distance: candidate,
                            seq,
                            node: edge.to,
                        });
                    }
                    Some(known) if same_distance(candidate, known) => {
                        let preds = self.preds.entry(edge.to).or_default();
                        if !preds.contains(&edge.from) {
                            preds.push(edge.from);
                        }
                        self.note_edge(&edge, weight);
                    }
                    Some(known) if candidate < known => {
                        self.relax(&edge, weight, candidate, hops);
                        seq += 1;
                        heap.push(QueueEntry {
                            distance: candidate,
                            seq,
                            node: edge.to,
                        });
                    }
                    Some(_) => {}
                }
            }
            log::trace!(
                "Settled {} nodes at distance {}, {} loaded",
                batch.len(),
                current,
                self.distance.len()
            );
        }

        if budget_hit {
            Ok(Outcome::BudgetExhausted(budget))
        } else if depth_hit {
            Ok(Outcome::DepthLimited(max_depth))
        } else {
            Ok(Outcome::Exhausted)
        }
    }

    fn relax(&mut self, edge: &Edge, weight: f64, distance: f64, hops: usize) {
        self.distance.insert(edge.to, distance);
        self.hops.insert(edge.to, hops);
        self.preds.insert(edge.to, vec![edge.from]);
        self.note_edge(edge, weight);
    }

    fn note_edge(&mut self, edge: &Edge, weight: f64) {
        let entry = self
            .edge_info
            .entry((edge.from, edge.to))
            .or_insert((weight, edge.reversed));
        if weight < entry.0 {
            *entry = (weight, edge.reversed);
        }
    }

    /// Path along first predecessors.
    fn first_path(&self, start: NodeId, end: NodeId) -> Vec<NodeId> {
        let mut path = vec![end];
        let mut current = end;
        while current != start {
            match self.preds.get(&current).and_then(|p| p.first()) {
                Some(prev) => {
                    current = *prev;
                    path.push(current);
                }
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Up to `max_paths` optimal paths, plus whether more exist.
    fn all_paths(&self, start: NodeId, end: NodeId, max_paths: usize) -> (Vec<Vec<NodeId>>, bool) {
        let mut paths = Vec::new();
        let mut truncated = false;
        // stack of partial reversed paths
        let mut stack: Vec<Vec<NodeId>> = vec![vec![end]];
        while let Some(partial) = stack.pop() {
            let Some(&head) = partial.last() else {
                continue;
            };
            if head == start {
                if paths.len() == max_paths {
                    truncated = true;
                    break;
                }
                let mut path = partial;
                path.reverse();
                paths.push(path);
                continue;
            }
            if let Some(preds) = self.preds.get(&head) {
                for prev in preds.iter().rev() {
                    if partial.contains(prev) {
                        continue;
                    }
                    let mut extended = partial.clone();
                    extended.push(*prev);
                    stack.push(extended);
                }
            }
        }
        (paths, truncated)
    }

    fn path_edges(&self, path: &[NodeId]) -> Vec<Edge> {
        path.windows(2)
            .map(|pair| {
                let (weight, reversed) = self
                    .edge_info
                    .get(&(pair[0], pair[1]))
                    .copied()
                    .unwrap_or((1.0, false));
                Edge {
                    from: pair[0],
                    to: pair[1],
                    weight: Some(weight),
                    reversed,
                }
            })
            .collect()
    }
}

fn describe(outcome: &Outcome, start: NodeId, end: NodeId) -> Option<String> {
    match outcome {
        Outcome::Found(_) => None,
        Outcome::StartMissing => Some(format!("start node {} not found", start)),
        Outcome::EndMissing => Some(format!("end node {} not found", end)),
        Outcome::Exhausted => Some(format!("no path exists from {} to {}", start, end)),
        Outcome::BudgetExhausted(budget) => Some(format!(
            "search truncated: node budget of {} exhausted before reaching {}; a path may still exist",
            budget, end
        )),
        Outcome::DepthLimited(depth) => Some(format!(
            "search truncated: no path from {} to {} within {} hops; a longer path may exist",
            start, end, depth
        )),
    }
}

/// Cheapest path from `start` to `end`.
pub fn shortest_path<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    start: NodeId,
    end: NodeId,
    options: &PathOptions,
    deadline: &Deadline,
) -> Result<PathResult> {
    let mut search = Search::new(store, handle, options, deadline);
    let outcome = search.run(start, end)?;

    let (path, distance, nodes, edges) = match outcome {
        Outcome::Found(distance) => {
            let path = search.first_path(start, end);
            let nodes = store.fetch_nodes(handle, &path, options.node_columns.as_deref())?;
            let edges = search.path_edges(&path);
            (Some(path), Some(distance), nodes, edges)
        }
        _ => (None, None, Vec::new(), Vec::new()),
    };
    let error = describe(&outcome, start, end);
    if let Some(message) = &error {
        log::debug!("Shortest path {} -> {}: {}", start, end, message);
    }

    Ok(PathResult {
        start,
        end,
        path,
        distance,
        nodes,
        edges,
        nodes_loaded: search.distance.len(),
        error,
        guard: search.guard,
        warnings: search.warnings,
    })
}

/// Every path achieving the optimal distance, up to `options.max_paths`.
pub fn all_shortest_paths<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    start: NodeId,
    end: NodeId,
    options: &PathOptions,
    deadline: &Deadline,
) -> Result<AllPathsResult> {
    if options.max_paths == 0 {
        return Err(RelgraphError::InvalidInput(
            "max_paths must be at least 1".to_string(),
        ));
    }
    let mut search = Search::new(store, handle, options, deadline);
    let outcome = search.run(start, end)?;

    let (paths, distance, truncated) = match outcome {
        Outcome::Found(distance) => {
            let (paths, truncated) = search.all_paths(start, end, options.max_paths);
            if truncated {
                log::warn!(
                    "More than {} optimal paths from {} to {}, list is partial",
                    options.max_paths,
                    start,
                    end
                );
            }
            (paths, Some(distance), truncated)
        }
        _ => (Vec::new(), None, false),
    };

    Ok(AllPathsResult {
        start,
        end,
        path_count: paths.len(),
        paths,
        distance,
        truncated,
        nodes_loaded: search.distance.len(),
        error: describe(&outcome, start, end),
        guard: search.guard,
        warnings: search.warnings,
    })
}
