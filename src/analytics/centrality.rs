//! Degree, betweenness, closeness and PageRank over a [`LoadedGraph`].
//!
//! All distances are hop counts. Betweenness is Brandes' algorithm; closeness
//! uses the Wasserman-Faust correction so partially reachable nodes are not
//! over-rewarded.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use serde_json::{Map, Value};

use super::{load, AnalyticsOptions, AnalyticsScope, GraphStats, LoadedGraph};
use crate::db::store::GraphStore;
use crate::db::Deadline;
use crate::error::Result;
use crate::guard::{AlgorithmKind, GuardResult};
use crate::graph::{GraphHandle, NodeId, Warning};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedNode {
    pub id: NodeId,
    pub score: f64,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CentralityResult {
    pub algorithm: AlgorithmKind,
    pub scope: AnalyticsScope,
    /// Highest scores first; ties broken by ascending id.
    pub top: Vec<RankedNode>,
    pub stats: GraphStats,
    /// PageRank only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converged: Option<bool>,
    pub guard: Option<GuardResult>,
    pub warnings: Vec<Warning>,
}

pub(crate) fn degree_scores(graph: &LoadedGraph) -> Vec<f64> {
    let n = graph.len();
    if n <= 1 {
        return vec![0.0; n];
    }
    (0..n)
        .map(|i| graph.degree(i) as f64 / (n - 1) as f64)
        .collect()
}

pub(crate) fn betweenness_scores(graph: &LoadedGraph, deadline: &Deadline) -> Result<Vec<f64>> {
    let n = graph.len();
    let mut scores = vec![0.0f64; n];

    for source in 0..n {
        deadline.check()?;
        let mut stack = Vec::with_capacity(n);
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0f64; n];
        let mut dist = vec![usize::MAX; n];
        sigma[source] = 1.0;
        dist[source] = 0;

        let mut queue = VecDeque::from([source]);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for &w in &graph.succ[v] {
                if dist[w] == usize::MAX {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0f64; n];
        while let Some(w) = stack.pop() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != source {
                scores[w] += delta[w];
            }
        }
    }

    // undirected pairs are counted from both ends, which the same scale absorbs
    if n > 2 {
        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        for score in &mut scores {
            *score *= scale;
        }
    }
    Ok(scores)
}

pub(crate) fn closeness_scores(graph: &LoadedGraph, deadline: &Deadline) -> Result<Vec<f64>> {
    let n = graph.len();
    let mut scores = vec![0.0f64; n];
    for (u, score) in scores.iter_mut().enumerate() {
        deadline.check()?;
        let dist = graph.bfs_distances(u);
        let reached: Vec<usize> = dist.iter().copied().filter(|d| *d != usize::MAX).collect();
        let total: usize = reached.iter().sum();
        let others = reached.len() - 1;
        if total > 0 && n > 1 {
            *score = (others as f64 / total as f64) * (others as f64 / (n - 1) as f64);
        }
    }
    Ok(scores)
}

/// Power iteration; dangling mass is spread evenly.
pub(crate) fn pagerank_scores(
    graph: &LoadedGraph,
    damping: f64,
    max_iterations: usize,
    tolerance: f64,
    deadline: &Deadline,
) -> Result<(Vec<f64>, usize, bool)> {
    let n = graph.len();
    if n == 0 {
        return Ok((Vec::new(), 0, true));
    }
    let nf = n as f64;
    let mut rank = vec![1.0 / nf; n];

    for iteration in 1..=max_iterations {
        deadline.check()?;
        let dangling: f64 = (0..n)
            .filter(|v| graph.succ[*v].is_empty())
            .map(|v| rank[v])
            .sum();
        let base = (1.0 - damping) / nf + damping * dangling / nf;
        let mut next = vec![base; n];
        for v in 0..n {
            let out = &graph.succ[v];
            if out.is_empty() {
                continue;
            }
            let share = damping * rank[v] / out.len() as f64;
            for &w in out {
                next[w] += share;
            }
        }
        let change: f64 = next.iter().zip(&rank).map(|(a, b)| (a - b).abs()).sum();
        rank = next;
        if change < nf * tolerance {
            return Ok((rank, iteration, true));
        }
    }
    log::warn!(
        "PageRank did not converge within {} iterations",
        max_iterations
    );
    Ok((rank, max_iterations, false))
}

/// Indices of the `top_n` best scores, ties by ascending id.
fn top_indices(graph: &LoadedGraph, scores: &[f64], top_n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|a, b| {
        scores[*b]
            .total_cmp(&scores[*a])
            .then(graph.ids[*a].cmp(&graph.ids[*b]))
    });
    order.truncate(top_n);
    order
}

fn rank<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    kind: AlgorithmKind,
    options: &AnalyticsOptions,
    deadline: &Deadline,
) -> Result<CentralityResult> {
    let loaded = load(store, handle, kind, options, deadline)?;
    let graph = &loaded.graph;

    let mut iterations = None;
    let mut converged = None;
    let scores = match kind {
        AlgorithmKind::BetweennessCentrality => betweenness_scores(graph, deadline)?,
        AlgorithmKind::ClosenessCentrality => closeness_scores(graph, deadline)?,
        AlgorithmKind::PageRank => {
            let (scores, iters, done) = pagerank_scores(
                graph,
                options.pagerank_damping,
                options.pagerank_max_iterations,
                options.pagerank_tolerance,
                deadline,
            )?;
            iterations = Some(iters);
            converged = Some(done);
            scores
        }
        _ => degree_scores(graph),
    };

    let top = top_indices(graph, &scores, options.top_n);
    let top_ids: Vec<NodeId> = top.iter().map(|i| graph.ids[*i]).collect();
    let mut attributes: HashMap<NodeId, Map<String, Value>> = store
        .fetch_nodes(handle, &top_ids, options.node_columns.as_deref())?
        .into_iter()
        .map(|n| (n.id, n.attributes))
        .collect();
    let top = top
        .into_iter()
        .map(|i| RankedNode {
            id: graph.ids[i],
            score: scores[i],
            attributes: attributes.remove(&graph.ids[i]).unwrap_or_default(),
        })
        .collect();

    log::debug!(
        "{} over {} nodes finished",
        kind.name(),
        graph.len()
    );
    Ok(CentralityResult {
        algorithm: kind,
        scope: options.scope,
        top,
        stats: graph.stats(),
        iterations,
        converged,
        guard: loaded.guard,
        warnings: loaded.warnings,
    })
}

pub fn degree_centrality<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    options: &AnalyticsOptions,
    deadline: &Deadline,
) -> Result<CentralityResult> {
    rank(store, handle, AlgorithmKind::DegreeCentrality, options, deadline)
}

pub fn betweenness_centrality<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    options: &AnalyticsOptions,
    deadline: &Deadline,
) -> Result<CentralityResult> {
    rank(store, handle, AlgorithmKind::BetweennessCentrality, options, deadline)
}

pub fn closeness_centrality<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    options: &AnalyticsOptions,
    deadline: &Deadline,
) -> Result<CentralityResult> {
    rank(store, handle, AlgorithmKind::ClosenessCentrality, options, deadline)
}

pub fn pagerank<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    options: &AnalyticsOptions,
    deadline: &Deadline,
) -> Result<CentralityResult> {
    rank(store, handle, AlgorithmKind::PageRank, options, deadline)
}
