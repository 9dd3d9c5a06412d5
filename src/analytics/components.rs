//! Weakly connected components via union-find.

use std::collections::HashMap;

use serde::Serialize;

use super::{load, AnalyticsOptions, GraphStats, LoadedGraph};
use crate::db::store::GraphStore;
use crate::db::Deadline;
use crate::error::Result;
use crate::guard::{AlgorithmKind, GuardResult};
use crate::graph::{GraphHandle, Node, NodeId, Warning};

struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

/// Components as dense-index lists, largest first, then by smallest member.
pub(crate) fn weak_components(graph: &LoadedGraph) -> Vec<Vec<usize>> {
    let n = graph.len();
    let mut uf = UnionFind::new(n);
    for (a, targets) in graph.succ.iter().enumerate() {
        for &b in targets {
            uf.union(a, b);
        }
    }

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..n {
        let root = uf.find(i);
        groups.entry(root).or_default().push(i);
    }
    // members were pushed in index order, so each group is already sorted
    let mut components: Vec<Vec<usize>> = groups.into_values().collect();
    components.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
    components
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Component {
    pub size: usize,
    /// Member ids, ascending.
    pub members: Vec<NodeId>,
    /// Attribute maps of the first few members.
    pub sample: Vec<Node>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentsResult {
    /// Components of at least `min_size` members.
    pub component_count: usize,
    pub largest_component_size: usize,
    pub components: Vec<Component>,
    /// Nodes with no edges at all, regardless of `min_size`.
    pub isolated_nodes: Vec<NodeId>,
    pub stats: GraphStats,
    pub guard: Option<GuardResult>,
    pub warnings: Vec<Warning>,
}

/// Group nodes into components ignoring edge direction.
pub fn connected_components<S: GraphStore>(
    store: &S,
    handle: &GraphHandle,
    min_size: usize,
    options: &AnalyticsOptions,
    deadline: &Deadline,
) -> Result<ComponentsResult> {
    let loaded = load(
        store,
        handle,
        AlgorithmKind::ConnectedComponents,
        options,
        deadline,
    )?;
    let graph = &loaded.graph;
    deadline.check()?;

    let all = weak_components(graph);
    let isolated_nodes: Vec<NodeId> = (0..graph.len())
        .filter(|i| graph.degree(*i) == 0)
        .map(|i| graph.ids[i])
        .collect();

    let mut components = Vec::new();
    for members in all.iter().filter(|c| c.len() >= min_size) {
        let ids: Vec<NodeId> = members.iter().map(|i| graph.ids[*i]).collect();
        let sample_ids: Vec<NodeId> = ids.iter().take(options.sample_size).copied().collect();
        let sample = store.fetch_nodes(handle, &sample_ids, options.node_columns.as_deref())?;
        components.push(Component {
            size: ids.len(),
            members: ids,
            sample,
        });
    }

    log::debug!(
        "{} components ({} with at least {} members), {} isolated",
        all.len(),
        components.len(),
        min_size,
        isolated_nodes.len()
    );
    Ok(ComponentsResult {
        component_count: components.len(),
        largest_component_size: all.first().map(|c| c.len()).unwrap_or(0),
        components,
        isolated_nodes,
        stats: graph.stats(),
        guard: loaded.guard,
        warnings: loaded.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::SqliteStore;
    use crate::testutil::{self, handle};

    #[test]
    fn test_two_cliques() {
        let conn = testutil::clique_graph(2, 5);
        let store = SqliteStore::new(&conn);
        let result = connected_components(
            &store,
            &handle(),
            1,
            &AnalyticsOptions::default(),
            &Deadline::none(),
        )
        .unwrap();
        assert_eq!(result.component_count, 2);
        assert_eq!(result.largest_component_size, 5);
        assert!(result.isolated_nodes.is_empty());
        assert_eq!(result.components[0].members, vec![1, 2, 3, 4, 5]);
        assert_eq!(result.components[1].members, vec![6, 7, 8, 9, 10]);
        assert_eq!(result.components[0].sample.len(), 3);
        assert!(!result.stats.weakly_connected);
    }

    #[test]
    fn test_isolated_and_min_size() {
        let conn = testutil::open_memory();
        testutil::insert_nodes(&conn, 1..=6);
        testutil::insert_edges(&conn, &[(1, 2), (2, 3), (4, 5), (6, 6)]);
        let store = SqliteStore::new(&conn);
        let result = connected_components(
            &store,
            &handle(),
            2,
            &AnalyticsOptions::default(),
            &Deadline::none(),
        )
        .unwrap();
        assert_eq!(result.component_count, 2);
        assert_eq!(result.largest_component_size, 3);
        assert_eq!(result.isolated_nodes, vec![6]);
        assert_eq!(result.components[1].members, vec![4, 5]);
    }

    #[test]
    fn test_union_find() {
        let mut uf = UnionFind::new(4);
        uf.union(0, 1);
        uf.union(2, 3);
        uf.union(1, 3);
        let root = uf.find(0);
        assert!((0..4).all(|i| uf.find(i) == root));
    }
}
