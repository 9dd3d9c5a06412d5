//! Fixture graphs and store wrappers shared by unit tests.

use std::cell::Cell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use crate::db::filter::Filter;
use crate::db::stats::TableStats;
use crate::db::store::{EdgeQuery, GraphStore};
use crate::error::Result;
use crate::graph::{Edge, GraphHandle, Node, NodeId};

const SCHEMA: &str = "
    CREATE TABLE nodes (id INTEGER PRIMARY KEY, name TEXT, kind TEXT DEFAULT 'part', cost REAL);
    CREATE TABLE edges (src INTEGER, dst INTEGER, weight REAL, quantity REAL);
";

pub fn handle() -> GraphHandle {
    GraphHandle::new("nodes", "edges", "src", "dst")
}

pub fn open_memory() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn
}

pub fn insert_nodes(conn: &Connection, ids: impl IntoIterator<Item = NodeId>) {
    let mut stmt = conn
        .prepare("INSERT INTO nodes (id, name) VALUES (?1, ?2)")
        .unwrap();
    for id in ids {
        stmt.execute(params![id, format!("n{}", id)]).unwrap();
    }
}

pub fn insert_edges(conn: &Connection, edges: &[(NodeId, NodeId)]) {
    let mut stmt = conn
        .prepare("INSERT INTO edges (src, dst) VALUES (?1, ?2)")
        .unwrap();
    for (a, b) in edges {
        stmt.execute(params![a, b]).unwrap();
    }
}

pub fn insert_weighted_edges(conn: &Connection, edges: &[(NodeId, NodeId, f64)]) {
    let mut stmt = conn
        .prepare("INSERT INTO edges (src, dst, weight) VALUES (?1, ?2, ?3)")
        .unwrap();
    for (a, b, w) in edges {
        stmt.execute(params![a, b, w]).unwrap();
    }
}

pub fn insert_quantity_edges(conn: &Connection, edges: &[(NodeId, NodeId, Option<f64>)]) {
    let mut stmt = conn
        .prepare("INSERT INTO edges (src, dst, quantity) VALUES (?1, ?2, ?3)")
        .unwrap();
    for (a, b, q) in edges {
        stmt.execute(params![a, b, q]).unwrap();
    }
}

/// Complete `branching`-ary tree of `depth` levels, numbered breadth-first from 1.
pub fn tree_graph(branching: i64, depth: u32) -> Connection {
    let conn = open_memory();
    let total: i64 = (0..=depth).map(|d| branching.pow(d)).sum();
    insert_nodes(&conn, 1..=total);
    let mut edges = Vec::new();
    for parent in 1..=total {
        for k in 0..branching {
            let child = branching * (parent - 1) + 2 + k;
            if child <= total {
                edges.push((parent, child));
            }
        }
    }
    insert_edges(&conn, &edges);
    conn
}

/// `count` disjoint cliques of `size` nodes, edges in both directions.
pub fn clique_graph(count: i64, size: i64) -> Connection {
    let conn = open_memory();
    insert_nodes(&conn, 1..=count * size);
    let mut edges = Vec::new();
    for c in 0..count {
        let base = c * size + 1;
        for a in base..base + size {
            for b in base..base + size {
                if a != b {
                    edges.push((a, b));
                }
            }
        }
    }
    insert_edges(&conn, &edges);
    conn
}

/// Shared-subassembly bill of materials:
///
/// ```text
/// 1 bike  -2-> 2 wheel -1-> 4 hub -8-> 5 bolt
///         -1-> 3 frame -1-> 4 hub
///                      -4-> 5 bolt
/// ```
pub fn bom_graph() -> Connection {
    let conn = open_memory();
    insert_nodes(&conn, 1..=5);
    conn.execute_batch(
        "UPDATE nodes SET name = 'bike', kind = 'assembly' WHERE id = 1;
         UPDATE nodes SET name = 'wheel', kind = 'assembly' WHERE id = 2;
         UPDATE nodes SET name = 'frame', kind = 'assembly' WHERE id = 3;
         UPDATE nodes SET name = 'hub', kind = 'assembly' WHERE id = 4;
         UPDATE nodes SET name = 'bolt', kind = 'raw' WHERE id = 5;",
    )
    .unwrap();
    insert_quantity_edges(
        &conn,
        &[
            (1, 2, Some(2.0)),
            (1, 3, None),
            (2, 4, Some(1.0)),
            (3, 4, Some(1.0)),
            (3, 5, Some(4.0)),
            (4, 5, Some(8.0)),
        ],
    );
    conn
}

/// Copy an in-memory fixture to a file database under `dir`.
pub fn persist(conn: &Connection, dir: &Path) -> PathBuf {
    let path = dir.join("graph.db");
    conn.execute("VACUUM INTO ?1", params![path.to_str().unwrap()])
        .unwrap();
    path
}

/// Delegating store that counts round-trips.
pub struct CountingStore<S> {
    pub inner: S,
    pub edge_fetches: Cell<usize>,
    pub node_fetches: Cell<usize>,
}

impl<S: GraphStore> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            edge_fetches: Cell::new(0),
            node_fetches: Cell::new(0),
        }
    }
}

impl<S: GraphStore> GraphStore for CountingStore<S> {
    fn fetch_edges_for_frontier(
        &self,
        handle: &GraphHandle,
        frontier: &[NodeId],
        query: &EdgeQuery<'_>,
    ) -> Result<Vec<Edge>> {
        self.edge_fetches.set(self.edge_fetches.get() + 1);
        self.inner.fetch_edges_for_frontier(handle, frontier, query)
    }

    fn fetch_nodes(
        &self,
        handle: &GraphHandle,
        ids: &[NodeId],
        columns: Option<&[String]>,
    ) -> Result<Vec<Node>> {
        self.node_fetches.set(self.node_fetches.get() + 1);
        self.inner.fetch_nodes(handle, ids, columns)
    }

    fn evaluate_condition(
        &self,
        handle: &GraphHandle,
        id: NodeId,
        condition: &Filter,
    ) -> Result<bool> {
        self.inner.evaluate_condition(handle, id, condition)
    }

    fn matching_ids(
        &self,
        handle: &GraphHandle,
        ids: &[NodeId],
        condition: &Filter,
    ) -> Result<HashSet<NodeId>> {
        self.inner.matching_ids(handle, ids, condition)
    }

    fn node_exists(&self, handle: &GraphHandle, id: NodeId) -> Result<bool> {
        self.inner.node_exists(handle, id)
    }

    fn table_stats(&self, handle: &GraphHandle) -> Result<TableStats> {
        self.inner.table_stats(handle)
    }

    fn count_nodes(&self, handle: &GraphHandle) -> Result<usize> {
        self.inner.count_nodes(handle)
    }

    fn count_edges(&self, handle: &GraphHandle, filter: Option<&Filter>) -> Result<usize> {
        self.inner.count_edges(handle, filter)
    }

    fn node_ids(&self, handle: &GraphHandle, limit: usize) -> Result<Vec<NodeId>> {
        self.inner.node_ids(handle, limit)
    }

    fn edge_list(
        &self,
        handle: &GraphHandle,
        query: &EdgeQuery<'_>,
        limit: usize,
    ) -> Result<Vec<Edge>> {
        self.inner.edge_list(handle, query, limit)
    }
}
