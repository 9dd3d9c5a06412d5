//! Relational access layer: every engine reads the graph through [`GraphStore`].
//!
//! The contract is batch-first. A whole frontier is fetched in one statement
//! (the ids travel as a single JSON array parameter expanded with `json_each`),
//! never one statement per node.

use std::collections::{HashMap, HashSet};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};
use serde_json::{Map, Number, Value};

use super::filter::Filter;
use super::ident::quote;
use super::stats::{self, TableStats};
use crate::error::{RelgraphError, Result};
use crate::graph::{Direction, Edge, GraphHandle, Node, NodeId};

/// Optional extras for an edge fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeQuery<'a> {
    /// Numeric column read into `Edge::weight` (NULL stays `None`).
    pub weight_column: Option<&'a str>,
    /// Prefilter over edge columns, applied in the store.
    pub filter: Option<&'a Filter>,
}

impl<'a> EdgeQuery<'a> {
    pub fn new(weight_column: Option<&'a str>, filter: Option<&'a Filter>) -> Self {
        Self {
            weight_column,
            filter,
        }
    }
}

/// Read-only access to a relationally stored graph.
pub trait GraphStore {
    /// All edges touching `frontier` in the handle's direction, in one request.
    ///
    /// Edges come back in walk orientation (`from` is the frontier side).
    fn fetch_edges_for_frontier(
        &self,
        handle: &GraphHandle,
        frontier: &[NodeId],
        query: &EdgeQuery<'_>,
    ) -> Result<Vec<Edge>>;

    /// Attribute maps for `ids`, in the order requested. Missing rows are skipped.
    fn fetch_nodes(
        &self,
        handle: &GraphHandle,
        ids: &[NodeId],
        columns: Option<&[String]>,
    ) -> Result<Vec<Node>>;

    /// Check one condition against one row.
    fn evaluate_condition(&self, handle: &GraphHandle, id: NodeId, condition: &Filter)
        -> Result<bool>;

    /// Subset of `ids` whose rows satisfy `condition`, in one request.
    fn matching_ids(
        &self,
        handle: &GraphHandle,
        ids: &[NodeId],
        condition: &Filter,
    ) -> Result<HashSet<NodeId>>;

    fn node_exists(&self, handle: &GraphHandle, id: NodeId) -> Result<bool>;

    /// Catalog-derived facts about the edge relation.
    fn table_stats(&self, handle: &GraphHandle) -> Result<TableStats>;

    fn count_nodes(&self, handle: &GraphHandle) -> Result<usize>;

    fn count_edges(&self, handle: &GraphHandle, filter: Option<&Filter>) -> Result<usize>;

    /// Up to `limit` node ids in ascending order.
    fn node_ids(&self, handle: &GraphHandle, limit: usize) -> Result<Vec<NodeId>>;

    /// Up to `limit` edges in stored orientation.
    fn edge_list(
        &self,
        handle: &GraphHandle,
        query: &EdgeQuery<'_>,
        limit: usize,
    ) -> Result<Vec<Edge>>;
}

/// [`GraphStore`] over a borrowed SQLite connection.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn query_ids(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<NodeId>> {
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| row.get::<_, NodeId>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(ids)
    }

    fn count(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row(sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }
}

/// Encode ids as the single JSON array parameter consumed by `json_each`.
fn id_array(ids: &[NodeId]) -> Result<SqlValue> {
    let json = serde_json::to_string(ids)
        .map_err(|e| RelgraphError::InvalidInput(format!("Failed to encode id batch: {}", e)))?;
    Ok(SqlValue::Text(json))
}

fn weight_expr(weight_column: Option<&str>) -> Result<String> {
    match weight_column {
        Some(col) => Ok(format!("CAST({} AS REAL)", quote(col)?)),
        None => Ok("NULL".to_string()),
    }
}

fn push_filter(sql: &mut String, params: &mut Vec<SqlValue>, filter: Option<&Filter>) -> Result<()> {
    if let Some(f) = filter {
        sql.push_str(" AND (");
        f.write_sql(sql, params)?;
        sql.push(')');
    }
    Ok(())
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(r) => Number::from_f64(r).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(BASE64.encode(b)),
    }
}

fn row_to_node(row: &Row<'_>, names: &[String], id_index: usize) -> rusqlite::Result<Node> {
    let id: NodeId = row.get(id_index)?;
    let mut attributes = Map::new();
    for (i, name) in names.iter().enumerate() {
        attributes.insert(name.clone(), sql_to_json(row.get_ref(i)?));
    }
    Ok(Node { id, attributes })
}

impl GraphStore for SqliteStore<'_> {
    fn fetch_edges_for_frontier(
        &self,
        handle: &GraphHandle,
        frontier: &[NodeId],
        query: &EdgeQuery<'_>,
    ) -> Result<Vec<Edge>> {
        if frontier.is_empty() {
            return Ok(Vec::new());
        }

        let table = quote(&handle.edge_table)?;
        let from = quote(&handle.edge_from)?;
        let to = quote(&handle.edge_to)?;
        let weight = weight_expr(query.weight_column)?;

        let mut params = vec![id_array(frontier)?];
        let match_clause = match handle.direction {
            Direction::Outbound => format!("{} IN (SELECT value FROM json_each(?))", from),
            Direction::Inbound => format!("{} IN (SELECT value FROM json_each(?))", to),
            Direction::Both => {
                params.push(params[0].clone());
                format!(
                    "({} IN (SELECT value FROM json_each(?)) OR {} IN (SELECT value FROM json_each(?)))",
                    from, to
                )
            }
        };

        let mut sql = format!(
            "SELECT {from}, {to}, {weight} FROM {table} \
             WHERE {from} IS NOT NULL AND {to} IS NOT NULL AND {match_clause}",
            from = from,
            to = to,
            weight = weight,
            table = table,
            match_clause = match_clause,
        );
        push_filter(&mut sql, &mut params, query.filter)?;
        sql.push_str(" ORDER BY 1, 2, 3");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok((
                    row.get::<_, NodeId>(0)?,
                    row.get::<_, NodeId>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let mut edges = Vec::with_capacity(rows.len());
        match handle.direction {
            Direction::Outbound => {
                for (src, dst, weight) in rows {
                    edges.push(Edge { from: src, to: dst, weight, reversed: false });
                }
            }
            Direction::Inbound => {
                for (src, dst, weight) in rows {
                    edges.push(Edge { from: dst, to: src, weight, reversed: true });
                }
            }
            Direction::Both => {
                let in_frontier: HashSet<NodeId> = frontier.iter().copied().collect();
                for (src, dst, weight) in rows {
                    if in_frontier.contains(&src) {
                        edges.push(Edge { from: src, to: dst, weight, reversed: false });
                    }
                    if src != dst && in_frontier.contains(&dst) {
                        edges.push(Edge { from: dst, to: src, weight, reversed: true });
                    }
                }
            }
        }

        log::trace!(
            "Fetched {} edges for frontier of {} from {}",
            edges.len(),
            frontier.len(),
            handle.edge_table
        );
        Ok(edges)
    }

    fn fetch_nodes(
        &self,
        handle: &GraphHandle,
        ids: &[NodeId],
        columns: Option<&[String]>,
    ) -> Result<Vec<Node>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let table = quote(&handle.node_table)?;
        let id_col = quote(&handle.id_column)?;
        let select_list = match columns {
            None => "*".to_string(),
            Some(cols) => {
                let mut list = vec![id_col.clone()];
                for c in cols.iter().filter(|c| **c != handle.id_column) {
                    list.push(quote(c)?);
                }
                list.join(", ")
            }
        };

        let sql = format!(
            "SELECT {} FROM {} WHERE {} IN (SELECT value FROM json_each(?1))",
            select_list, table, id_col
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let id_index = names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(&handle.id_column))
            .ok_or_else(|| {
                RelgraphError::InvalidInput(format!(
                    "id column '{}' not found in {}",
                    handle.id_column, handle.node_table
                ))
            })?;

        let rows = stmt
            .query_map([id_array(ids)?], |row| row_to_node(row, &names, id_index))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let mut by_id: HashMap<NodeId, Node> = rows.into_iter().map(|n| (n.id, n)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    fn evaluate_condition(
        &self,
        handle: &GraphHandle,
        id: NodeId,
        condition: &Filter,
    ) -> Result<bool> {
        let mut sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?",
            quote(&handle.node_table)?,
            quote(&handle.id_column)?
        );
        let mut params = vec![SqlValue::Integer(id)];
        push_filter(&mut sql, &mut params, Some(condition))?;
        sql.push(')');
        Ok(self.count(&sql, &params)? > 0)
    }

    fn matching_ids(
        &self,
        handle: &GraphHandle,
        ids: &[NodeId],
        condition: &Filter,
    ) -> Result<HashSet<NodeId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let id_col = quote(&handle.id_column)?;
        let mut sql = format!(
            "SELECT {id} FROM {table} WHERE {id} IN (SELECT value FROM json_each(?))",
            id = id_col,
            table = quote(&handle.node_table)?
        );
        let mut params = vec![id_array(ids)?];
        push_filter(&mut sql, &mut params, Some(condition))?;
        Ok(self.query_ids(&sql, &params)?.into_iter().collect())
    }

    fn node_exists(&self, handle: &GraphHandle, id: NodeId) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?)",
            quote(&handle.node_table)?,
            quote(&handle.id_column)?
        );
        Ok(self.count(&sql, &[SqlValue::Integer(id)])? > 0)
    }

    fn table_stats(&self, handle: &GraphHandle) -> Result<TableStats> {
        stats::collect(self.conn, handle)
    }

    fn count_nodes(&self, handle: &GraphHandle) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote(&handle.node_table)?);
        self.count(&sql, &[])
    }

    fn count_edges(&self, handle: &GraphHandle, filter: Option<&Filter>) -> Result<usize> {
        let mut sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL AND {} IS NOT NULL",
            quote(&handle.edge_table)?,
            quote(&handle.edge_from)?,
            quote(&handle.edge_to)?
        );
        let mut params = Vec::new();
        push_filter(&mut sql, &mut params, filter)?;
        self.count(&sql, &params)
    }

    fn node_ids(&self, handle: &GraphHandle, limit: usize) -> Result<Vec<NodeId>> {
        let id_col = quote(&handle.id_column)?;
        let sql = format!(
            "SELECT {id} FROM {table} WHERE {id} IS NOT NULL ORDER BY {id} LIMIT ?",
            id = id_col,
            table = quote(&handle.node_table)?
        );
        self.query_ids(&sql, &[SqlValue::Integer(limit as i64)])
    }

    fn edge_list(
        &self,
        handle: &GraphHandle,
        query: &EdgeQuery<'_>,
        limit: usize,
    ) -> Result<Vec<Edge>> {
        let from = quote(&handle.edge_from)?;
        let to = quote(&handle.edge_to)?;
        let mut sql = format!(
            "SELECT {from}, {to}, {weight} FROM {table} WHERE {from} IS NOT NULL AND {to} IS NOT NULL",
            from = from,
            to = to,
            weight = weight_expr(query.weight_column)?,
            table = quote(&handle.edge_table)?
        );
        let mut params = Vec::new();
        push_filter(&mut sql, &mut params, query.filter)?;
        sql.push_str(" ORDER BY 1, 2, 3 LIMIT ?");
        params.push(SqlValue::Integer(limit as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let edges = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok(Edge {
                    from: row.get(0)?,
                    to: row.get(1)?,
                    weight: row.get(2)?,
                    reversed: false,
                })
            })?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(edges)
    }
}
