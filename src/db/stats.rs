//! Edge-table statistics from the catalog, without scanning when avoidable.
//!
//! The row count comes from `sqlite_stat1` once `ANALYZE` has run. Distinct
//! endpoint counts feed the reachable bound, so they are always counted
//! exactly; stat1 only keeps per-key averages. Structural facts (junction
//! shape, foreign keys, self-loop checks) come from pragmas and DDL.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::ident::{quote, split_schema};
use crate::error::{RelgraphError, Result};
use crate::graph::{Direction, GraphHandle};

/// Facts about an edge relation. Collected fresh per call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    pub edge_table: String,
    pub row_count: usize,
    pub distinct_sources: usize,
    pub distinct_targets: usize,
    /// Only the two endpoint columns, keyed on both.
    pub is_junction: bool,
    /// Both endpoints reference the same relation.
    pub is_self_referential: bool,
    /// A CHECK constraint rejects `from = to` rows.
    pub forbids_self_loops: bool,
    pub density: f64,
    /// `row_count` came from `sqlite_stat1` rather than an aggregate query.
    pub from_statistics: bool,
}

impl TableStats {
    /// Absolute upper bound on nodes reachable from one start node.
    pub fn reachable_bound(&self, direction: Direction) -> usize {
        match direction {
            Direction::Outbound => self.distinct_targets + 1,
            Direction::Inbound => self.distinct_sources + 1,
            Direction::Both => self.distinct_sources + self.distinct_targets,
        }
    }

    /// A junction between two different relations, where walking is the wrong tool.
    pub fn is_bipartite_junction(&self) -> bool {
        self.is_junction && !self.is_self_referential
    }
}

fn check_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)CHECK\s*\(\s*["`\[]?(\w+)["`\]]?\s*(?:<>|!=)\s*["`\[]?(\w+)["`\]]?\s*\)"#)
            .expect("Invalid CHECK regex")
    })
}

/// True when `ddl` carries a CHECK that compares the two endpoint columns for inequality.
pub fn ddl_forbids_self_loops(ddl: &str, from: &str, to: &str) -> bool {
    check_regex().captures_iter(ddl).any(|cap| {
        let a = &cap[1];
        let b = &cap[2];
        (a.eq_ignore_ascii_case(from) && b.eq_ignore_ascii_case(to))
            || (a.eq_ignore_ascii_case(to) && b.eq_ignore_ascii_case(from))
    })
}

struct Column {
    name: String,
    pk: i64,
}

fn pragma_sql(function: &str, schema: Option<&str>) -> String {
    match schema {
        Some(_) => format!("SELECT * FROM {}(?1, ?2)", function),
        None => format!("SELECT * FROM {}(?1)", function),
    }
}

fn table_columns(conn: &Connection, schema: Option<&str>, table: &str) -> Result<Vec<Column>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name, pk FROM ({})",
        pragma_sql("pragma_table_info", schema)
    ))?;
    let map = |row: &rusqlite::Row<'_>| {
        Ok(Column {
            name: row.get(0)?,
            pk: row.get(1)?,
        })
    };
    let cols = match schema {
        Some(s) => stmt.query_map(params![table, s], map)?,
        None => stmt.query_map(params![table], map)?,
    }
    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(cols)
}

/// Names of unique indexes on `table` with their column lists.
fn unique_indexes(
    conn: &Connection,
    schema: Option<&str>,
    table: &str,
) -> Result<Vec<(String, Vec<String>)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name FROM ({}) WHERE \"unique\" = 1",
        pragma_sql("pragma_index_list", schema)
    ))?;
    let map = |row: &rusqlite::Row<'_>| row.get::<_, String>(0);
    let names = match schema {
        Some(s) => stmt.query_map(params![table, s], map)?,
        None => stmt.query_map(params![table], map)?,
    }
    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let cols = index_columns(conn, schema, &name)?;
        out.push((name, cols));
    }
    Ok(out)
}

fn index_columns(conn: &Connection, schema: Option<&str>, index: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT name FROM ({}) ORDER BY seqno",
        pragma_sql("pragma_index_info", schema)
    ))?;
    let map = |row: &rusqlite::Row<'_>| row.get::<_, Option<String>>(0);
    let cols = match schema {
        Some(s) => stmt.query_map(params![index, s], map)?,
        None => stmt.query_map(params![index], map)?,
    }
    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(cols.into_iter().flatten().collect())
}

/// Column -> referenced table for declared foreign keys.
fn foreign_keys(
    conn: &Connection,
    schema: Option<&str>,
    table: &str,
) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT \"from\", \"table\" FROM ({})",
        pragma_sql("pragma_foreign_key_list", schema)
    ))?;
    let map = |row: &rusqlite::Row<'_>| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?));
    let fks = match schema {
        Some(s) => stmt.query_map(params![table, s], map)?,
        None => stmt.query_map(params![table], map)?,
    }
    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(fks
        .into_iter()
        .map(|(col, target)| (col.to_ascii_lowercase(), target))
        .collect())
}

fn table_ddl(conn: &Connection, schema: Option<&str>, table: &str) -> Result<Option<String>> {
    let master = match schema {
        Some(s) => format!("{}.sqlite_master", quote(s)?),
        None => "sqlite_master".to_string(),
    };
    let ddl = conn
        .query_row(
            &format!("SELECT sql FROM {} WHERE type = 'table' AND name = ?1", master),
            params![table],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(ddl.flatten())
}

/// Table row count recorded by the last `ANALYZE`, if any.
fn stat1_rows(conn: &Connection, schema: Option<&str>, table: &str) -> Result<Option<usize>> {
    let master = match schema {
        Some(s) => format!("{}.sqlite_master", quote(s)?),
        None => "sqlite_master".to_string(),
    };
    let has_stat1: bool = conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE type = 'table' AND name = 'sqlite_stat1')",
            master
        ),
        [],
        |row| row.get(0),
    )?;
    if !has_stat1 {
        return Ok(None);
    }

    let stat_table = match schema {
        Some(s) => format!("{}.sqlite_stat1", quote(s)?),
        None => "sqlite_stat1".to_string(),
    };
    let mut stmt = conn.prepare(&format!("SELECT stat FROM {} WHERE tbl = ?1", stat_table))?;
    let stats = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    // the leading figure of every entry is the row count of the table or index
    Ok(stats
        .iter()
        .filter_map(|stat| stat.split_whitespace().next()?.parse::<usize>().ok())
        .max())
}

/// Collect [`TableStats`] for the handle's edge relation.
pub fn collect(conn: &Connection, handle: &GraphHandle) -> Result<TableStats> {
    let (schema, table) = split_schema(&handle.edge_table);
    let from = handle.edge_from.as_str();
    let to = handle.edge_to.as_str();

    let columns = table_columns(conn, schema, table)?;
    if columns.is_empty() {
        return Err(RelgraphError::InvalidInput(format!(
            "edge table '{}' not found",
            handle.edge_table
        )));
    }
    for endpoint in [from, to] {
        if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(endpoint)) {
            return Err(RelgraphError::InvalidInput(format!(
                "column '{}' not found in {}",
                endpoint, handle.edge_table
            )));
        }
    }

    let is_endpoint = |name: &str| name.eq_ignore_ascii_case(from) || name.eq_ignore_ascii_case(to);
    let keyed_on_endpoints = |cols: &[String]| cols.len() == 2 && cols.iter().all(|c| is_endpoint(c));

    let pk_cols: Vec<String> = columns
        .iter()
        .filter(|c| c.pk > 0)
        .map(|c| c.name.clone())
        .collect();
    let only_endpoints = columns.iter().all(|c| is_endpoint(&c.name));
    let is_junction = only_endpoints
        && (keyed_on_endpoints(&pk_cols)
            || unique_indexes(conn, schema, table)?
                .iter()
                .any(|(_, cols)| keyed_on_endpoints(cols)));

    let fks = foreign_keys(conn, schema, table)?;
    let is_self_referential = match (
        fks.get(&from.to_ascii_lowercase()),
        fks.get(&to.to_ascii_lowercase()),
    ) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        // without declared keys the handle's single node relation is authoritative
        _ => true,
    };

    let forbids_self_loops = table_ddl(conn, schema, table)?
        .map(|ddl| ddl_forbids_self_loops(&ddl, from, to))
        .unwrap_or(false);

    let sql = format!(
        "SELECT COUNT(*), COUNT(DISTINCT {f}), COUNT(DISTINCT {t}) FROM {table} \
         WHERE {f} IS NOT NULL AND {t} IS NOT NULL",
        f = quote(from)?,
        t = quote(to)?,
        table = quote(&handle.edge_table)?
    );
    let (rows, ds, dt): (i64, i64, i64) =
        conn.query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
    let (distinct_sources, distinct_targets) = (ds as usize, dt as usize);
    let (row_count, from_statistics) = match stat1_rows(conn, schema, table)? {
        Some(analyzed) => (analyzed, true),
        None => (rows as usize, false),
    };

    let n = distinct_sources.max(distinct_targets);
    let density = if n > 1 {
        (row_count as f64 / (n as f64 * (n - 1) as f64)).min(1.0)
    } else {
        0.0
    };

    let stats = TableStats {
        edge_table: handle.edge_table.clone(),
        row_count,
        distinct_sources,
        distinct_targets,
        is_junction,
        is_self_referential,
        forbids_self_loops,
        density,
        from_statistics,
    };
    log::debug!("Table stats for {}: {:?}", handle.edge_table, stats);
    Ok(stats)
}
