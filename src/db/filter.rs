//! Typed filter expressions for stop conditions, targets and edge prefilters.
//!
//! Callers build a small AST instead of handing over SQL text. Values are
//! always bound as parameters; column names go through [`ident::quote`].

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};

use super::ident;
use crate::error::Result;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CmpOp {
    fn as_sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Like => "LIKE",
        }
    }
}

/// Literal operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FilterValue {
    fn to_sql_value(&self) -> SqlValue {
        match self {
            FilterValue::Null => SqlValue::Null,
            FilterValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
            FilterValue::Integer(i) => SqlValue::Integer(*i),
            FilterValue::Real(r) => SqlValue::Real(*r),
            FilterValue::Text(s) => SqlValue::Text(s.clone()),
        }
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Integer(v)
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::Integer(i64::from(v))
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Real(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Bool(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Text(v.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Text(v)
    }
}

/// Boolean expression over the columns of one relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    Compare {
        column: String,
        op: CmpOp,
        value: FilterValue,
    },
    IsNull {
        column: String,
    },
    In {
        column: String,
        values: Vec<FilterValue>,
    },
    And {
        filters: Vec<Filter>,
    },
    Or {
        filters: Vec<Filter>,
    },
    Not {
        filter: Box<Filter>,
    },
}

impl Filter {
    pub fn compare(column: impl Into<String>, op: CmpOp, value: impl Into<FilterValue>) -> Self {
        Filter::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(column, CmpOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(column, CmpOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(column, CmpOp::Lt, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::compare(column, CmpOp::Gt, value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::IsNull {
            column: column.into(),
        }
    }

    pub fn in_list<V: Into<FilterValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And { mut filters } => {
                filters.push(other);
                Filter::And { filters }
            }
            first => Filter::And {
                filters: vec![first, other],
            },
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Filter::Or { mut filters } => {
                filters.push(other);
                Filter::Or { filters }
            }
            first => Filter::Or {
                filters: vec![first, other],
            },
        }
    }

    pub fn negate(self) -> Self {
        Filter::Not {
            filter: Box::new(self),
        }
    }

    /// Append this expression to `sql`, pushing operands onto `params`.
    ///
    /// Placeholders are anonymous `?`, so `params` must be bound in order.
    pub fn write_sql(&self, sql: &mut String, params: &mut Vec<SqlValue>) -> Result<()> {
        match self {
            Filter::Compare { column, op, value } => {
                sql.push_str(&ident::quote(column)?);
                sql.push(' ');
                sql.push_str(op.as_sql());
                sql.push_str(" ?");
                params.push(value.to_sql_value());
            }
            Filter::IsNull { column } => {
                sql.push_str(&ident::quote(column)?);
                sql.push_str(" IS NULL");
            }
            Filter::In { column, values } => {
                if values.is_empty() {
                    sql.push('0');
                    return Ok(());
                }
                sql.push_str(&ident::quote(column)?);
                sql.push_str(" IN (");
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push('?');
                    params.push(v.to_sql_value());
                }
                sql.push(')');
            }
            Filter::And { filters } => write_joined(filters, " AND ", "1", sql, params)?,
            Filter::Or { filters } => write_joined(filters, " OR ", "0", sql, params)?,
            Filter::Not { filter } => {
                sql.push_str("NOT (");
                filter.write_sql(sql, params)?;
                sql.push(')');
            }
        }
        Ok(())
    }

    /// Render to a standalone fragment plus its parameters.
    pub fn to_sql(&self) -> Result<(String, Vec<SqlValue>)> {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.write_sql(&mut sql, &mut params)?;
        Ok((sql, params))
    }
}

fn write_joined(
    filters: &[Filter],
    sep: &str,
    empty: &str,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) -> Result<()> {
    if filters.is_empty() {
        sql.push_str(empty);
        return Ok(());
    }
    for (i, f) in filters.iter().enumerate() {
        if i > 0 {
            sql.push_str(sep);
        }
        sql.push('(');
        f.write_sql(sql, params)?;
        sql.push(')');
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_binds_value() {
        let (sql, params) = Filter::eq("status", "active").to_sql().unwrap();
        assert_eq!(sql, "\"status\" = ?");
        assert_eq!(params, vec![SqlValue::Text("active".to_string())]);
    }

    #[test]
    fn test_nested_expression() {
        let filter = Filter::gt("cost", 10.5)
            .and(Filter::is_null("retired_at"))
            .and(Filter::eq("kind", "assembly").or(Filter::in_list("kind", ["kit", "part"])));
        let (sql, params) = filter.to_sql().unwrap();
        assert_eq!(
            sql,
            "(\"cost\" > ?) AND (\"retired_at\" IS NULL) AND ((\"kind\" = ?) OR (\"kind\" IN (?, ?)))"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_empty_combinators() {
        assert_eq!(Filter::And { filters: vec![] }.to_sql().unwrap().0, "1");
        assert_eq!(Filter::Or { filters: vec![] }.to_sql().unwrap().0, "0");
        let empty_in = Filter::in_list::<i64>("id", Vec::new());
        assert_eq!(empty_in.to_sql().unwrap().0, "0");
    }

    #[test]
    fn test_negate_and_bool() {
        let (sql, params) = Filter::eq("active", true).negate().to_sql().unwrap();
        assert_eq!(sql, "NOT (\"active\" = ?)");
        assert_eq!(params, vec![SqlValue::Integer(1)]);
    }

    #[test]
    fn test_rejects_bad_column() {
        assert!(Filter::eq("x = 1 OR 1", 1).to_sql().is_err());
    }

    #[test]
    fn test_deserialize_from_json() {
        let filter: Filter = serde_json::from_str(
            r#"{"kind":"and","filters":[
                {"kind":"compare","column":"level","op":"ge","value":3},
                {"kind":"compare","column":"name","op":"like","value":"A%"}
            ]}"#,
        )
        .unwrap();
        let (sql, params) = filter.to_sql().unwrap();
        assert_eq!(sql, "(\"level\" >= ?) AND (\"name\" LIKE ?)");
        assert_eq!(params[0], SqlValue::Integer(3));
    }
}
