//! SQL identifier validation and quoting.
//!
//! Table and column names arrive from an upstream schema mapper and cannot be
//! bound as parameters, so they are checked against a strict pattern and
//! double-quoted before being spliced into statements.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{RelgraphError, Result};

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // optional schema prefix: main.edges
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .expect("Invalid identifier regex")
    })
}

/// Check that `name` is a plain (optionally schema-qualified) identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.len() > 128 || !identifier_regex().is_match(name) {
        return Err(RelgraphError::InvalidInput(format!(
            "'{}' is not a valid table or column name",
            name
        )));
    }
    Ok(())
}

/// Validate and double-quote an identifier, quoting each schema part.
pub fn quote(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(name
        .split('.')
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join("."))
}

/// Split an optional schema prefix off a table name.
pub fn split_schema(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, table)) => (Some(schema), table),
        None => (None, name),
    }
}
