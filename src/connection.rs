//! The database boundary.
//!
//! Everything above this module is pure; a [DbConnection] is the one seam
//! through which SQL actually runs. Implementations wrap whatever driver
//! the host application uses.

use std::collections::HashMap;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::ir::{self, QueryRep, TableMap};
use crate::schema::Schema;
use crate::types::Literal;

/// A materialized result set.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Literal>>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value at `(row, column id)`, if both exist.
    pub fn value(&self, row: usize, col: &str) -> Option<&Literal> {
        let idx = self.columns.iter().position(|c| c == col)?;
        self.rows.get(row)?.get(idx)
    }
}

/// Driver-agnostic database handle.
pub trait DbConnection {
    fn dialect(&self) -> Dialect;

    fn run_sql_query(&mut self, sql: &str) -> Result<QueryResult>;

    fn get_table_schema(&mut self, table_name: &str) -> Result<Schema>;

    /// Schema of an arbitrary SQL query's result. Implementations usually
    /// run a zero-row probe (`SELECT * FROM (query) WHERE 1=0`).
    fn get_sql_query_schema(&mut self, sql: &str) -> Result<Schema>;
}

/// Caller-owned cache of leaf schemas.
///
/// Nothing invalidates entries; drop the cache when the underlying tables
/// change shape.
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: HashMap<String, Schema>,
}

impl SchemaCache {
    pub fn new() -> SchemaCache {
        SchemaCache::default()
    }

    pub fn get_or_resolve(
        &mut self,
        key: &str,
        resolve: impl FnOnce() -> Result<Schema>,
    ) -> Result<&Schema> {
        if !self.entries.contains_key(key) {
            let schema = resolve()?;
            self.entries.insert(key.to_string(), schema);
        }
        Ok(&self.entries[key])
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Resolve every leaf dependency of `q` through `conn` (consulting `cache`
/// first) into a [TableMap].
pub fn resolve_leaf_schemas(
    conn: &mut dyn DbConnection,
    cache: &mut SchemaCache,
    q: &QueryRep,
) -> Result<TableMap> {
    let mut tables = TableMap::new();
    for dep in ir::leaf_deps(q) {
        let schema = cache.get_or_resolve(&dep.dedup_key(), || match &dep {
            ir::LeafDep::Table(name) => conn.get_table_schema(name),
            ir::LeafDep::Sql(text) => conn.get_sql_query_schema(text),
        })?;
        tables.insert(dep.table_key().to_string(), schema.clone());
    }
    Ok(tables)
}

/// Schema of `q` against live leaf schemas.
pub fn get_schema_for_query(
    conn: &mut dyn DbConnection,
    cache: &mut SchemaCache,
    q: &QueryRep,
) -> Result<Schema> {
    let dialect = conn.dialect();
    let tables = resolve_leaf_schemas(conn, cache, q)?;
    ir::get_schema(dialect, &tables, q)
}
