//! reltab: a relational query builder, multi-dialect SQL generator and
//! hierarchical pivot engine.
//!
//! The pipeline has three stages:
//!
//! - build an immutable [QueryRep] operator tree with the chaining
//!   constructors on [QueryRep],
//! - lower it to SQL text for one of the supported [Dialect]s with
//!   [sql::query_to_sql] (schemas for the tree's leaf tables come from a
//!   [TableMap], usually resolved through a [DbConnection]),
//! - or hand it to [aggtree::vpivot] to get a [aggtree::PivotTreeModel],
//!   which renders an expandable pivot tree as a single UNION ALL query
//!   driven by a [PathTree] of open nodes.
//!
//! Query trees and schemas cross process boundaries as JSON via the
//! [json] module.
//!
//! ```no_run
//! use reltab::{Dialect, FilterExpr, QueryRep, TableMap};
//! use reltab::expr::{col, constant};
//!
//! # fn demo(tables: &TableMap) -> reltab::Result<()> {
//! let q = QueryRep::table("employees")
//!     .filter(FilterExpr::and().eq(col("dept"), constant("eng")))
//!     .group_by(["title"], ["salary"]);
//! let sql = reltab::sql::unpaged_query_to_sql(Dialect::DuckDb, tables, &q)?;
//! # let _ = sql;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod aggtree;
pub mod connection;
pub mod dialect;
mod error;
pub mod expr;
pub mod ir;
pub mod json;
pub mod paths;
pub mod schema;
pub mod sql;
pub mod types;

pub use connection::{DbConnection, QueryResult, SchemaCache};
pub use dialect::{Dialect, DialectHandler};
pub use error::{Error, Result};
pub use expr::FilterExpr;
pub use ir::{get_schema, AggColSpec, ColumnMapInfo, ExtendOpts, QueryRep, SortKey, TableMap};
pub use paths::PathTree;
pub use schema::{ColumnMetadata, Schema};
pub use types::{AggFn, ColumnType, Literal};
