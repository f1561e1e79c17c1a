//! Hierarchical pivot aggregation.
//!
//! A [PivotTreeModel] turns a base query plus an ordered list of pivot
//! columns into a family of queries: one UNION arm per expanded tree node,
//! each arm aggregating the base rows under that node. The client keeps a
//! [PathTree] of expanded nodes and re-renders the tree query whenever it
//! changes.
//!
//! Synthetic columns added to every output row:
//!   `_depth`   0 for the root, path length + 1 otherwise
//!   `_pivot`   display value of the node (group value, or the leaf column)
//!   `_isRoot`  1 only on the root row
//!   `_path{i}` stringified path component per pivot level, NULL below the
//!              row's depth so that an ascending nulls-first sort places a
//!              parent directly above its children

use std::collections::HashMap;

use crate::connection::{resolve_leaf_schemas, DbConnection, SchemaCache};
use crate::dialect::{Dialect, DialectHandler};
use crate::error::{Error, Result};
use crate::expr::{col, constant, FilterExpr, ValueExpr};
use crate::ir::{AggColSpec, ColumnMapInfo, ExtendOpts, QueryRep, SortKey, TableMap};
use crate::paths::PathTree;
use crate::schema::Schema;
use crate::sql;
use crate::types::Literal;

pub const DEPTH_COL: &str = "_depth";
pub const PIVOT_COL: &str = "_pivot";
pub const IS_ROOT_COL: &str = "_isRoot";
/// Count-of-rows column appended to the base query before pivoting.
pub const RECORD_COUNT_COL: &str = "Rec";

pub fn path_col(level: usize) -> String {
    format!("_path{level}")
}

fn sort_marker_col(level: usize) -> String {
    format!("_sortVal_{level}")
}

fn sort_val_col(level: usize, key: usize) -> String {
    format!("_sortVal_{level}_{key}")
}

#[derive(Debug, Clone, Default)]
pub struct PivotOptions {
    /// Column shown as `_pivot` on leaf-level detail rows.
    pub pivot_leaf_column: Option<String>,
    pub show_root: bool,
    /// Aggregate sort: orders every subtree by these columns' aggregated
    /// values instead of by path.
    pub sort_key: Vec<SortKey>,
}

impl PivotOptions {
    pub fn with_root() -> PivotOptions {
        PivotOptions {
            show_root: true,
            ..PivotOptions::default()
        }
    }
}

/// A configured pivot tree over one base query.
#[derive(Debug, Clone)]
pub struct PivotTreeModel {
    dialect: Dialect,
    tables: TableMap,
    base_query: QueryRep,
    base_schema: Schema,
    pivots: Vec<String>,
    options: PivotOptions,
}

/// Build a pivot tree model against a live connection.
///
/// The base query gets a constant [RECORD_COUNT_COL] appended (so that
/// every group reports its row count), is rendered once, and its result
/// schema is probed through the connection.
pub fn vpivot(
    conn: &mut dyn DbConnection,
    cache: &mut SchemaCache,
    query: QueryRep,
    pivots: Vec<String>,
    options: PivotOptions,
) -> Result<PivotTreeModel> {
    let dialect = conn.dialect();
    let core = dialect.handler().core_types();
    let base_query = query.extend(
        RECORD_COUNT_COL,
        constant(1i64),
        ExtendOpts::typed(core.integer.clone()),
    );
    let tables = resolve_leaf_schemas(conn, cache, &base_query)?;
    let base_sql = sql::unpaged_query_to_sql(dialect, &tables, &base_query)?;
    let base_schema = conn.get_sql_query_schema(&base_sql)?;
    PivotTreeModel::new(dialect, tables, base_query, base_schema, pivots, options)
}

impl PivotTreeModel {
    /// Pure constructor; [vpivot] is the connection-backed entry point.
    pub fn new(
        dialect: Dialect,
        tables: TableMap,
        base_query: QueryRep,
        base_schema: Schema,
        pivots: Vec<String>,
        options: PivotOptions,
    ) -> Result<PivotTreeModel> {
        let referenced = pivots
            .iter()
            .chain(options.pivot_leaf_column.iter())
            .chain(options.sort_key.iter().map(|k| &k.col));
        for c in referenced {
            if !base_schema.contains(c) {
                let base_sql =
                    sql::unpaged_query_to_sql(dialect, &tables, &base_query).unwrap_or_default();
                return Err(Error::UnknownColumn {
                    column: c.clone(),
                    sql: base_sql,
                });
            }
        }
        Ok(PivotTreeModel {
            dialect,
            tables,
            base_query,
            base_schema,
            pivots,
            options,
        })
    }

    pub fn base_schema(&self) -> &Schema {
        &self.base_schema
    }

    pub fn pivots(&self) -> &[String] {
        &self.pivots
    }

    /// Output columns of every tree query arm, before the path columns.
    pub fn out_cols(&self) -> Vec<String> {
        self.base_schema
            .columns()
            .iter()
            .cloned()
            .chain([
                DEPTH_COL.to_string(),
                PIVOT_COL.to_string(),
                IS_ROOT_COL.to_string(),
            ])
            .collect()
    }

    /// Stringified reference to a base column; non-string pivot values are
    /// cast so they compare and union cleanly with path constants.
    fn pivot_expr(&self, column: &str) -> ValueExpr {
        let is_string = self
            .base_schema
            .column_type(column)
            .map(|t| t.is_string)
            .unwrap_or(false);
        if is_string {
            col(column)
        } else {
            col(column).as_string()
        }
    }

    /// One tree arm: the children of the node at `path`.
    ///
    /// Below the last pivot level this is an aggregation over the next
    /// pivot column; at the last level it is the raw detail rows.
    pub fn apply_path(&self, path: &[String]) -> Result<QueryRep> {
        let npivots = self.pivots.len();
        if path.len() > npivots {
            return Err(Error::PathTooDeep {
                depth: path.len(),
                pivot_count: npivots,
            });
        }
        let core = self.dialect.handler().core_types();
        let nlevels = path.len();

        let mut q = self.base_query.clone();
        if !path.is_empty() {
            let mut fexp = FilterExpr::and();
            for (pivot, value) in self.pivots.iter().zip(path) {
                fexp = fexp.eq(self.pivot_expr(pivot), constant(value.as_str()));
            }
            q = q.filter(fexp);
        }

        if nlevels < npivots {
            let pivot_col = self.pivots[nlevels].clone();
            let aggs: Vec<AggColSpec> = self
                .base_schema
                .columns()
                .iter()
                .filter(|c| **c != pivot_col)
                .map(|c| AggColSpec::Col(c.clone()))
                .collect();
            q = q.group_by([pivot_col.clone()], aggs);
            q = q.extend(
                PIVOT_COL,
                self.pivot_expr(&pivot_col),
                ExtendOpts::typed(core.string.clone()),
            );
        } else {
            let leaf_expr = match &self.options.pivot_leaf_column {
                Some(c) => self.pivot_expr(c),
                None => constant(""),
            };
            q = q.extend(PIVOT_COL, leaf_expr, ExtendOpts::typed(core.string.clone()));
        }
        q = q.extend(
            DEPTH_COL,
            constant(nlevels as i64 + 1),
            ExtendOpts::typed(core.integer.clone()),
        );
        q = q.extend(
            IS_ROOT_COL,
            constant(0i64),
            ExtendOpts::typed(core.integer.clone()),
        );
        q = q.project(self.out_cols());
        q = self.extend_detail_sort_cols(q, nlevels == npivots);

        for i in 0..npivots {
            let expr = if i < nlevels {
                constant(path[i].as_str())
            } else if i == nlevels {
                col(PIVOT_COL)
            } else {
                ValueExpr::ConstVal { val: Literal::Null }
            };
            q = q.extend(path_col(i), expr, ExtendOpts::typed(core.string.clone()));
        }
        Ok(q)
    }

    /// The single all-rows total at depth 0.
    fn root_query(&self) -> QueryRep {
        let core = self.dialect.handler().core_types();
        let aggs: Vec<AggColSpec> = self
            .base_schema
            .columns()
            .iter()
            .map(|c| AggColSpec::Col(c.clone()))
            .collect();
        let mut q = self
            .base_query
            .clone()
            .group_by(Vec::<String>::new(), aggs)
            .extend(PIVOT_COL, constant(""), ExtendOpts::typed(core.string.clone()))
            .extend(DEPTH_COL, constant(0i64), ExtendOpts::typed(core.integer.clone()))
            .extend(IS_ROOT_COL, constant(1i64), ExtendOpts::typed(core.integer.clone()))
            .project(self.out_cols());
        q = self.extend_detail_sort_cols(q, false);
        for i in 0..self.pivots.len() {
            q = q.extend(
                path_col(i),
                ValueExpr::ConstVal { val: Literal::Null },
                ExtendOpts::typed(core.string.clone()),
            );
        }
        q
    }

    /// Aggregated sort values for every node at `depth` (1-based), keyed by
    /// its path columns, plus a constant marker that distinguishes matched
    /// rows from the NULLs a left join leaves on shallower rows.
    fn sort_query(&self, depth: usize) -> QueryRep {
        let core = self.dialect.handler().core_types();
        let group_cols: Vec<String> = self.pivots[..depth].to_vec();
        let aggs: Vec<AggColSpec> = self
            .options
            .sort_key
            .iter()
            .map(|k| AggColSpec::Col(k.col.clone()))
            .collect();
        let mut q = self.base_query.clone().group_by(group_cols.clone(), aggs);
        for (i, pivot) in group_cols.iter().enumerate() {
            q = q.extend(
                path_col(i),
                self.pivot_expr(pivot),
                ExtendOpts::typed(core.string.clone()),
            );
        }
        let mut cmap = HashMap::new();
        for (j, k) in self.options.sort_key.iter().enumerate() {
            cmap.insert(
                k.col.clone(),
                ColumnMapInfo::renamed(sort_val_col(depth - 1, j)),
            );
        }
        q = q.map_columns(cmap);
        q = q.extend(
            sort_marker_col(depth - 1),
            constant(1i64),
            ExtendOpts::typed(core.integer.clone()),
        );
        let out: Vec<String> = (0..depth)
            .map(path_col)
            .chain(
                self.options
                    .sort_key
                    .iter()
                    .enumerate()
                    .map(|(j, _)| sort_val_col(depth - 1, j)),
            )
            .chain([sort_marker_col(depth - 1)])
            .collect();
        q.project(out)
    }

    /// Sort columns for the deepest level, carried by every tree arm.
    ///
    /// Aggregated sort values reach the shallower levels through joins on
    /// path prefixes, but detail rows inside one leaf group all share the
    /// same path, so their sort values must travel with the row: the row's
    /// own column values on detail arms, typed NULLs everywhere else.
    fn extend_detail_sort_cols(&self, mut q: QueryRep, is_detail: bool) -> QueryRep {
        if self.options.sort_key.is_empty() {
            return q;
        }
        let core = self.dialect.handler().core_types();
        let level = self.pivots.len();
        for (j, k) in self.options.sort_key.iter().enumerate() {
            let ty = self
                .base_schema
                .column_type(&k.col)
                .cloned()
                .unwrap_or_else(|| core.string.clone());
            let expr = if is_detail {
                col(k.col.as_str())
            } else {
                ValueExpr::ConstVal { val: Literal::Null }
            };
            q = q.extend(sort_val_col(level, j), expr, ExtendOpts::typed(ty));
        }
        let marker = if is_detail {
            constant(1i64)
        } else {
            ValueExpr::ConstVal { val: Literal::Null }
        };
        q.extend(
            sort_marker_col(level),
            marker,
            ExtendOpts::typed(core.integer.clone()),
        )
    }

    /// Output columns of the sorted tree query: the arm columns, then one
    /// sort level per tree depth (including the detail level), then paths.
    fn sorted_out_cols(&self) -> Vec<String> {
        let mut cols = self.out_cols();
        for level in 0..=self.pivots.len() {
            for j in 0..self.options.sort_key.len() {
                cols.push(sort_val_col(level, j));
            }
            cols.push(sort_marker_col(level));
        }
        cols.extend((0..self.pivots.len()).map(path_col));
        cols
    }

    fn unsorted_tree_query(&self, open_paths: &PathTree) -> Result<QueryRep> {
        let open_paths = open_paths.trim_to_depth(self.pivots.len());
        let mut q = self.apply_path(&[])?;
        if self.options.show_root {
            q = self.root_query().concat(q);
        }
        for path in open_paths.iter_paths() {
            q = q.concat(self.apply_path(&path)?);
        }
        Ok(q)
    }

    fn path_sort_keys(&self) -> Vec<SortKey> {
        (0..self.pivots.len())
            .map(|i| SortKey::asc(path_col(i)))
            .chain([SortKey::asc(DEPTH_COL)])
            .collect()
    }

    /// Tree query ordered by path: parents above children, siblings by
    /// pivot value.
    pub fn tree_query(&self, open_paths: &PathTree) -> Result<QueryRep> {
        let q = self.unsorted_tree_query(open_paths)?;
        Ok(q.sort(self.path_sort_keys()))
    }

    /// Tree query ordered by the aggregate sort key: every subtree's
    /// children ranked by their aggregated sort values, parents still above
    /// children, and rows inside an expanded leaf group ranked by their own
    /// values. Falls back to [PivotTreeModel::tree_query] when no sort key
    /// is set.
    pub fn sorted_tree_query(&self, open_paths: &PathTree) -> Result<QueryRep> {
        if self.options.sort_key.is_empty() {
            return self.tree_query(open_paths);
        }
        let mut q = self.unsorted_tree_query(open_paths)?;
        let npivots = self.pivots.len();
        for depth in 1..=npivots {
            let on: Vec<String> = (0..depth).map(path_col).collect();
            q = q.join(self.sort_query(depth), on);
        }
        q = q.project(self.sorted_out_cols());
        let mut keys = vec![SortKey::desc(IS_ROOT_COL)];
        for level in 0..=npivots {
            keys.push(SortKey::asc(sort_marker_col(level)));
            for (j, k) in self.options.sort_key.iter().enumerate() {
                keys.push(SortKey {
                    col: sort_val_col(level, j),
                    asc: k.asc,
                });
            }
        }
        keys.extend(self.path_sort_keys());
        Ok(q.sort(keys))
    }

    /// Render the sorted tree query as SQL for this model's dialect.
    pub fn tree_sql(&self, open_paths: &PathTree) -> Result<String> {
        let q = self.sorted_tree_query(open_paths)?;
        sql::unpaged_query_to_sql(self.dialect, &self.tables, &q)
    }
}
