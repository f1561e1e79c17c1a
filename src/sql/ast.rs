//! SQL-level query AST.
//!
//! This IR dictates the shape of the emitted SQL: how many nested
//! subqueries, where WHERE/GROUP BY/ORDER BY clauses land, and which arms a
//! UNION ALL has. Dialect concerns stay out of it; the printer resolves
//! those.

use crate::expr::{FilterExpr, ValueExpr};
use crate::ir::SortKey;
use crate::types::{AggFn, ColumnType};

#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    /// More than one statement means a UNION ALL of all of them.
    pub selects: Vec<SqlSelect>,
    /// Pagination, attached only at the outermost level.
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl SqlQuery {
    pub fn single(select: SqlSelect) -> SqlQuery {
        SqlQuery {
            selects: vec![select],
            offset: None,
            limit: None,
        }
    }

    /// The sole select statement, if this query is one (the precondition
    /// for every flattening rewrite).
    pub fn as_single_select_mut(&mut self) -> Option<&mut SqlSelect> {
        if self.selects.len() == 1 {
            self.selects.first_mut()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlSelect {
    pub select_list: Vec<SelectItem>,
    pub from: SqlFrom,
    pub where_clause: Option<FilterExpr>,
    pub group_by: Vec<String>,
    pub order_by: Vec<SortKey>,
}

impl SqlSelect {
    pub fn new(select_list: Vec<SelectItem>, from: SqlFrom) -> SqlSelect {
        SqlSelect {
            select_list,
            from,
            where_clause: None,
            group_by: vec![],
            order_by: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: SqlSelectExpr,
    pub column_type: ColumnType,
    pub alias: Option<String>,
}

impl SelectItem {
    /// Plain pass-through column.
    pub fn col(id: impl Into<String>, column_type: ColumnType) -> SelectItem {
        SelectItem {
            expr: SqlSelectExpr::Col(id.into()),
            column_type,
            alias: None,
        }
    }

    /// The name this item contributes to the select's output row.
    pub fn out_name(&self) -> Option<&str> {
        if let Some(a) = &self.alias {
            return Some(a);
        }
        match &self.expr {
            SqlSelectExpr::Col(c) => Some(c),
            _ => None,
        }
    }

    /// True when the item passes column `id` through untouched, so that a
    /// flattened clause may reference `id` directly.
    pub fn is_passthrough_of(&self, id: &str) -> bool {
        matches!(&self.expr, SqlSelectExpr::Col(c) if c == id) && self.out_name() == Some(id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlSelectExpr {
    /// Bare column reference, quoted on output.
    Col(String),
    /// Scalar expression, rendered by the dialect-aware expression printer.
    Expr(ValueExpr),
    /// Aggregate application, including the emulated pseudo-aggregates.
    Agg { agg: AggFn, col: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlFrom {
    Table(String),
    /// Raw SQL leaf, parenthesized as a subquery.
    RawSql(String),
    SubQuery(Box<SqlQuery>),
    /// Left-outer join over the `on` columns (rendered with USING).
    Join {
        lhs: Box<SqlQuery>,
        rhs: Box<SqlQuery>,
        on: Vec<String>,
    },
}
