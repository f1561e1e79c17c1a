//! Rendering [SqlQuery] to dialect SQL text.
//!
//! A printer owns its subquery-alias generator; concurrent print calls
//! each get an independent counter.

use itertools::Itertools;

use super::ast::{SelectItem, SqlFrom, SqlQuery, SqlSelect, SqlSelectExpr};
use super::gen_expr::{pp_filter_expr, pp_value_expr};
use crate::dialect::{Dialect, DialectHandler};
use crate::error::Result;
use crate::types::{AggFn, Literal};

#[derive(Debug, Clone, Default)]
struct NameGenerator {
    prefix: &'static str,
    next_id: usize,
}

impl NameGenerator {
    fn new(prefix: &'static str) -> NameGenerator {
        NameGenerator { prefix, next_id: 0 }
    }

    fn gen(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        format!("{}{}", self.prefix, id)
    }
}

pub struct SqlPrinter {
    dialect: Dialect,
    aliases: NameGenerator,
}

impl SqlPrinter {
    pub fn new(dialect: Dialect) -> SqlPrinter {
        SqlPrinter {
            dialect,
            aliases: NameGenerator::new("subq_"),
        }
    }

    pub fn print(&mut self, query: &SqlQuery) -> Result<String> {
        self.pp_query(query)
    }

    fn handler(&self) -> &'static dyn DialectHandler {
        self.dialect.handler()
    }

    fn pp_query(&mut self, query: &SqlQuery) -> Result<String> {
        let selects: Vec<String> = query
            .selects
            .iter()
            .map(|s| self.pp_select(s))
            .try_collect()?;
        let mut sql = selects.join(" UNION ALL ");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok(sql)
    }

    fn pp_select(&mut self, select: &SqlSelect) -> Result<String> {
        let h = self.handler();
        let items: Vec<String> = select
            .select_list
            .iter()
            .map(|item| self.pp_select_item(item))
            .try_collect()?;
        let from = self.pp_from(&select.from)?;
        let mut sql = format!("SELECT {} FROM {}", items.join(", "), from);
        if let Some(fexp) = &select.where_clause {
            let rendered = pp_filter_expr(h, fexp)?;
            if !rendered.is_empty() {
                sql.push_str(&format!(" WHERE {rendered}"));
            }
        }
        if !select.group_by.is_empty() {
            let cols = select
                .group_by
                .iter()
                .map(|c| h.quote_ident(c))
                .join(", ");
            sql.push_str(&format!(" GROUP BY {cols}"));
        }
        if !select.order_by.is_empty() {
            let keys = select
                .order_by
                .iter()
                .map(|k| h.sort_key_sql(&h.quote_ident(&k.col), k.asc))
                .join(", ");
            sql.push_str(&format!(" ORDER BY {keys}"));
        }
        Ok(sql)
    }

    fn pp_from(&mut self, from: &SqlFrom) -> Result<String> {
        let h = self.handler();
        Ok(match from {
            SqlFrom::Table(name) => h.quote_ident(name),
            SqlFrom::RawSql(text) => {
                format!("({text}){}", self.subquery_alias())
            }
            SqlFrom::SubQuery(sub) => {
                let inner = self.pp_query(sub)?;
                format!("({inner}){}", self.subquery_alias())
            }
            SqlFrom::Join { lhs, rhs, on } => {
                let left = self.pp_query(lhs)?;
                let left_alias = self.aliases.gen();
                let right = self.pp_query(rhs)?;
                let right_alias = self.aliases.gen();
                let on_cols = on.iter().map(|c| h.quote_ident(c)).join(", ");
                format!(
                    "({left}) {left_alias} LEFT OUTER JOIN ({right}) {right_alias} USING ({on_cols})"
                )
            }
        })
    }

    /// An alias suffix for subqueries, on dialects that demand one.
    fn subquery_alias(&mut self) -> String {
        if self.handler().requires_subquery_alias() {
            format!(" {}", self.aliases.gen())
        } else {
            String::new()
        }
    }

    fn pp_select_item(&mut self, item: &SelectItem) -> Result<String> {
        let h = self.handler();
        let (rendered, implicit_name) = match &item.expr {
            SqlSelectExpr::Col(c) => (h.quote_ident(c), Some(c.as_str())),
            SqlSelectExpr::Expr(e) => {
                // A bare NULL constant takes the column's rendering so that
                // string-typed NULL columns type-check across UNION arms.
                let s = match e {
                    crate::expr::ValueExpr::ConstVal { val: Literal::Null } => {
                        h.agg_null(&item.column_type)
                    }
                    _ => pp_value_expr(h, e)?,
                };
                (s, None)
            }
            SqlSelectExpr::Agg { agg, col } => (self.pp_agg(*agg, col, item)?, None),
        };
        Ok(match item.out_name() {
            Some(name) if implicit_name != Some(name) => {
                format!("{rendered} AS {}", h.quote_ident(name))
            }
            _ => rendered,
        })
    }

    fn pp_agg(&self, agg: AggFn, col: &str, item: &SelectItem) -> Result<String> {
        let h = self.handler();
        let qcol = h.quote_ident(col);
        Ok(match agg {
            AggFn::Uniq => {
                // Emulated: a group is "uniq" when min and max agree.
                format!(
                    "CASE WHEN min({qcol}) = max({qcol}) THEN min({qcol}) ELSE null END"
                )
            }
            AggFn::Null | AggFn::NullStr => h.agg_null(&item.column_type),
            _ => {
                let f = agg.sql_fn().ok_or_else(|| {
                    crate::error::Error::Internal(format!("no SQL function for {agg}"))
                })?;
                format!("{f}({qcol})")
            }
        })
    }
}

/// Render with a fresh printer (and thus a fresh alias counter).
pub fn pp_sql_query(dialect: Dialect, query: &SqlQuery) -> Result<String> {
    SqlPrinter::new(dialect).print(query)
}
