//! Lowering the relational operator tree to the SQL AST.
//!
//! Each operator either flattens into the child's sole SELECT statement or
//! wraps it in a subquery. Flattening conditions are deliberately
//! conservative; when in doubt we wrap, since every target engine optimizes
//! nested subqueries well.

use itertools::Itertools;

use super::ast::{SelectItem, SqlFrom, SqlQuery, SqlSelect, SqlSelectExpr};
use super::printer::pp_sql_query;
use crate::dialect::{Dialect, DialectHandler};
use crate::error::{Error, Result};
use crate::ir::{
    agg_result_type, get_schema, infer_extend_type, AggColSpec, ColumnMapInfo, JoinType, QueryRep,
    TableMap,
};
use crate::schema::Schema;
use crate::types::AggFn;

/// Lower `q` to the dialect-independent SQL AST.
pub fn gen_sql_query(dialect: Dialect, tables: &TableMap, q: &QueryRep) -> Result<SqlQuery> {
    match q {
        QueryRep::Table { name } => {
            let schema = tables
                .get(name)
                .ok_or_else(|| Error::UnknownTable(name.clone()))?;
            Ok(SqlQuery::single(SqlSelect::new(
                select_all_items(schema),
                SqlFrom::Table(name.clone()),
            )))
        }
        QueryRep::Sql { text } => {
            let schema = tables
                .get(text)
                .ok_or_else(|| Error::UnknownTable(text.clone()))?;
            Ok(SqlQuery::single(SqlSelect::new(
                select_all_items(schema),
                SqlFrom::RawSql(text.clone()),
            )))
        }
        QueryRep::Project { cols, from } => {
            let input = get_schema(dialect, tables, from)?;
            let mut sub = gen_sql_query(dialect, tables, from)?;
            for c in cols {
                if !input.contains(c) {
                    return Err(unknown_column(dialect, &sub, c));
                }
            }
            if can_reshape_select_list(&sub) {
                let sel = &mut sub.selects[0];
                let items: Vec<SelectItem> = cols
                    .iter()
                    .map(|c| {
                        sel.select_list
                            .iter()
                            .find(|it| it.out_name() == Some(c.as_str()))
                            .cloned()
                            .ok_or_else(|| {
                                Error::Internal(format!("select list lost column \"{c}\""))
                            })
                    })
                    .try_collect()?;
                sel.select_list = items;
                return Ok(sub);
            }
            let items = cols
                .iter()
                .map(|c| typed_col_item(&input, c))
                .collect();
            Ok(SqlQuery::single(SqlSelect::new(
                items,
                SqlFrom::SubQuery(Box::new(sub)),
            )))
        }
        QueryRep::GroupBy { cols, aggs, from } => {
            let input = get_schema(dialect, tables, from)?;
            let mut sub = gen_sql_query(dialect, tables, from)?;
            for c in cols {
                if !input.contains(c) {
                    return Err(unknown_column(dialect, &sub, c));
                }
            }
            let resolved: Vec<(AggFn, String)> = aggs
                .iter()
                .map(|spec| -> Result<(AggFn, String)> {
                    let id = spec.col_id();
                    let ty = input
                        .column_type(id)
                        .ok_or_else(|| unknown_column(dialect, &sub, id))?;
                    let agg = match spec {
                        AggColSpec::Col(_) => ty.default_agg,
                        AggColSpec::Agg(f, _) => *f,
                    };
                    Ok((agg, id.to_string()))
                })
                .try_collect()?;

            let mut items: Vec<SelectItem> =
                cols.iter().map(|c| typed_col_item(&input, c)).collect();
            for (agg, id) in &resolved {
                let in_type = input
                    .column_type(id)
                    .cloned()
                    .unwrap_or_else(|| dialect.handler().core_types().string.clone());
                items.push(SelectItem {
                    expr: SqlSelectExpr::Agg {
                        agg: *agg,
                        col: id.clone(),
                    },
                    column_type: agg_result_type(dialect, *agg, &in_type),
                    alias: Some(id.clone()),
                });
            }

            let mut referenced = cols.iter().chain(resolved.iter().map(|(_, id)| id));
            let can_flatten = can_reshape_select_list(&sub)
                && referenced
                    .all(|c| sub.selects[0].select_list.iter().any(|it| it.is_passthrough_of(c)));
            if can_flatten {
                let sel = &mut sub.selects[0];
                sel.select_list = items;
                sel.group_by = cols.clone();
                return Ok(sub);
            }
            let mut sel = SqlSelect::new(items, SqlFrom::SubQuery(Box::new(sub)));
            sel.group_by = cols.clone();
            Ok(SqlQuery::single(sel))
        }
        QueryRep::Filter { fexp, from } => {
            let mut sub = gen_sql_query(dialect, tables, from)?;
            if fexp.is_empty() {
                return Ok(sub);
            }
            let can_flatten = sub.selects.len() == 1 && {
                let s = &sub.selects[0];
                s.where_clause.is_none() && s.group_by.is_empty()
            };
            if can_flatten {
                sub.selects[0].where_clause = Some(fexp.clone());
                return Ok(sub);
            }
            let input = get_schema(dialect, tables, from)?;
            let mut sel = SqlSelect::new(select_all_items(&input), SqlFrom::SubQuery(Box::new(sub)));
            sel.where_clause = Some(fexp.clone());
            Ok(SqlQuery::single(sel))
        }
        QueryRep::Sort { keys, from } => {
            let input = get_schema(dialect, tables, from)?;
            let mut sub = gen_sql_query(dialect, tables, from)?;
            for k in keys {
                if !input.contains(&k.col) {
                    return Err(unknown_column(dialect, &sub, &k.col));
                }
            }
            let can_flatten = sub.selects.len() == 1 && sub.selects[0].order_by.is_empty();
            if can_flatten {
                sub.selects[0].order_by = keys.clone();
                return Ok(sub);
            }
            let mut sel = SqlSelect::new(select_all_items(&input), SqlFrom::SubQuery(Box::new(sub)));
            sel.order_by = keys.clone();
            Ok(SqlQuery::single(sel))
        }
        QueryRep::Extend {
            col_id,
            col_expr,
            opts,
            from,
        } => {
            let input = get_schema(dialect, tables, from)?;
            if input.contains(col_id) {
                return Err(Error::DuplicateColumn(col_id.clone()));
            }
            let column_type = infer_extend_type(dialect, &input, col_expr, opts)?;
            let mut sub = gen_sql_query(dialect, tables, from)?;
            let item = SelectItem {
                expr: SqlSelectExpr::Expr(col_expr.clone()),
                column_type,
                alias: Some(col_id.clone()),
            };
            // A constant needs nothing from the input row, so it may join
            // any select list, grouped or not.
            if col_expr.is_const() && sub.selects.len() == 1 {
                sub.selects[0].select_list.push(item);
                return Ok(sub);
            }
            let mut items = select_all_items(&input);
            items.push(item);
            Ok(SqlQuery::single(SqlSelect::new(
                items,
                SqlFrom::SubQuery(Box::new(sub)),
            )))
        }
        QueryRep::MapColumns { cmap, from } => {
            let input = get_schema(dialect, tables, from)?;
            let mut sub = gen_sql_query(dialect, tables, from)?;
            if can_reshape_select_list(&sub) {
                for item in sub.selects[0].select_list.iter_mut() {
                    let name = item.out_name().map(str::to_string);
                    if let Some(info) = name.as_deref().and_then(|n| cmap.get(n)) {
                        apply_map_info(item, info);
                    }
                }
                return Ok(sub);
            }
            let items = input
                .columns()
                .iter()
                .map(|c| {
                    let mut item = typed_col_item(&input, c);
                    if let Some(info) = cmap.get(c) {
                        apply_map_info(&mut item, info);
                    }
                    item
                })
                .collect();
            Ok(SqlQuery::single(SqlSelect::new(
                items,
                SqlFrom::SubQuery(Box::new(sub)),
            )))
        }
        QueryRep::MapColumnsByIndex { cmap, from } => {
            let input = get_schema(dialect, tables, from)?;
            let mut sub = gen_sql_query(dialect, tables, from)?;
            if can_reshape_select_list(&sub) {
                for (i, item) in sub.selects[0].select_list.iter_mut().enumerate() {
                    if let Some(info) = cmap.get(&i) {
                        apply_map_info(item, info);
                    }
                }
                return Ok(sub);
            }
            let items = input
                .columns()
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    let mut item = typed_col_item(&input, c);
                    if let Some(info) = cmap.get(&i) {
                        apply_map_info(&mut item, info);
                    }
                    item
                })
                .collect();
            Ok(SqlQuery::single(SqlSelect::new(
                items,
                SqlFrom::SubQuery(Box::new(sub)),
            )))
        }
        QueryRep::Concat { from, target } => {
            let a = gen_sql_query(dialect, tables, from)?;
            let b = gen_sql_query(dialect, tables, target)?;
            Ok(SqlQuery {
                selects: a.selects.into_iter().chain(b.selects).collect(),
                offset: None,
                limit: None,
            })
        }
        QueryRep::Join {
            lhs,
            rhs,
            on,
            join_type,
        } => {
            if *join_type != JoinType::LeftOuter {
                return Err(Error::UnsupportedJoinType(join_type.to_string()));
            }
            let left_schema = get_schema(dialect, tables, lhs)?;
            let right_schema = get_schema(dialect, tables, rhs)?;
            let lhs_sub = gen_sql_query(dialect, tables, lhs)?;
            for c in on {
                if !left_schema.contains(c) {
                    return Err(unknown_column(dialect, &lhs_sub, c));
                }
                if !right_schema.contains(c) {
                    let rhs_sub = gen_sql_query(dialect, tables, rhs)?;
                    return Err(unknown_column(dialect, &rhs_sub, c));
                }
            }
            // Pre-project the right side to the join columns plus its
            // unique columns; USING then leaves no ambiguous names.
            let rhs_cols: Vec<String> = on
                .iter()
                .cloned()
                .chain(
                    right_schema
                        .columns()
                        .iter()
                        .filter(|c| !on.contains(c) && !left_schema.contains(c))
                        .cloned(),
                )
                .collect();
            let rhs_sub = gen_sql_query(
                dialect,
                tables,
                &QueryRep::Project {
                    cols: rhs_cols,
                    from: rhs.clone(),
                },
            )?;
            let out = get_schema(dialect, tables, q)?;
            Ok(SqlQuery::single(SqlSelect::new(
                select_all_items(&out),
                SqlFrom::Join {
                    lhs: Box::new(lhs_sub),
                    rhs: Box::new(rhs_sub),
                    on: on.clone(),
                },
            )))
        }
    }
}

/// Render `q` with no pagination.
pub fn unpaged_query_to_sql(dialect: Dialect, tables: &TableMap, q: &QueryRep) -> Result<String> {
    let sql_query = gen_sql_query(dialect, tables, q)?;
    let sql = pp_sql_query(dialect, &sql_query)?;
    log::debug!("generated {dialect} SQL: {sql}");
    Ok(sql)
}

/// Render `q`, optionally paginated. Pagination attaches at the outermost
/// level only, after any UNION ALL arms.
pub fn query_to_sql(
    dialect: Dialect,
    tables: &TableMap,
    q: &QueryRep,
    offset: Option<u64>,
    limit: Option<u64>,
) -> Result<String> {
    let mut sql_query = gen_sql_query(dialect, tables, q)?;
    sql_query.offset = offset;
    sql_query.limit = limit;
    pp_sql_query(dialect, &sql_query)
}

/// A `SELECT count(*)` over the full, unpaginated result of `q`.
pub fn count_sql(dialect: Dialect, tables: &TableMap, q: &QueryRep) -> Result<String> {
    let inner = unpaged_query_to_sql(dialect, tables, q)?;
    let alias = if dialect.handler().requires_subquery_alias() {
        " subq_0"
    } else {
        ""
    };
    Ok(format!("SELECT count(*) FROM ({inner}){alias}"))
}

/// True when the child is a lone SELECT whose select list may be rewritten
/// in place: no GROUP BY (clauses reference select-list names) and no ORDER
/// BY (keys reference output names).
fn can_reshape_select_list(sub: &SqlQuery) -> bool {
    sub.selects.len() == 1 && {
        let s = &sub.selects[0];
        s.group_by.is_empty() && s.order_by.is_empty()
    }
}

fn select_all_items(schema: &Schema) -> Vec<SelectItem> {
    schema
        .columns()
        .iter()
        .map(|c| typed_col_item(schema, c))
        .collect()
}

fn typed_col_item(schema: &Schema, col: &str) -> SelectItem {
    let ty = schema
        .column_type(col)
        .cloned()
        .unwrap_or_else(|| schema.dialect.handler().core_types().string.clone());
    SelectItem::col(col, ty)
}

fn apply_map_info(item: &mut SelectItem, info: &ColumnMapInfo) {
    if let Some(id) = &info.id {
        item.alias = Some(id.clone());
    }
    if let Some(ct) = &info.column_type {
        item.column_type = ct.clone();
    }
}

fn unknown_column(dialect: Dialect, sub: &SqlQuery, col: &str) -> Error {
    let sql = pp_sql_query(dialect, sub).unwrap_or_default();
    Error::UnknownColumn {
        column: col.to_string(),
        sql,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use insta::assert_snapshot;

    use super::*;
    use crate::expr::{col, constant, FilterExpr};
    use crate::ir::{ColumnMapInfo, ExtendOpts, SortKey};
    use crate::schema::ColumnMetadata;

    fn sqlite_schema(cols: &[(&str, &str)]) -> Schema {
        let d = Dialect::SQLite;
        let h = d.handler();
        Schema::new(
            d,
            cols.iter()
                .map(|(id, ty)| (id.to_string(), ColumnMetadata::new(*id, h.column_type(ty))))
                .collect(),
        )
        .unwrap()
    }

    fn test_tables() -> TableMap {
        let mut tables = TableMap::new();
        tables.insert(
            "emp".to_string(),
            sqlite_schema(&[("name", "text"), ("dept", "text"), ("salary", "integer")]),
        );
        tables.insert(
            "dept_info".to_string(),
            sqlite_schema(&[("dept", "text"), ("head", "text"), ("budget", "integer")]),
        );
        tables
    }

    fn sql(q: &QueryRep) -> String {
        unpaged_query_to_sql(Dialect::SQLite, &test_tables(), q).unwrap()
    }

    #[test]
    fn table_scan_enumerates_columns() {
        assert_snapshot!(
            sql(&QueryRep::table("emp")),
            @r#"SELECT "name", "dept", "salary" FROM "emp""#
        );
    }

    #[test]
    fn raw_sql_leaf_is_parenthesized() {
        let text = "select name, dept, salary from emp where salary > 100";
        let mut tables = test_tables();
        tables.insert(
            text.to_string(),
            sqlite_schema(&[("name", "text"), ("dept", "text"), ("salary", "integer")]),
        );
        let q = QueryRep::sql(text).project(["name"]);
        assert_snapshot!(
            unpaged_query_to_sql(Dialect::SQLite, &tables, &q).unwrap(),
            @r#"SELECT "name" FROM (select name, dept, salary from emp where salary > 100)"#
        );
    }

    #[test]
    fn pipeline_flattens_to_one_select() {
        let q = QueryRep::table("emp")
            .filter(FilterExpr::and().eq(col("dept"), constant("eng")))
            .group_by(["dept"], ["salary"])
            .sort(vec![SortKey::asc("dept")]);
        assert_snapshot!(
            sql(&q),
            @r#"SELECT "dept", sum("salary") AS "salary" FROM "emp" WHERE "dept" = 'eng' GROUP BY "dept" ORDER BY "dept" ASC"#
        );
    }

    #[test]
    fn project_after_group_by_wraps() {
        let q = QueryRep::table("emp")
            .group_by(["dept"], ["salary"])
            .project(["salary"]);
        assert_snapshot!(
            sql(&q),
            @r#"SELECT "salary" FROM (SELECT "dept", sum("salary") AS "salary" FROM "emp" GROUP BY "dept")"#
        );
    }

    #[test]
    fn group_by_over_aliased_extend_wraps() {
        let q = QueryRep::table("emp")
            .extend("one", constant(1), ExtendOpts::default())
            .group_by(["dept"], [(AggFn::Sum, "one")]);
        assert_snapshot!(
            sql(&q),
            @r#"SELECT "dept", sum("one") AS "one" FROM (SELECT "name", "dept", "salary", 1 AS "one" FROM "emp") GROUP BY "dept""#
        );
    }

    #[test]
    fn text_column_defaults_to_uniq() {
        let q = QueryRep::table("emp").group_by(["dept"], ["name"]);
        assert_snapshot!(
            sql(&q),
            @r#"SELECT "dept", CASE WHEN min("name") = max("name") THEN min("name") ELSE null END AS "name" FROM "emp" GROUP BY "dept""#
        );
    }

    #[test]
    fn non_constant_extend_wraps() {
        let q = QueryRep::table("emp").extend(
            "pay_label",
            col("salary").as_string(),
            ExtendOpts::default(),
        );
        assert_snapshot!(
            sql(&q),
            @r#"SELECT "name", "dept", "salary", CAST("salary" AS text) AS "pay_label" FROM (SELECT "name", "dept", "salary" FROM "emp")"#
        );
    }

    #[test]
    fn map_columns_rewrites_aliases_in_place() {
        let mut cmap = HashMap::new();
        cmap.insert("name".to_string(), ColumnMapInfo::renamed("employee"));
        let q = QueryRep::table("emp").map_columns(cmap);
        assert_snapshot!(
            sql(&q),
            @r#"SELECT "name" AS "employee", "dept", "salary" FROM "emp""#
        );
    }

    #[test]
    fn map_columns_by_index_after_group_wraps() {
        let mut cmap = HashMap::new();
        cmap.insert(1usize, ColumnMapInfo::renamed("total"));
        let q = QueryRep::table("emp")
            .group_by(["dept"], ["salary"])
            .map_columns_by_index(cmap);
        assert_snapshot!(
            sql(&q),
            @r#"SELECT "dept", "salary" AS "total" FROM (SELECT "dept", sum("salary") AS "salary" FROM "emp" GROUP BY "dept")"#
        );
    }

    #[test]
    fn concat_renders_union_all() {
        let q = QueryRep::table("emp").concat(QueryRep::table("emp"));
        assert_snapshot!(
            sql(&q),
            @r#"SELECT "name", "dept", "salary" FROM "emp" UNION ALL SELECT "name", "dept", "salary" FROM "emp""#
        );
    }

    #[test]
    fn join_preprojects_right_side() {
        let q = QueryRep::table("emp").join(QueryRep::table("dept_info"), ["dept"]);
        assert_snapshot!(
            sql(&q),
            @r#"SELECT "name", "dept", "salary", "head", "budget" FROM (SELECT "name", "dept", "salary" FROM "emp") subq_0 LEFT OUTER JOIN (SELECT "dept", "head", "budget" FROM "dept_info") subq_1 USING ("dept")"#
        );
    }

    #[test]
    fn unknown_project_column_reports_subquery_sql() {
        let q = QueryRep::table("emp").project(["nope"]);
        match unpaged_query_to_sql(Dialect::SQLite, &test_tables(), &q) {
            Err(Error::UnknownColumn { column, sql }) => {
                assert_eq!(column, "nope");
                assert!(sql.contains("FROM \"emp\""));
            }
            other => panic!("expected UnknownColumn, got {other:?}"),
        }
    }

    #[test]
    fn pagination_attaches_at_outer_level() {
        let q = QueryRep::table("emp").sort(vec![SortKey::desc("salary")]);
        let paged =
            query_to_sql(Dialect::SQLite, &test_tables(), &q, Some(20), Some(10)).unwrap();
        assert_snapshot!(
            paged,
            @r#"SELECT "name", "dept", "salary" FROM "emp" ORDER BY "salary" DESC LIMIT 10 OFFSET 20"#
        );
    }

    #[test]
    fn count_wraps_the_full_query() {
        let q = QueryRep::table("emp").group_by(["dept"], ["salary"]);
        assert_snapshot!(
            count_sql(Dialect::SQLite, &test_tables(), &q).unwrap(),
            @r#"SELECT count(*) FROM (SELECT "dept", sum("salary") AS "salary" FROM "emp" GROUP BY "dept")"#
        );
        let presto = count_sql(Dialect::Presto, &test_tables(), &q).unwrap();
        assert!(presto.ends_with(") subq_0"));
    }

    #[test]
    fn empty_filter_is_a_no_op() {
        let q = QueryRep::table("emp").filter(FilterExpr::and());
        assert_snapshot!(sql(&q), @r#"SELECT "name", "dept", "salary" FROM "emp""#);
    }

    #[test]
    fn duplicate_extend_column_rejected() {
        let q = QueryRep::table("emp").extend("dept", constant("x"), ExtendOpts::default());
        assert!(matches!(
            unpaged_query_to_sql(Dialect::SQLite, &test_tables(), &q),
            Err(Error::DuplicateColumn(_))
        ));
    }
}
