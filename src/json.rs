//! JSON wire format for query trees and schemas.
//!
//! Encoding is total; decoding is defensive. Every tagged union decodes
//! through an explicit match, so a wire payload from a newer peer fails
//! with [Error::UnknownTag] (after a warning) instead of panicking or
//! silently dropping the node.
//!
//! Column types travel as dialect type names; the decoder resolves them
//! back through the dialect's type registry.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::dialect::{Dialect, DialectHandler};
use crate::error::{Error, Result};
use crate::expr::{
    BinRelOp, BoolOp, FilterArg, FilterExpr, RelExpr, UnaryRelOp, ValueExpr, WindowFn,
};
use crate::ir::{AggColSpec, ColumnMapInfo, ExtendOpts, JoinType, QueryRep, SortKey};
use crate::schema::{ColumnMetadata, Schema};
use crate::types::Literal;

pub fn query_to_json(q: &QueryRep) -> Result<String> {
    Ok(serde_json::to_string(&encode_query(q))?)
}

pub fn query_from_json(dialect: Dialect, s: &str) -> Result<QueryRep> {
    let v: Value = serde_json::from_str(s)?;
    decode_query(dialect, &v)
}

pub fn schema_to_json(s: &Schema) -> Result<String> {
    Ok(serde_json::to_string(&encode_schema(s))?)
}

pub fn schema_from_json(s: &str) -> Result<Schema> {
    let v: Value = serde_json::from_str(s)?;
    decode_schema(&v)
}

pub fn encode_query(q: &QueryRep) -> Value {
    match q {
        QueryRep::Table { name } => json!({"operator": "table", "name": name}),
        QueryRep::Sql { text } => json!({"operator": "sql", "sqlText": text}),
        QueryRep::Project { cols, from } => {
            json!({"operator": "project", "cols": cols, "from": encode_query(from)})
        }
        QueryRep::GroupBy { cols, aggs, from } => json!({
            "operator": "groupBy",
            "cols": cols,
            "aggs": aggs.iter().map(encode_agg).collect::<Vec<_>>(),
            "from": encode_query(from),
        }),
        QueryRep::Filter { fexp, from } => json!({
            "operator": "filter",
            "fexp": encode_filter_expr(fexp),
            "from": encode_query(from),
        }),
        QueryRep::MapColumns { cmap, from } => {
            let cmap: Map<String, Value> = cmap
                .iter()
                .map(|(k, v)| (k.clone(), encode_map_info(v)))
                .collect();
            json!({"operator": "mapColumns", "cmap": cmap, "from": encode_query(from)})
        }
        QueryRep::MapColumnsByIndex { cmap, from } => {
            let cmap: Map<String, Value> = cmap
                .iter()
                .map(|(k, v)| (k.to_string(), encode_map_info(v)))
                .collect();
            json!({"operator": "mapColumnsByIndex", "cmap": cmap, "from": encode_query(from)})
        }
        QueryRep::Concat { from, target } => json!({
            "operator": "concat",
            "from": encode_query(from),
            "target": encode_query(target),
        }),
        QueryRep::Sort { keys, from } => json!({
            "operator": "sort",
            "keys": keys.iter()
                .map(|k| json!({"col": k.col, "asc": k.asc}))
                .collect::<Vec<_>>(),
            "from": encode_query(from),
        }),
        QueryRep::Extend {
            col_id,
            col_expr,
            opts,
            from,
        } => {
            let mut opts_obj = Map::new();
            if let Some(ct) = &opts.column_type {
                opts_obj.insert(
                    "columnType".to_string(),
                    Value::String(ct.sql_type_name.clone()),
                );
            }
            if let Some(dn) = &opts.display_name {
                opts_obj.insert("displayName".to_string(), Value::String(dn.clone()));
            }
            json!({
                "operator": "extend",
                "colId": col_id,
                "colExpr": encode_value_expr(col_expr),
                "opts": opts_obj,
                "from": encode_query(from),
            })
        }
        QueryRep::Join {
            lhs,
            rhs,
            on,
            join_type,
        } => json!({
            "operator": "join",
            "joinType": join_type.to_string(),
            "on": on,
            "lhs": encode_query(lhs),
            "rhs": encode_query(rhs),
        }),
    }
}

fn encode_agg(spec: &AggColSpec) -> Value {
    match spec {
        AggColSpec::Col(c) => Value::String(c.clone()),
        AggColSpec::Agg(f, c) => json!([f.to_string(), c]),
    }
}

fn encode_map_info(info: &ColumnMapInfo) -> Value {
    let mut obj = Map::new();
    if let Some(id) = &info.id {
        obj.insert("id".to_string(), Value::String(id.clone()));
    }
    if let Some(dn) = &info.display_name {
        obj.insert("displayName".to_string(), Value::String(dn.clone()));
    }
    if let Some(ct) = &info.column_type {
        obj.insert(
            "columnType".to_string(),
            Value::String(ct.sql_type_name.clone()),
        );
    }
    Value::Object(obj)
}

pub fn encode_value_expr(e: &ValueExpr) -> Value {
    match e {
        ValueExpr::ConstVal { val } => {
            json!({"expType": "ConstVal", "val": encode_literal(val)})
        }
        ValueExpr::ColRef { col } => json!({"expType": "ColRef", "col": col}),
        ValueExpr::WindowExpr { func } => {
            json!({"expType": "WindowExp", "fn": func.to_string()})
        }
        ValueExpr::AsString { val } => {
            json!({"expType": "AsString", "val": encode_value_expr(val)})
        }
        ValueExpr::CastExpr { val, to } => json!({
            "expType": "CastExp",
            "val": encode_value_expr(val),
            "to": to.sql_type_name,
        }),
    }
}

fn encode_literal(lit: &Literal) -> Value {
    serde_json::to_value(lit).unwrap_or(Value::Null)
}

pub fn encode_filter_expr(f: &FilterExpr) -> Value {
    json!({
        "op": f.op.to_string(),
        "args": f.args.iter()
            .map(|arg| match arg {
                FilterArg::Rel(r) => encode_rel_expr(r),
                FilterArg::Sub(sub) => encode_filter_expr(sub),
            })
            .collect::<Vec<_>>(),
    })
}

fn encode_rel_expr(r: &RelExpr) -> Value {
    match r {
        RelExpr::Bin { op, lhs, rhs } => json!({
            "expType": "BinRelExp",
            "op": op.to_string(),
            "lhs": encode_value_expr(lhs),
            "rhs": encode_value_expr(rhs),
        }),
        RelExpr::Unary { op, arg } => json!({
            "expType": "UnaryRelExp",
            "op": op.to_string(),
            "arg": encode_value_expr(arg),
        }),
    }
}

pub fn encode_schema(s: &Schema) -> Value {
    let metadata: Map<String, Value> = s
        .columns()
        .iter()
        .filter_map(|c| s.column_metadata(c).map(|m| (c, m)))
        .map(|(c, m)| {
            let mut obj = Map::new();
            obj.insert(
                "displayName".to_string(),
                Value::String(m.display_name.clone()),
            );
            obj.insert(
                "columnType".to_string(),
                Value::String(m.column_type.sql_type_name.clone()),
            );
            if let Some(stats) = &m.stats {
                obj.insert("stats".to_string(), stats.clone());
            }
            (c.clone(), Value::Object(obj))
        })
        .collect();
    json!({
        "dialect": s.dialect.to_string(),
        "columns": s.columns(),
        "columnMetadata": metadata,
    })
}

pub fn decode_query(dialect: Dialect, v: &Value) -> Result<QueryRep> {
    let obj = as_obj(v, "query")?;
    let operator = get_str(obj, "operator", "query")?;
    match operator {
        "table" => Ok(QueryRep::Table {
            name: get_str(obj, "name", "table")?.to_string(),
        }),
        "sql" => Ok(QueryRep::Sql {
            text: get_str(obj, "sqlText", "sql")?.to_string(),
        }),
        "project" => Ok(QueryRep::Project {
            cols: decode_string_vec(get(obj, "cols", "project")?, "project cols")?,
            from: decode_from(dialect, obj, "project")?,
        }),
        "groupBy" => {
            let aggs = get_arr(obj, "aggs", "groupBy")?
                .iter()
                .map(decode_agg)
                .collect::<Result<Vec<_>>>()?;
            Ok(QueryRep::GroupBy {
                cols: decode_string_vec(get(obj, "cols", "groupBy")?, "groupBy cols")?,
                aggs,
                from: decode_from(dialect, obj, "groupBy")?,
            })
        }
        "filter" => Ok(QueryRep::Filter {
            fexp: decode_filter_expr(dialect, get(obj, "fexp", "filter")?)?,
            from: decode_from(dialect, obj, "filter")?,
        }),
        "mapColumns" => {
            let cmap_obj = as_obj(get(obj, "cmap", "mapColumns")?, "mapColumns cmap")?;
            let mut cmap = HashMap::new();
            for (k, info) in cmap_obj {
                cmap.insert(k.clone(), decode_map_info(dialect, info)?);
            }
            Ok(QueryRep::MapColumns {
                cmap,
                from: decode_from(dialect, obj, "mapColumns")?,
            })
        }
        "mapColumnsByIndex" => {
            let cmap_obj = as_obj(
                get(obj, "cmap", "mapColumnsByIndex")?,
                "mapColumnsByIndex cmap",
            )?;
            let mut cmap = HashMap::new();
            for (k, info) in cmap_obj {
                let idx: usize = k.parse().map_err(|_| Error::Decode {
                    context: "mapColumnsByIndex cmap",
                    detail: format!("non-numeric column index \"{k}\""),
                })?;
                cmap.insert(idx, decode_map_info(dialect, info)?);
            }
            Ok(QueryRep::MapColumnsByIndex {
                cmap,
                from: decode_from(dialect, obj, "mapColumnsByIndex")?,
            })
        }
        "concat" => Ok(QueryRep::Concat {
            from: decode_from(dialect, obj, "concat")?,
            target: Arc::new(decode_query(dialect, get(obj, "target", "concat")?)?),
        }),
        "sort" => {
            let keys = get_arr(obj, "keys", "sort")?
                .iter()
                .map(decode_sort_key)
                .collect::<Result<Vec<_>>>()?;
            Ok(QueryRep::Sort {
                keys,
                from: decode_from(dialect, obj, "sort")?,
            })
        }
        "extend" => {
            let opts = match obj.get("opts") {
                None | Some(Value::Null) => ExtendOpts::default(),
                Some(v) => decode_extend_opts(dialect, v)?,
            };
            Ok(QueryRep::Extend {
                col_id: get_str(obj, "colId", "extend")?.to_string(),
                col_expr: decode_value_expr(dialect, get(obj, "colExpr", "extend")?)?,
                opts,
                from: decode_from(dialect, obj, "extend")?,
            })
        }
        "join" => {
            let jt = get_str(obj, "joinType", "join")?;
            let join_type = JoinType::from_str(jt).map_err(|_| {
                log::warn!("unknown join type tag: {jt}");
                Error::UnknownTag {
                    tag: jt.to_string(),
                    context: "join type",
                }
            })?;
            Ok(QueryRep::Join {
                lhs: Arc::new(decode_query(dialect, get(obj, "lhs", "join")?)?),
                rhs: Arc::new(decode_query(dialect, get(obj, "rhs", "join")?)?),
                on: decode_string_vec(get(obj, "on", "join")?, "join on")?,
                join_type,
            })
        }
        other => {
            log::warn!("unknown query operator tag: {other}");
            Err(Error::UnknownTag {
                tag: other.to_string(),
                context: "query operator",
            })
        }
    }
}

fn decode_from(
    dialect: Dialect,
    obj: &Map<String, Value>,
    context: &'static str,
) -> Result<Arc<QueryRep>> {
    Ok(Arc::new(decode_query(dialect, get(obj, "from", context)?)?))
}

fn decode_agg(v: &Value) -> Result<AggColSpec> {
    match v {
        Value::String(c) => Ok(AggColSpec::Col(c.clone())),
        Value::Array(parts) => {
            let [f, c] = parts.as_slice() else {
                return Err(Error::Decode {
                    context: "aggregate spec",
                    detail: format!("expected [fn, col] pair, got {v}"),
                });
            };
            let f = f.as_str().ok_or_else(|| Error::Decode {
                context: "aggregate spec",
                detail: format!("non-string aggregate function in {v}"),
            })?;
            let c = c.as_str().ok_or_else(|| Error::Decode {
                context: "aggregate spec",
                detail: format!("non-string column id in {v}"),
            })?;
            let agg = crate::types::AggFn::from_str(f).map_err(|_| {
                log::warn!("unknown aggregate function tag: {f}");
                Error::UnknownTag {
                    tag: f.to_string(),
                    context: "aggregate function",
                }
            })?;
            Ok(AggColSpec::Agg(agg, c.to_string()))
        }
        other => Err(Error::Decode {
            context: "aggregate spec",
            detail: format!("expected string or [fn, col] pair, got {other}"),
        }),
    }
}

fn decode_sort_key(v: &Value) -> Result<SortKey> {
    let obj = as_obj(v, "sort key")?;
    let asc = get(obj, "asc", "sort key")?
        .as_bool()
        .ok_or_else(|| Error::Decode {
            context: "sort key",
            detail: "asc is not a boolean".to_string(),
        })?;
    Ok(SortKey {
        col: get_str(obj, "col", "sort key")?.to_string(),
        asc,
    })
}

fn decode_map_info(dialect: Dialect, v: &Value) -> Result<ColumnMapInfo> {
    let obj = as_obj(v, "column map entry")?;
    let mut info = ColumnMapInfo::default();
    if let Some(id) = obj.get("id") {
        info.id = Some(expect_str(id, "column map entry")?.to_string());
    }
    if let Some(dn) = obj.get("displayName") {
        info.display_name = Some(expect_str(dn, "column map entry")?.to_string());
    }
    if let Some(ct) = obj.get("columnType") {
        let name = expect_str(ct, "column map entry")?;
        info.column_type = Some(dialect.handler().column_type(name));
    }
    Ok(info)
}

fn decode_extend_opts(dialect: Dialect, v: &Value) -> Result<ExtendOpts> {
    let obj = as_obj(v, "extend opts")?;
    let mut opts = ExtendOpts::default();
    if let Some(ct) = obj.get("columnType") {
        let name = expect_str(ct, "extend opts")?;
        opts.column_type = Some(dialect.handler().column_type(name));
    }
    if let Some(dn) = obj.get("displayName") {
        opts.display_name = Some(expect_str(dn, "extend opts")?.to_string());
    }
    Ok(opts)
}

pub fn decode_value_expr(dialect: Dialect, v: &Value) -> Result<ValueExpr> {
    let obj = as_obj(v, "value expression")?;
    let tag = get_str(obj, "expType", "value expression")?;
    match tag {
        "ConstVal" => {
            let val: Literal = serde_json::from_value(get(obj, "val", "ConstVal")?.clone())?;
            Ok(ValueExpr::ConstVal { val })
        }
        "ColRef" => Ok(ValueExpr::ColRef {
            col: get_str(obj, "col", "ColRef")?.to_string(),
        }),
        "WindowExp" => {
            let name = get_str(obj, "fn", "WindowExp")?;
            let func = WindowFn::from_str(name).map_err(|_| {
                log::warn!("unknown window function tag: {name}");
                Error::UnknownTag {
                    tag: name.to_string(),
                    context: "window function",
                }
            })?;
            Ok(ValueExpr::WindowExpr { func })
        }
        "AsString" => Ok(ValueExpr::AsString {
            val: Box::new(decode_value_expr(dialect, get(obj, "val", "AsString")?)?),
        }),
        "CastExp" => Ok(ValueExpr::CastExpr {
            val: Box::new(decode_value_expr(dialect, get(obj, "val", "CastExp")?)?),
            to: dialect
                .handler()
                .column_type(get_str(obj, "to", "CastExp")?),
        }),
        other => {
            log::warn!("unknown value expression tag: {other}");
            Err(Error::UnknownTag {
                tag: other.to_string(),
                context: "value expression",
            })
        }
    }
}

pub fn decode_filter_expr(dialect: Dialect, v: &Value) -> Result<FilterExpr> {
    let obj = as_obj(v, "filter expression")?;
    let op_name = get_str(obj, "op", "filter expression")?;
    let op = BoolOp::from_str(op_name).map_err(|_| {
        log::warn!("unknown boolean operator tag: {op_name}");
        Error::UnknownTag {
            tag: op_name.to_string(),
            context: "boolean operator",
        }
    })?;
    let args = get_arr(obj, "args", "filter expression")?
        .iter()
        .map(|arg| {
            let arg_obj = as_obj(arg, "filter argument")?;
            if arg_obj.contains_key("expType") {
                Ok(FilterArg::Rel(decode_rel_expr(dialect, arg)?))
            } else if arg_obj.contains_key("op") {
                Ok(FilterArg::Sub(decode_filter_expr(dialect, arg)?))
            } else {
                Err(Error::Decode {
                    context: "filter argument",
                    detail: format!("neither a relational nor a boolean expression: {arg}"),
                })
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(FilterExpr { op, args })
}

fn decode_rel_expr(dialect: Dialect, v: &Value) -> Result<RelExpr> {
    let obj = as_obj(v, "relational expression")?;
    let tag = get_str(obj, "expType", "relational expression")?;
    match tag {
        "BinRelExp" => {
            let op_name = get_str(obj, "op", "BinRelExp")?;
            let op = BinRelOp::from_str(op_name).map_err(|_| {
                log::warn!("unknown relational operator tag: {op_name}");
                Error::UnknownTag {
                    tag: op_name.to_string(),
                    context: "relational operator",
                }
            })?;
            Ok(RelExpr::Bin {
                op,
                lhs: decode_value_expr(dialect, get(obj, "lhs", "BinRelExp")?)?,
                rhs: decode_value_expr(dialect, get(obj, "rhs", "BinRelExp")?)?,
            })
        }
        "UnaryRelExp" => {
            let op_name = get_str(obj, "op", "UnaryRelExp")?;
            let op = UnaryRelOp::from_str(op_name).map_err(|_| {
                log::warn!("unknown unary operator tag: {op_name}");
                Error::UnknownTag {
                    tag: op_name.to_string(),
                    context: "unary operator",
                }
            })?;
            Ok(RelExpr::Unary {
                op,
                arg: decode_value_expr(dialect, get(obj, "arg", "UnaryRelExp")?)?,
            })
        }
        other => {
            log::warn!("unknown relational expression tag: {other}");
            Err(Error::UnknownTag {
                tag: other.to_string(),
                context: "relational expression",
            })
        }
    }
}

pub fn decode_schema(v: &Value) -> Result<Schema> {
    let obj = as_obj(v, "schema")?;
    let dialect_name = get_str(obj, "dialect", "schema")?;
    let dialect = Dialect::from_str(dialect_name)
        .map_err(|_| Error::UnknownDialect(dialect_name.to_string()))?;
    let columns = decode_string_vec(get(obj, "columns", "schema")?, "schema columns")?;
    let metadata = as_obj(get(obj, "columnMetadata", "schema")?, "schema metadata")?;
    let cols = columns
        .into_iter()
        .map(|c| {
            let m = metadata.get(&c).ok_or_else(|| Error::Decode {
                context: "schema metadata",
                detail: format!("no metadata for column \"{c}\""),
            })?;
            let m = as_obj(m, "schema metadata")?;
            let meta = ColumnMetadata {
                display_name: get_str(m, "displayName", "schema metadata")?.to_string(),
                column_type: dialect
                    .handler()
                    .column_type(get_str(m, "columnType", "schema metadata")?),
                stats: m.get("stats").cloned(),
            };
            Ok((c, meta))
        })
        .collect::<Result<Vec<_>>>()?;
    Schema::new(dialect, cols)
}

fn as_obj<'a>(v: &'a Value, context: &'static str) -> Result<&'a Map<String, Value>> {
    v.as_object().ok_or_else(|| Error::Decode {
        context,
        detail: format!("expected an object, got {v}"),
    })
}

fn get<'a>(obj: &'a Map<String, Value>, key: &str, context: &'static str) -> Result<&'a Value> {
    obj.get(key).ok_or_else(|| Error::Decode {
        context,
        detail: format!("missing field \"{key}\""),
    })
}

fn get_str<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    context: &'static str,
) -> Result<&'a str> {
    expect_str(get(obj, key, context)?, context)
}

fn expect_str<'a>(v: &'a Value, context: &'static str) -> Result<&'a str> {
    v.as_str().ok_or_else(|| Error::Decode {
        context,
        detail: format!("expected a string, got {v}"),
    })
}

fn get_arr<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    context: &'static str,
) -> Result<&'a Vec<Value>> {
    get(obj, key, context)?.as_array().ok_or_else(|| Error::Decode {
        context,
        detail: format!("field \"{key}\" is not an array"),
    })
}

fn decode_string_vec(v: &Value, context: &'static str) -> Result<Vec<String>> {
    let arr = v.as_array().ok_or_else(|| Error::Decode {
        context,
        detail: format!("expected an array, got {v}"),
    })?;
    arr.iter()
        .map(|e| Ok(expect_str(e, context)?.to_string()))
        .collect()
}
