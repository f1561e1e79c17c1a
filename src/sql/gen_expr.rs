//! Dialect-aware stringification of value and filter expressions.

use itertools::Itertools;

use crate::dialect::DialectHandler;
use crate::error::{Error, Result};
use crate::expr::{BinRelOp, BoolOp, FilterArg, FilterExpr, RelExpr, UnaryRelOp, ValueExpr, WindowFn};
use crate::types::Literal;

pub(crate) fn pp_literal(h: &dyn DialectHandler, lit: &Literal) -> Result<String> {
    Ok(match lit {
        Literal::Null => "null".to_string(),
        Literal::Bool(b) => h.bool_literal(*b).to_string(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::String(s) => format!("'{}'", h.escape_string_literal(s)),
        Literal::List(_) => {
            return Err(Error::Internal(
                "list literal outside of IN operand".to_string(),
            ))
        }
    })
}

pub(crate) fn pp_value_expr(h: &dyn DialectHandler, e: &ValueExpr) -> Result<String> {
    Ok(match e {
        ValueExpr::ConstVal { val } => pp_literal(h, val)?,
        ValueExpr::ColRef { col } => h.quote_ident(col),
        ValueExpr::WindowExpr { func } => match func {
            WindowFn::RowNumber => "row_number() OVER ()".to_string(),
            WindowFn::Rank => "rank() OVER ()".to_string(),
            WindowFn::DenseRank => "dense_rank() OVER ()".to_string(),
        },
        ValueExpr::AsString { val } => format!(
            "CAST({} AS {})",
            pp_value_expr(h, val)?,
            h.core_types().string.sql_type_name
        ),
        ValueExpr::CastExpr { val, to } => {
            format!("CAST({} AS {})", pp_value_expr(h, val)?, to.sql_type_name)
        }
    })
}

/// Render a filter tree as the body of a WHERE clause.
///
/// Nested boolean subtrees are parenthesized; bare relational leaves are
/// not. An empty tree renders as the empty string (callers omit the
/// clause).
pub(crate) fn pp_filter_expr(h: &dyn DialectHandler, f: &FilterExpr) -> Result<String> {
    let sep = match f.op {
        BoolOp::And => " AND ",
        BoolOp::Or => " OR ",
    };
    let parts: Vec<String> = f
        .args
        .iter()
        .map(|arg| match arg {
            FilterArg::Rel(r) => pp_rel_expr(h, r),
            FilterArg::Sub(sub) => Ok(format!("({})", pp_filter_expr(h, sub)?)),
        })
        .try_collect()?;
    Ok(parts.join(sep))
}

fn pp_rel_expr(h: &dyn DialectHandler, r: &RelExpr) -> Result<String> {
    match r {
        RelExpr::Unary { op, arg } => {
            let arg = pp_value_expr(h, arg)?;
            Ok(match op {
                UnaryRelOp::IsNull => format!("{arg} IS NULL"),
                UnaryRelOp::IsNotNull => format!("{arg} IS NOT NULL"),
            })
        }
        RelExpr::Bin { op, lhs, rhs } => {
            if let Some(sql_op) = op.sql_op() {
                return Ok(format!(
                    "{} {} {}",
                    pp_value_expr(h, lhs)?,
                    sql_op,
                    pp_value_expr(h, rhs)?
                ));
            }
            pp_text_op(h, *op, lhs, rhs)
        }
    }
}

/// Rewrite the text-only operators to LIKE / IN. Only constant right-hand
/// sides are supported.
fn pp_text_op(
    h: &dyn DialectHandler,
    op: BinRelOp,
    lhs: &ValueExpr,
    rhs: &ValueExpr,
) -> Result<String> {
    let rhs_val = match rhs {
        ValueExpr::ConstVal { val } => val,
        _ => {
            return Err(Error::NonConstantOperand { op: op.to_string() });
        }
    };
    let lhs = pp_value_expr(h, lhs)?;

    use BinRelOp::*;
    if matches!(op, In | NotIn) {
        let vals = match rhs_val {
            Literal::List(vals) => vals.clone(),
            single => vec![single.clone()],
        };
        let rendered: Vec<String> = vals.iter().map(|v| pp_literal(h, v)).try_collect()?;
        let kw = if op == In { "IN" } else { "NOT IN" };
        return Ok(format!("{} {} ({})", lhs, kw, rendered.join(", ")));
    }

    let text = match rhs_val {
        Literal::String(s) => h.escape_string_literal(s),
        other => h.escape_string_literal(&other.as_display_string()),
    };
    let (negated, pattern) = match op {
        Begins => (false, format!("{text}%")),
        NotBegins => (true, format!("{text}%")),
        Ends => (false, format!("%{text}")),
        NotEnds => (true, format!("%{text}")),
        Contains => (false, format!("%{text}%")),
        NotContains => (true, format!("%{text}%")),
        In | NotIn | Eq | Ne | Gt | Ge | Lt | Le => unreachable!("handled above"),
    };
    let kw = if negated { "NOT LIKE" } else { "LIKE" };
    Ok(format!("{lhs} {kw} '{pattern}'"))
}
