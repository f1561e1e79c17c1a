//! Column types and the aggregate-function catalog.
//!
//! A [ColumnType] is a value: dialects hand them out and the rest of the
//! crate only inspects the numeric/string classification and the default
//! aggregate. Nothing here talks to a database.

use serde::{Deserialize, Serialize};

/// Aggregate functions understood by `group_by`.
///
/// `Uniq`, `Null` and `NullStr` are pseudo-aggregates that the SQL layer
/// emulates, since none of the target engines provide them natively.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AggFn {
    Avg,
    Count,
    Min,
    Max,
    Sum,
    Uniq,
    Null,
    NullStr,
}

impl AggFn {
    /// The SQL function name, for the aggregates that map to one directly.
    pub(crate) fn sql_fn(&self) -> Option<&'static str> {
        match self {
            AggFn::Avg => Some("avg"),
            AggFn::Count => Some("count"),
            AggFn::Min => Some("min"),
            AggFn::Max => Some("max"),
            AggFn::Sum => Some("sum"),
            AggFn::Uniq | AggFn::Null | AggFn::NullStr => None,
        }
    }
}

/// A scalar type as a particular dialect names it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    /// Dialect-level type name, e.g. `integer` or `VARCHAR`.
    pub sql_type_name: String,
    pub is_numeric: bool,
    pub is_string: bool,
    /// Aggregate used by `group_by` when none is given for a column.
    pub default_agg: AggFn,
}

impl ColumnType {
    pub fn numeric(sql_type_name: impl Into<String>) -> ColumnType {
        ColumnType {
            sql_type_name: sql_type_name.into(),
            is_numeric: true,
            is_string: false,
            default_agg: AggFn::Sum,
        }
    }

    pub fn string(sql_type_name: impl Into<String>) -> ColumnType {
        ColumnType {
            sql_type_name: sql_type_name.into(),
            is_numeric: false,
            is_string: true,
            default_agg: AggFn::Uniq,
        }
    }

    /// A type we can carry through queries but neither sum nor LIKE.
    pub fn opaque(sql_type_name: impl Into<String>) -> ColumnType {
        ColumnType {
            sql_type_name: sql_type_name.into(),
            is_numeric: false,
            is_string: false,
            default_agg: AggFn::Uniq,
        }
    }
}

/// A literal value, as it appears in `ConstVal` expressions and rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Only valid as the right-hand side of `IN`/`NOTIN`.
    List(Vec<Literal>),
}

impl Literal {
    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    /// Stringified value, used when deriving pivot labels.
    pub fn as_display_string(&self) -> String {
        match self {
            Literal::Null => String::new(),
            Literal::Bool(b) => b.to_string(),
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::String(s) => s.clone(),
            Literal::List(_) => String::new(),
        }
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int(v.into())
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::String(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::String(v)
    }
}
