//! Feature map for SQL dialects.
//!
//! The general principle is to target generic SQL and add dialect-specific
//! behavior only where the engines genuinely diverge: identifier quoting,
//! rendering of NULL aggregate columns, whether subqueries require an alias,
//! and how type names map to [ColumnType]s.

use core::fmt::Debug;
use std::any::Any;
use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::types::ColumnType;

/// SQL backend targeted by code generation.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Serialize,
    Default,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::EnumString,
    strum_macros::VariantNames,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    SQLite,
    DuckDb,
    BigQuery,
    Presto,
    Snowflake,
}

impl Dialect {
    pub fn handler(&self) -> &'static dyn DialectHandler {
        match self {
            Dialect::SQLite => &SQLiteDialect,
            Dialect::DuckDb => &DuckDbDialect,
            Dialect::BigQuery => &BigQueryDialect,
            Dialect::Presto => &PrestoDialect,
            Dialect::Snowflake => &SnowflakeDialect,
        }
    }
}

/// The core scalar types every dialect must provide.
#[derive(Debug, Clone)]
pub struct CoreColumnTypes {
    pub integer: ColumnType,
    pub real: ColumnType,
    pub string: ColumnType,
    pub boolean: ColumnType,
}

#[derive(Debug)]
pub struct SQLiteDialect;
#[derive(Debug)]
pub struct DuckDbDialect;
#[derive(Debug)]
pub struct BigQueryDialect;
#[derive(Debug)]
pub struct PrestoDialect;
#[derive(Debug)]
pub struct SnowflakeDialect;

pub trait DialectHandler: Any + Debug + Sync {
    fn core_types(&self) -> &'static CoreColumnTypes;

    /// Registered type names beyond the core four.
    fn type_registry(&self) -> &'static HashMap<&'static str, ColumnType>;

    fn ident_quote(&self) -> char {
        '"'
    }

    /// Whether `FROM (subquery)` must carry an alias.
    fn requires_subquery_alias(&self) -> bool {
        false
    }

    fn quote_ident(&self, id: &str) -> String {
        let q = self.ident_quote();
        format!("{q}{id}{q}")
    }

    /// Escape the inside of a single-quoted string literal.
    fn escape_string_literal(&self, s: &str) -> String {
        s.replace('\'', "''")
    }

    fn bool_literal(&self, b: bool) -> &'static str {
        if b {
            "true"
        } else {
            "false"
        }
    }

    /// A NULL value usable in an aggregate position of a UNION arm.
    ///
    /// String columns get an explicit cast because some engines refuse to
    /// type-check a bare NULL against a string column across UNION arms.
    fn agg_null(&self, col_type: &ColumnType) -> String {
        if col_type.is_string {
            format!("CAST(null AS {})", self.core_types().string.sql_type_name)
        } else {
            "null".to_string()
        }
    }

    /// Render one ORDER BY key.
    ///
    /// Dialects whose ascending sort puts NULLs last override this to pin
    /// NULLs first, so that shallower pivot rows (null path suffix) always
    /// precede their descendants.
    fn sort_key_sql(&self, quoted_col: &str, asc: bool) -> String {
        format!("{} {}", quoted_col, if asc { "ASC" } else { "DESC" })
    }

    /// Resolve a dialect type name, classifying unregistered names on the
    /// fly by their spelling.
    fn column_type(&self, sql_type_name: &str) -> ColumnType {
        let core = self.core_types();
        let lower = sql_type_name.to_ascii_lowercase();
        if lower == core.integer.sql_type_name.to_ascii_lowercase() {
            return core.integer.clone();
        }
        if lower == core.real.sql_type_name.to_ascii_lowercase() {
            return core.real.clone();
        }
        if lower == core.string.sql_type_name.to_ascii_lowercase() {
            return core.string.clone();
        }
        if lower == core.boolean.sql_type_name.to_ascii_lowercase() {
            return core.boolean.clone();
        }
        if let Some(ct) = self.type_registry().get(lower.as_str()) {
            return ct.clone();
        }
        log::debug!("classifying unregistered type name: {sql_type_name}");
        classify_type_name(sql_type_name)
    }
}

/// Heuristic classification for type names no registry knows about.
fn classify_type_name(sql_type_name: &str) -> ColumnType {
    let lower = sql_type_name.to_ascii_lowercase();
    const NUMERIC_HINTS: &[&str] = &["int", "real", "double", "float", "num", "dec"];
    const STRING_HINTS: &[&str] = &["char", "text", "string", "clob"];
    if NUMERIC_HINTS.iter().any(|h| lower.contains(h)) {
        ColumnType::numeric(sql_type_name)
    } else if STRING_HINTS.iter().any(|h| lower.contains(h)) {
        ColumnType::string(sql_type_name)
    } else {
        ColumnType::opaque(sql_type_name)
    }
}

fn registry_from(entries: &[(&'static str, ColumnType)]) -> HashMap<&'static str, ColumnType> {
    entries.iter().cloned().collect()
}

static SQLITE_CORE: Lazy<CoreColumnTypes> = Lazy::new(|| CoreColumnTypes {
    integer: ColumnType::numeric("integer"),
    real: ColumnType::numeric("real"),
    string: ColumnType::string("text"),
    boolean: ColumnType::opaque("boolean"),
});

static SQLITE_REGISTRY: Lazy<HashMap<&'static str, ColumnType>> = Lazy::new(|| {
    registry_from(&[
        ("int", ColumnType::numeric("integer")),
        ("bigint", ColumnType::numeric("integer")),
        ("smallint", ColumnType::numeric("integer")),
        ("tinyint", ColumnType::numeric("integer")),
        ("double", ColumnType::numeric("real")),
        ("float", ColumnType::numeric("real")),
        ("numeric", ColumnType::numeric("real")),
        ("varchar", ColumnType::string("text")),
        ("char", ColumnType::string("text")),
        ("blob", ColumnType::opaque("blob")),
    ])
});

impl DialectHandler for SQLiteDialect {
    fn core_types(&self) -> &'static CoreColumnTypes {
        &SQLITE_CORE
    }

    fn type_registry(&self) -> &'static HashMap<&'static str, ColumnType> {
        &SQLITE_REGISTRY
    }

    // SQLite's type affinity accepts a bare NULL anywhere.
    fn agg_null(&self, _col_type: &ColumnType) -> String {
        "null".to_string()
    }

    // Older SQLite has no boolean literals.
    fn bool_literal(&self, b: bool) -> &'static str {
        if b {
            "1"
        } else {
            "0"
        }
    }
}

static DUCKDB_CORE: Lazy<CoreColumnTypes> = Lazy::new(|| CoreColumnTypes {
    integer: ColumnType::numeric("INTEGER"),
    real: ColumnType::numeric("DOUBLE"),
    string: ColumnType::string("VARCHAR"),
    boolean: ColumnType::opaque("BOOLEAN"),
});

static DUCKDB_REGISTRY: Lazy<HashMap<&'static str, ColumnType>> = Lazy::new(|| {
    registry_from(&[
        ("int", ColumnType::numeric("INTEGER")),
        ("bigint", ColumnType::numeric("BIGINT")),
        ("hugeint", ColumnType::numeric("HUGEINT")),
        ("smallint", ColumnType::numeric("SMALLINT")),
        ("real", ColumnType::numeric("DOUBLE")),
        ("float", ColumnType::numeric("DOUBLE")),
        ("decimal", ColumnType::numeric("DOUBLE")),
        ("text", ColumnType::string("VARCHAR")),
        ("string", ColumnType::string("VARCHAR")),
        ("date", ColumnType::opaque("DATE")),
        ("timestamp", ColumnType::opaque("TIMESTAMP")),
    ])
});

impl DialectHandler for DuckDbDialect {
    fn core_types(&self) -> &'static CoreColumnTypes {
        &DUCKDB_CORE
    }

    fn type_registry(&self) -> &'static HashMap<&'static str, ColumnType> {
        &DUCKDB_REGISTRY
    }

    // DuckDB sorts NULLs last on ASC by default.
    fn sort_key_sql(&self, quoted_col: &str, asc: bool) -> String {
        if asc {
            format!("{quoted_col} ASC NULLS FIRST")
        } else {
            format!("{quoted_col} DESC")
        }
    }
}

static BIGQUERY_CORE: Lazy<CoreColumnTypes> = Lazy::new(|| CoreColumnTypes {
    integer: ColumnType::numeric("INT64"),
    real: ColumnType::numeric("FLOAT64"),
    string: ColumnType::string("STRING"),
    boolean: ColumnType::opaque("BOOL"),
});

static BIGQUERY_REGISTRY: Lazy<HashMap<&'static str, ColumnType>> = Lazy::new(|| {
    registry_from(&[
        ("integer", ColumnType::numeric("INT64")),
        ("numeric", ColumnType::numeric("NUMERIC")),
        ("bignumeric", ColumnType::numeric("BIGNUMERIC")),
        ("float", ColumnType::numeric("FLOAT64")),
        ("boolean", ColumnType::opaque("BOOL")),
        ("date", ColumnType::opaque("DATE")),
        ("datetime", ColumnType::opaque("DATETIME")),
        ("timestamp", ColumnType::opaque("TIMESTAMP")),
    ])
});

impl DialectHandler for BigQueryDialect {
    fn core_types(&self) -> &'static CoreColumnTypes {
        &BIGQUERY_CORE
    }

    fn type_registry(&self) -> &'static HashMap<&'static str, ColumnType> {
        &BIGQUERY_REGISTRY
    }

    fn ident_quote(&self) -> char {
        '`'
    }

    fn requires_subquery_alias(&self) -> bool {
        true
    }
}

static PRESTO_CORE: Lazy<CoreColumnTypes> = Lazy::new(|| CoreColumnTypes {
    integer: ColumnType::numeric("integer"),
    real: ColumnType::numeric("double"),
    string: ColumnType::string("varchar"),
    boolean: ColumnType::opaque("boolean"),
});

static PRESTO_REGISTRY: Lazy<HashMap<&'static str, ColumnType>> = Lazy::new(|| {
    registry_from(&[
        ("int", ColumnType::numeric("integer")),
        ("bigint", ColumnType::numeric("bigint")),
        ("smallint", ColumnType::numeric("smallint")),
        ("tinyint", ColumnType::numeric("tinyint")),
        ("real", ColumnType::numeric("double")),
        ("decimal", ColumnType::numeric("double")),
        ("char", ColumnType::string("varchar")),
        ("varbinary", ColumnType::opaque("varbinary")),
        ("date", ColumnType::opaque("date")),
        ("timestamp", ColumnType::opaque("timestamp")),
    ])
});

impl DialectHandler for PrestoDialect {
    fn core_types(&self) -> &'static CoreColumnTypes {
        &PRESTO_CORE
    }

    fn type_registry(&self) -> &'static HashMap<&'static str, ColumnType> {
        &PRESTO_REGISTRY
    }

    fn requires_subquery_alias(&self) -> bool {
        true
    }

    fn sort_key_sql(&self, quoted_col: &str, asc: bool) -> String {
        if asc {
            format!("{quoted_col} ASC NULLS FIRST")
        } else {
            format!("{quoted_col} DESC")
        }
    }
}

static SNOWFLAKE_CORE: Lazy<CoreColumnTypes> = Lazy::new(|| CoreColumnTypes {
    integer: ColumnType::numeric("INTEGER"),
    real: ColumnType::numeric("DOUBLE"),
    string: ColumnType::string("VARCHAR"),
    boolean: ColumnType::opaque("BOOLEAN"),
});

static SNOWFLAKE_REGISTRY: Lazy<HashMap<&'static str, ColumnType>> = Lazy::new(|| {
    registry_from(&[
        ("int", ColumnType::numeric("INTEGER")),
        ("bigint", ColumnType::numeric("INTEGER")),
        ("number", ColumnType::numeric("NUMBER")),
        ("float", ColumnType::numeric("DOUBLE")),
        ("real", ColumnType::numeric("DOUBLE")),
        ("text", ColumnType::string("VARCHAR")),
        ("string", ColumnType::string("VARCHAR")),
        ("char", ColumnType::string("VARCHAR")),
        ("date", ColumnType::opaque("DATE")),
        ("timestamp_ntz", ColumnType::opaque("TIMESTAMP_NTZ")),
    ])
});

impl DialectHandler for SnowflakeDialect {
    fn core_types(&self) -> &'static CoreColumnTypes {
        &SNOWFLAKE_CORE
    }

    fn type_registry(&self) -> &'static HashMap<&'static str, ColumnType> {
        &SNOWFLAKE_REGISTRY
    }

    fn requires_subquery_alias(&self) -> bool {
        true
    }

    fn sort_key_sql(&self, quoted_col: &str, asc: bool) -> String {
        if asc {
            format!("{quoted_col} ASC NULLS FIRST")
        } else {
            format!("{quoted_col} DESC")
        }
    }
}
