//! Relational operator AST.
//!
//! Strictly typed, immutable tree of relational operators. Chaining
//! constructors return a new node wrapping the previous one; children sit
//! behind `Arc` so `concat`/`join` may share subtrees, forming a DAG.
//!
//! [get_schema] is the pure schema-propagation function over this AST: one
//! exhaustive arm per operator.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dialect::{Dialect, DialectHandler};
use crate::error::{Error, Result};
use crate::expr::{FilterExpr, ValueExpr};
use crate::schema::{ColumnMetadata, Schema};
use crate::types::{AggFn, ColumnType, Literal};

/// Schemas of the leaf table / SQL dependencies of a query, keyed by the
/// leaf's name (table name or raw SQL text).
pub type TableMap = HashMap<String, Schema>;

/// One aggregation in a `group_by`: either a bare column id (its type's
/// default aggregate applies) or an explicit function.
#[derive(Debug, Clone, PartialEq)]
pub enum AggColSpec {
    Col(String),
    Agg(AggFn, String),
}

impl AggColSpec {
    pub fn col_id(&self) -> &str {
        match self {
            AggColSpec::Col(c) => c,
            AggColSpec::Agg(_, c) => c,
        }
    }
}

impl From<&str> for AggColSpec {
    fn from(c: &str) -> Self {
        AggColSpec::Col(c.to_string())
    }
}

impl From<(AggFn, &str)> for AggColSpec {
    fn from((f, c): (AggFn, &str)) -> Self {
        AggColSpec::Agg(f, c.to_string())
    }
}

/// Rename / retype instructions for `map_columns`.
///
/// Fields left as `None` pass through from the input column.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<ColumnType>,
}

impl ColumnMapInfo {
    pub fn renamed(id: impl Into<String>) -> ColumnMapInfo {
        ColumnMapInfo {
            id: Some(id.into()),
            ..ColumnMapInfo::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtendOpts {
    pub column_type: Option<ColumnType>,
    pub display_name: Option<String>,
}

impl ExtendOpts {
    pub fn typed(column_type: ColumnType) -> ExtendOpts {
        ExtendOpts {
            column_type: Some(column_type),
            display_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub col: String,
    pub asc: bool,
}

impl SortKey {
    pub fn asc(col: impl Into<String>) -> SortKey {
        SortKey {
            col: col.into(),
            asc: true,
        }
    }

    pub fn desc(col: impl Into<String>) -> SortKey {
        SortKey {
            col: col.into(),
            asc: false,
        }
    }
}

/// Join flavors on the wire. Only `LeftOuter` is implemented; the others
/// are rejected at schema propagation and SQL generation time.
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
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum JoinType {
    LeftOuter,
    RightOuter,
    FullOuter,
    Inner,
}

/// The relational operator tree.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRep {
    Table {
        name: String,
    },
    Sql {
        text: String,
    },
    Project {
        cols: Vec<String>,
        from: Arc<QueryRep>,
    },
    GroupBy {
        cols: Vec<String>,
        aggs: Vec<AggColSpec>,
        from: Arc<QueryRep>,
    },
    Filter {
        fexp: FilterExpr,
        from: Arc<QueryRep>,
    },
    MapColumns {
        cmap: HashMap<String, ColumnMapInfo>,
        from: Arc<QueryRep>,
    },
    MapColumnsByIndex {
        cmap: HashMap<usize, ColumnMapInfo>,
        from: Arc<QueryRep>,
    },
    Concat {
        from: Arc<QueryRep>,
        target: Arc<QueryRep>,
    },
    Sort {
        keys: Vec<SortKey>,
        from: Arc<QueryRep>,
    },
    Extend {
        col_id: String,
        col_expr: ValueExpr,
        opts: ExtendOpts,
        from: Arc<QueryRep>,
    },
    Join {
        lhs: Arc<QueryRep>,
        rhs: Arc<QueryRep>,
        on: Vec<String>,
        join_type: JoinType,
    },
}

impl QueryRep {
    pub fn table(name: impl Into<String>) -> QueryRep {
        QueryRep::Table { name: name.into() }
    }

    pub fn sql(text: impl Into<String>) -> QueryRep {
        QueryRep::Sql { text: text.into() }
    }

    pub fn project<S: Into<String>>(self, cols: impl IntoIterator<Item = S>) -> QueryRep {
        QueryRep::Project {
            cols: cols.into_iter().map(Into::into).collect(),
            from: Arc::new(self),
        }
    }

    pub fn group_by<S: Into<String>, A: Into<AggColSpec>>(
        self,
        cols: impl IntoIterator<Item = S>,
        aggs: impl IntoIterator<Item = A>,
    ) -> QueryRep {
        QueryRep::GroupBy {
            cols: cols.into_iter().map(Into::into).collect(),
            aggs: aggs.into_iter().map(Into::into).collect(),
            from: Arc::new(self),
        }
    }

    pub fn filter(self, fexp: FilterExpr) -> QueryRep {
        QueryRep::Filter {
            fexp,
            from: Arc::new(self),
        }
    }

    pub fn map_columns(self, cmap: HashMap<String, ColumnMapInfo>) -> QueryRep {
        QueryRep::MapColumns {
            cmap,
            from: Arc::new(self),
        }
    }

    pub fn map_columns_by_index(self, cmap: HashMap<usize, ColumnMapInfo>) -> QueryRep {
        QueryRep::MapColumnsByIndex {
            cmap,
            from: Arc::new(self),
        }
    }

    /// UNION ALL with `target`. The target's schema compatibility is the
    /// execution layer's responsibility; propagation trusts the left input.
    pub fn concat(self, target: QueryRep) -> QueryRep {
        QueryRep::Concat {
            from: Arc::new(self),
            target: Arc::new(target),
        }
    }

    pub fn sort(self, keys: Vec<SortKey>) -> QueryRep {
        QueryRep::Sort {
            keys,
            from: Arc::new(self),
        }
    }

    pub fn extend(
        self,
        col_id: impl Into<String>,
        col_expr: ValueExpr,
        opts: ExtendOpts,
    ) -> QueryRep {
        QueryRep::Extend {
            col_id: col_id.into(),
            col_expr,
            opts,
            from: Arc::new(self),
        }
    }

    /// Left-outer join on equality of the `on` columns.
    pub fn join<S: Into<String>>(
        self,
        rhs: QueryRep,
        on: impl IntoIterator<Item = S>,
    ) -> QueryRep {
        QueryRep::Join {
            lhs: Arc::new(self),
            rhs: Arc::new(rhs),
            on: on.into_iter().map(Into::into).collect(),
            join_type: JoinType::LeftOuter,
        }
    }
}

/// A leaf dependency of a query: a registered table or a raw SQL string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LeafDep {
    Table(String),
    Sql(String),
}

impl LeafDep {
    /// Name under which the leaf's schema is stored in a [TableMap].
    pub fn table_key(&self) -> &str {
        match self {
            LeafDep::Table(n) => n,
            LeafDep::Sql(s) => s,
        }
    }

    /// Serialized identity used for structural deduplication.
    pub fn dedup_key(&self) -> String {
        match self {
            LeafDep::Table(n) => serde_json::json!({"operator": "table", "name": n}).to_string(),
            LeafDep::Sql(s) => serde_json::json!({"operator": "sql", "sqlText": s}).to_string(),
        }
    }
}

/// All leaf dependencies of `q`, in first-appearance order, deduplicated by
/// serialized key (shared subtrees appear once).
pub fn leaf_deps(q: &QueryRep) -> Vec<LeafDep> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    collect_leaf_deps(q, &mut seen, &mut out);
    out
}

fn collect_leaf_deps(
    q: &QueryRep,
    seen: &mut std::collections::HashSet<String>,
    out: &mut Vec<LeafDep>,
) {
    match q {
        QueryRep::Table { name } => {
            let dep = LeafDep::Table(name.clone());
            if seen.insert(dep.dedup_key()) {
                out.push(dep);
            }
        }
        QueryRep::Sql { text } => {
            let dep = LeafDep::Sql(text.clone());
            if seen.insert(dep.dedup_key()) {
                out.push(dep);
            }
        }
        QueryRep::Project { from, .. }
        | QueryRep::GroupBy { from, .. }
        | QueryRep::Filter { from, .. }
        | QueryRep::MapColumns { from, .. }
        | QueryRep::MapColumnsByIndex { from, .. }
        | QueryRep::Sort { from, .. }
        | QueryRep::Extend { from, .. } => collect_leaf_deps(from, seen, out),
        QueryRep::Concat { from, target } => {
            collect_leaf_deps(from, seen, out);
            collect_leaf_deps(target, seen, out);
        }
        QueryRep::Join { lhs, rhs, .. } => {
            collect_leaf_deps(lhs, seen, out);
            collect_leaf_deps(rhs, seen, out);
        }
    }
}

/// Metadata used when a projected column is absent from the input; the SQL
/// layer reports the error at generation time, not here.
fn placeholder_metadata(dialect: Dialect, id: &str) -> ColumnMetadata {
    ColumnMetadata::new(id, dialect.handler().core_types().string.clone())
}

/// Pure, recursive schema propagation.
pub fn get_schema(dialect: Dialect, tables: &TableMap, q: &QueryRep) -> Result<Schema> {
    match q {
        QueryRep::Table { name } => tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTable(name.clone())),
        QueryRep::Sql { text } => tables
            .get(text)
            .cloned()
            .ok_or_else(|| Error::UnknownTable(text.clone())),
        QueryRep::Project { cols, from } => {
            let input = get_schema(dialect, tables, from)?;
            let columns = cols
                .iter()
                .map(|c| {
                    let meta = input
                        .column_metadata(c)
                        .cloned()
                        .unwrap_or_else(|| placeholder_metadata(dialect, c));
                    (c.clone(), meta)
                })
                .collect();
            Schema::new(dialect, columns)
        }
        QueryRep::GroupBy { cols, aggs, from } => {
            let input = get_schema(dialect, tables, from)?;
            let mut columns: Vec<(String, ColumnMetadata)> = Vec::new();
            for c in cols {
                let meta = input
                    .column_metadata(c)
                    .cloned()
                    .unwrap_or_else(|| placeholder_metadata(dialect, c));
                columns.push((c.clone(), meta));
            }
            for spec in aggs {
                let id = spec.col_id();
                let in_meta = input
                    .column_metadata(id)
                    .cloned()
                    .unwrap_or_else(|| placeholder_metadata(dialect, id));
                let agg = match spec {
                    AggColSpec::Col(_) => in_meta.column_type.default_agg,
                    AggColSpec::Agg(f, _) => *f,
                };
                let column_type = agg_result_type(dialect, agg, &in_meta.column_type);
                let meta = ColumnMetadata {
                    display_name: in_meta.display_name,
                    column_type,
                    stats: None,
                };
                columns.push((id.to_string(), meta));
            }
            Schema::new(dialect, columns)
        }
        QueryRep::Filter { from, .. } | QueryRep::Sort { from, .. } => {
            get_schema(dialect, tables, from)
        }
        QueryRep::MapColumns { cmap, from } => {
            let input = get_schema(dialect, tables, from)?;
            let columns = input
                .columns()
                .iter()
                .map(|c| mapped_column(dialect, &input, c, cmap.get(c)))
                .collect();
            Schema::new(dialect, columns)
        }
        QueryRep::MapColumnsByIndex { cmap, from } => {
            let input = get_schema(dialect, tables, from)?;
            let columns = input
                .columns()
                .iter()
                .enumerate()
                .map(|(i, c)| mapped_column(dialect, &input, c, cmap.get(&i)))
                .collect();
            Schema::new(dialect, columns)
        }
        QueryRep::Concat { from, .. } => get_schema(dialect, tables, from),
        QueryRep::Extend {
            col_id,
            col_expr,
            opts,
            from,
        } => {
            let input = get_schema(dialect, tables, from)?;
            let column_type = infer_extend_type(dialect, &input, col_expr, opts)?;
            let display_name = opts.display_name.clone().unwrap_or_else(|| col_id.clone());
            input.extend(col_id.clone(), ColumnMetadata::new(display_name, column_type))
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
            let left = get_schema(dialect, tables, lhs)?;
            let right = get_schema(dialect, tables, rhs)?;
            let mut columns: Vec<(String, ColumnMetadata)> = left
                .columns()
                .iter()
                .map(|c| {
                    let meta = left
                        .column_metadata(c)
                        .cloned()
                        .unwrap_or_else(|| placeholder_metadata(dialect, c));
                    (c.clone(), meta)
                })
                .collect();
            for c in right.columns() {
                if on.contains(c) || left.contains(c) {
                    continue;
                }
                let meta = right
                    .column_metadata(c)
                    .cloned()
                    .unwrap_or_else(|| placeholder_metadata(dialect, c));
                columns.push((c.clone(), meta));
            }
            Schema::new(dialect, columns)
        }
    }
}

fn mapped_column(
    dialect: Dialect,
    input: &Schema,
    col: &str,
    info: Option<&ColumnMapInfo>,
) -> (String, ColumnMetadata) {
    let meta = input
        .column_metadata(col)
        .cloned()
        .unwrap_or_else(|| placeholder_metadata(dialect, col));
    match info {
        None => (col.to_string(), meta),
        Some(info) => {
            let id = info.id.clone().unwrap_or_else(|| col.to_string());
            let meta = ColumnMetadata {
                display_name: info.display_name.clone().unwrap_or(meta.display_name),
                column_type: info.column_type.clone().unwrap_or(meta.column_type),
                stats: meta.stats,
            };
            (id, meta)
        }
    }
}

/// Result type of applying `agg` to a column of type `input`.
pub(crate) fn agg_result_type(dialect: Dialect, agg: AggFn, input: &ColumnType) -> ColumnType {
    let core = dialect.handler().core_types();
    match agg {
        AggFn::Count => core.integer.clone(),
        AggFn::NullStr => core.string.clone(),
        AggFn::Avg => core.real.clone(),
        AggFn::Min | AggFn::Max | AggFn::Sum | AggFn::Uniq | AggFn::Null => input.clone(),
    }
}

/// Type of an `extend` expression: explicit `opts.column_type` wins, then
/// inference by expression shape.
pub(crate) fn infer_extend_type(
    dialect: Dialect,
    input: &Schema,
    expr: &ValueExpr,
    opts: &ExtendOpts,
) -> Result<ColumnType> {
    if let Some(ct) = &opts.column_type {
        return Ok(ct.clone());
    }
    let core = dialect.handler().core_types();
    match expr {
        ValueExpr::ColRef { col } => input
            .column_type(col)
            .cloned()
            .ok_or_else(|| Error::TypeInference(format!("unknown column \"{col}\""))),
        ValueExpr::AsString { .. } => Ok(core.string.clone()),
        ValueExpr::ConstVal { val } => match val {
            Literal::Int(_) => Ok(core.integer.clone()),
            Literal::Float(_) => Ok(core.real.clone()),
            Literal::Bool(_) => Ok(core.boolean.clone()),
            Literal::String(_) | Literal::Null => Ok(core.string.clone()),
            Literal::List(_) => Err(Error::TypeInference(
                "list literal has no column type".to_string(),
            )),
        },
        ValueExpr::CastExpr { to, .. } => Ok(to.clone()),
        ValueExpr::WindowExpr { func } => Err(Error::TypeInference(format!(
            "window function {func} needs an explicit type"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, constant};

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

    #[test]
    fn schema_is_deterministic() {
        let tables = test_tables();
        let q = QueryRep::table("emp")
            .filter(FilterExpr::and().eq(col("dept"), constant("eng")))
            .group_by(["dept"], ["salary"])
            .sort(vec![SortKey::asc("dept")]);
        let a = get_schema(Dialect::SQLite, &tables, &q).unwrap();
        let b = get_schema(Dialect::SQLite, &tables, &q).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.columns(), &["dept".to_string(), "salary".to_string()]);
    }

    #[test]
    fn unknown_table_errors() {
        let tables = test_tables();
        let q = QueryRep::table("nope");
        assert!(matches!(
            get_schema(Dialect::SQLite, &tables, &q),
            Err(Error::UnknownTable(_))
        ));
    }

    #[test]
    fn group_by_agg_types() {
        let tables = test_tables();
        // Bare column id picks the type's default aggregate: sum for the
        // numeric salary, uniq for the text name.
        let q = QueryRep::table("emp").group_by(["dept"], ["salary", "name"]);
        let s = get_schema(Dialect::SQLite, &tables, &q).unwrap();
        assert_eq!(
            s.columns(),
            &["dept".to_string(), "salary".to_string(), "name".to_string()]
        );
        assert!(s.column_type("salary").unwrap().is_numeric);
        assert!(s.column_type("name").unwrap().is_string);

        // Explicit count wins regardless of type.
        let q = QueryRep::table("emp").group_by(["dept"], [(AggFn::Count, "name")]);
        let s = get_schema(Dialect::SQLite, &tables, &q).unwrap();
        assert!(s.column_type("name").unwrap().is_numeric);
    }

    #[test]
    fn map_columns_passthrough_and_rename() {
        let tables = test_tables();
        let mut cmap = HashMap::new();
        cmap.insert(
            "name".to_string(),
            ColumnMapInfo {
                id: Some("employee".to_string()),
                display_name: Some("Employee".to_string()),
                column_type: None,
            },
        );
        let q = QueryRep::table("emp").map_columns(cmap);
        let s = get_schema(Dialect::SQLite, &tables, &q).unwrap();
        assert_eq!(
            s.columns(),
            &[
                "employee".to_string(),
                "dept".to_string(),
                "salary".to_string()
            ]
        );
        assert_eq!(s.display_name("employee"), "Employee");
        assert!(s.column_type("employee").unwrap().is_string);
    }

    #[test]
    fn map_columns_by_index() {
        let tables = test_tables();
        let mut cmap = HashMap::new();
        cmap.insert(2, ColumnMapInfo::renamed("pay"));
        let q = QueryRep::table("emp").map_columns_by_index(cmap);
        let s = get_schema(Dialect::SQLite, &tables, &q).unwrap();
        assert_eq!(s.columns()[2], "pay");
    }

    #[test]
    fn extend_type_inference() {
        let tables = test_tables();
        let s = get_schema(
            Dialect::SQLite,
            &tables,
            &QueryRep::table("emp").extend("pay2", col("salary"), ExtendOpts::default()),
        )
        .unwrap();
        assert!(s.column_type("pay2").unwrap().is_numeric);

        let s = get_schema(
            Dialect::SQLite,
            &tables,
            &QueryRep::table("emp").extend("tag", constant("x"), ExtendOpts::default()),
        )
        .unwrap();
        assert!(s.column_type("tag").unwrap().is_string);

        let s = get_schema(
            Dialect::SQLite,
            &tables,
            &QueryRep::table("emp").extend(
                "label",
                col("salary").as_string(),
                ExtendOpts::default(),
            ),
        )
        .unwrap();
        assert!(s.column_type("label").unwrap().is_string);

        let err = get_schema(
            Dialect::SQLite,
            &tables,
            &QueryRep::table("emp").extend(
                "rn",
                ValueExpr::window(crate::expr::WindowFn::RowNumber),
                ExtendOpts::default(),
            ),
        );
        assert!(matches!(err, Err(Error::TypeInference(_))));
    }

    #[test]
    fn join_schema_favors_lhs() {
        let tables = test_tables();
        let q = QueryRep::table("emp").join(QueryRep::table("dept_info"), ["dept"]);
        let s = get_schema(Dialect::SQLite, &tables, &q).unwrap();
        assert_eq!(
            s.columns(),
            &[
                "name".to_string(),
                "dept".to_string(),
                "salary".to_string(),
                "head".to_string(),
                "budget".to_string()
            ]
        );
    }

    #[test]
    fn non_left_outer_join_rejected() {
        let tables = test_tables();
        let q = QueryRep::Join {
            lhs: Arc::new(QueryRep::table("emp")),
            rhs: Arc::new(QueryRep::table("dept_info")),
            on: vec!["dept".to_string()],
            join_type: JoinType::Inner,
        };
        assert!(matches!(
            get_schema(Dialect::SQLite, &tables, &q),
            Err(Error::UnsupportedJoinType(_))
        ));
    }

    #[test]
    fn leaf_deps_dedup() {
        let base = QueryRep::table("emp");
        let q = base.clone().concat(base.clone().filter(FilterExpr::and()));
        let deps = leaf_deps(&q);
        assert_eq!(deps, vec![LeafDep::Table("emp".to_string())]);

        let q2 = QueryRep::table("emp").join(QueryRep::sql("select 1 as x"), ["x"]);
        let deps = leaf_deps(&q2);
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[1], LeafDep::Sql("select 1 as x".to_string()));
    }
}
