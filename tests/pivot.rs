//! End-to-end pivot tree tests against an in-memory SQLite database.

use rusqlite::types::ValueRef;

use reltab::aggtree::{vpivot, PivotOptions, DEPTH_COL, IS_ROOT_COL, PIVOT_COL, RECORD_COUNT_COL};
use reltab::connection::resolve_leaf_schemas;
use reltab::sql;
use reltab::{
    DbConnection, Dialect, DialectHandler, Error, Literal, PathTree, QueryRep, QueryResult,
    Result, Schema, SchemaCache, SortKey,
};

struct SqliteTestDb {
    conn: rusqlite::Connection,
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Connection(e.to_string())
}

impl DbConnection for SqliteTestDb {
    fn dialect(&self) -> Dialect {
        Dialect::SQLite
    }

    fn run_sql_query(&mut self, sql: &str) -> Result<QueryResult> {
        let mut stmt = self.conn.prepare(sql).map_err(db_err)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let ncols = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..ncols)
                    .map(|i| {
                        Ok(match row.get_ref(i)? {
                            ValueRef::Null => Literal::Null,
                            ValueRef::Integer(n) => Literal::Int(n),
                            ValueRef::Real(f) => Literal::Float(f),
                            ValueRef::Text(t) => {
                                Literal::String(String::from_utf8_lossy(t).to_string())
                            }
                            ValueRef::Blob(_) => Literal::Null,
                        })
                    })
                    .collect()
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<Vec<Literal>>>>()
            .map_err(db_err)?;
        Ok(QueryResult { columns, rows })
    }

    fn get_table_schema(&mut self, table_name: &str) -> Result<Schema> {
        self.get_sql_query_schema(&format!("SELECT * FROM \"{table_name}\""))
    }

    fn get_sql_query_schema(&mut self, sql: &str) -> Result<Schema> {
        let probe = format!("SELECT * FROM ({sql}) WHERE 1=0");
        let stmt = self.conn.prepare(&probe).map_err(db_err)?;
        let h = Dialect::SQLite.handler();
        let cols = stmt
            .columns()
            .iter()
            .map(|c| {
                // Computed columns carry no decltype; the only ones the
                // probe sees are integer-valued.
                let decl = c.decl_type().unwrap_or("integer");
                (
                    c.name().to_string(),
                    reltab::ColumnMetadata::new(c.name(), h.column_type(decl)),
                )
            })
            .collect();
        Schema::new(Dialect::SQLite, cols)
    }
}

fn fixture() -> SqliteTestDb {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE employees (
            job_family TEXT,
            title TEXT,
            name TEXT,
            tcoe INTEGER
        );
        INSERT INTO employees VALUES
            ('Executive', 'General Manager', 'Grace', 300000),
            ('Engineering', 'Sr Engineer', 'Alice', 180000),
            ('Engineering', 'Sr Engineer', 'Bob', 170000),
            ('Engineering', 'Engineer', 'Carol', 140000),
            ('Engineering', 'Engineer', 'Dan', 130000),
            ('Engineering', 'Engineer', 'Eve', 120000),
            ('Operations', 'Manager', 'Frank', 160000),
            ('Operations', 'Technician', 'Heidi', 100000),
            ('Operations', 'Technician', 'Ivan', 95000),
            ('Operations', 'Technician', 'Judy', 90000);
        "#,
    )
    .unwrap();
    SqliteTestDb { conn }
}

fn pivot_model(
    db: &mut SqliteTestDb,
    sort_key: Vec<SortKey>,
) -> reltab::aggtree::PivotTreeModel {
    let mut cache = SchemaCache::new();
    vpivot(
        db,
        &mut cache,
        QueryRep::table("employees"),
        vec!["job_family".to_string(), "title".to_string()],
        PivotOptions {
            pivot_leaf_column: Some("name".to_string()),
            show_root: true,
            sort_key,
        },
    )
    .unwrap()
}

fn run_tree(db: &mut SqliteTestDb, open: &PathTree, sort_key: Vec<SortKey>) -> QueryResult {
    let model = pivot_model(db, sort_key);
    let sql = model.tree_sql(open).unwrap();
    db.run_sql_query(&sql).unwrap()
}

fn int(res: &QueryResult, row: usize, col: &str) -> i64 {
    match res.value(row, col) {
        Some(Literal::Int(n)) => *n,
        other => panic!("expected integer at row {row} col {col}, got {other:?}"),
    }
}

fn text(res: &QueryResult, row: usize, col: &str) -> String {
    match res.value(row, col) {
        Some(Literal::String(s)) => s.clone(),
        other => panic!("expected text at row {row} col {col}, got {other:?}"),
    }
}

#[test]
fn collapsed_tree_has_root_and_top_level_groups() {
    let mut db = fixture();
    let res = run_tree(&mut db, &PathTree::new(), vec![]);
    assert_eq!(res.len(), 4);

    // Root sorts first: NULL path columns come before any value.
    assert_eq!(int(&res, 0, IS_ROOT_COL), 1);
    assert_eq!(int(&res, 0, DEPTH_COL), 0);
    assert_eq!(int(&res, 0, RECORD_COUNT_COL), 10);
    assert_eq!(int(&res, 0, "tcoe"), 1_485_000);

    // Groups in path order.
    let pivots: Vec<String> = (1..4).map(|i| text(&res, i, PIVOT_COL)).collect();
    assert_eq!(pivots, ["Engineering", "Executive", "Operations"]);
    assert_eq!(int(&res, 1, RECORD_COUNT_COL), 5);
    assert_eq!(int(&res, 1, "tcoe"), 740_000);
    assert_eq!(int(&res, 3, RECORD_COUNT_COL), 4);
    assert_eq!(int(&res, 3, "tcoe"), 445_000);
    for row in 1..4 {
        assert_eq!(int(&res, row, DEPTH_COL), 1);
        assert_eq!(int(&res, row, IS_ROOT_COL), 0);
    }
}

#[test]
fn uniq_aggregate_keeps_unanimous_values_only() {
    let mut db = fixture();
    let res = run_tree(&mut db, &PathTree::new(), vec![]);
    // Executive has one row; its title and name survive aggregation.
    assert_eq!(text(&res, 2, "title"), "General Manager");
    assert_eq!(text(&res, 2, "name"), "Grace");
    // Engineering spans several titles, so both collapse to NULL.
    assert_eq!(res.value(1, "title"), Some(&Literal::Null));
    assert_eq!(res.value(1, "name"), Some(&Literal::Null));
}

#[test]
fn expanding_a_node_inserts_its_children_below_it() {
    let mut db = fixture();
    let open = PathTree::new().open(&["Engineering".to_string()]);
    let res = run_tree(&mut db, &open, vec![]);
    assert_eq!(res.len(), 6);

    let pivots: Vec<String> = (0..6).map(|i| text(&res, i, PIVOT_COL)).collect();
    assert_eq!(
        pivots,
        ["", "Engineering", "Engineer", "Sr Engineer", "Executive", "Operations"]
    );
    let depths: Vec<i64> = (0..6).map(|i| int(&res, i, DEPTH_COL)).collect();
    assert_eq!(depths, [0, 1, 2, 2, 1, 1]);
    assert_eq!(int(&res, 2, RECORD_COUNT_COL), 3);
    assert_eq!(int(&res, 2, "tcoe"), 390_000);
}

#[test]
fn leaf_expansion_shows_detail_rows() {
    let mut db = fixture();
    let open =
        PathTree::new().open(&["Engineering".to_string(), "Engineer".to_string()]);
    let res = run_tree(&mut db, &open, vec![]);
    assert_eq!(res.len(), 9);

    // Parent group row directly above its detail rows.
    assert_eq!(text(&res, 2, PIVOT_COL), "Engineer");
    assert_eq!(int(&res, 2, DEPTH_COL), 2);
    let mut details: Vec<String> = (3..6).map(|i| text(&res, i, PIVOT_COL)).collect();
    details.sort();
    assert_eq!(details, ["Carol", "Dan", "Eve"]);
    for row in 3..6 {
        assert_eq!(int(&res, row, DEPTH_COL), 3);
        assert_eq!(text(&res, row, "_path0"), "Engineering");
        assert_eq!(text(&res, row, "_path1"), "Engineer");
    }
    assert_eq!(text(&res, 6, PIVOT_COL), "Sr Engineer");
}

#[test]
fn aggregate_sort_orders_every_subtree() {
    let mut db = fixture();
    let open = PathTree::new().open(&["Engineering".to_string()]);
    let res = run_tree(&mut db, &open, vec![SortKey::desc("tcoe")]);
    assert_eq!(res.len(), 6);

    let pivots: Vec<String> = (0..6).map(|i| text(&res, i, PIVOT_COL)).collect();
    // Root first, then groups by total cost descending; the expanded
    // node keeps its children right below it, also sorted.
    assert_eq!(
        pivots,
        ["", "Engineering", "Engineer", "Sr Engineer", "Operations", "Executive"]
    );
}

#[test]
fn aggregate_sort_orders_leaf_detail_rows() {
    let mut db = fixture();
    let open =
        PathTree::new().open(&["Engineering".to_string(), "Engineer".to_string()]);
    let res = run_tree(&mut db, &open, vec![SortKey::desc("tcoe")]);
    assert_eq!(res.len(), 9);

    // Detail rows ranked by their own compensation, descending, right
    // below their group row.
    let pivots: Vec<String> = (0..9).map(|i| text(&res, i, PIVOT_COL)).collect();
    assert_eq!(
        pivots,
        [
            "",
            "Engineering",
            "Engineer",
            "Carol",
            "Dan",
            "Eve",
            "Sr Engineer",
            "Operations",
            "Executive"
        ]
    );
    // One sort level per tree depth, including the detail level.
    for col in ["_sortVal_0", "_sortVal_1", "_sortVal_2"] {
        assert!(res.columns.iter().any(|c| c == col), "missing {col}");
    }
}

#[test]
fn opening_paths_absent_from_the_data_never_errors() {
    let mut db = fixture();
    let open = PathTree::new().open(&["Marketing".to_string()]);
    let res = run_tree(&mut db, &open, vec![]);
    // Root plus the three real groups; the empty arm contributes nothing.
    assert_eq!(res.len(), 4);

    let open =
        PathTree::new().open(&["Engineering".to_string(), "Nonexistent".to_string()]);
    let res = run_tree(&mut db, &open, vec![]);
    assert_eq!(res.len(), 6);
}

#[test]
fn open_paths_deeper_than_the_pivot_list_are_ignored() {
    let mut db = fixture();
    let open = PathTree::new().open(&[
        "Engineering".to_string(),
        "Engineer".to_string(),
        "Carol".to_string(),
    ]);
    let res = run_tree(&mut db, &open, vec![]);
    assert_eq!(res.len(), 9);
}

#[test]
fn probed_schema_matches_static_propagation() {
    let mut db = fixture();
    let mut cache = SchemaCache::new();
    let q = QueryRep::table("employees").group_by(["job_family"], ["tcoe"]);
    let schema =
        reltab::connection::get_schema_for_query(&mut db, &mut cache, &q).unwrap();
    assert_eq!(schema.columns(), &["job_family".to_string(), "tcoe".to_string()]);

    let tables = resolve_leaf_schemas(&mut db, &mut cache, &q).unwrap();
    let sql = sql::unpaged_query_to_sql(Dialect::SQLite, &tables, &q).unwrap();
    let res = db.run_sql_query(&sql).unwrap();
    assert_eq!(res.columns, schema.columns());
    assert_eq!(res.len(), 3);
}

#[test]
fn pagination_and_count() {
    let mut db = fixture();
    let mut cache = SchemaCache::new();
    let q = QueryRep::table("employees").sort(vec![SortKey::desc("tcoe")]);
    let tables = resolve_leaf_schemas(&mut db, &mut cache, &q).unwrap();

    let paged =
        sql::query_to_sql(Dialect::SQLite, &tables, &q, Some(2), Some(3)).unwrap();
    let res = db.run_sql_query(&paged).unwrap();
    assert_eq!(res.len(), 3);
    // Third-highest total compensation.
    assert_eq!(int(&res, 0, "tcoe"), 170_000);

    let count = sql::count_sql(Dialect::SQLite, &tables, &q).unwrap();
    let res = db.run_sql_query(&count).unwrap();
    assert_eq!(res.rows[0][0], Literal::Int(10));
}

#[test]
fn raw_sql_leaf_feeds_a_pivot() {
    let mut db = fixture();
    let mut cache = SchemaCache::new();
    let base = QueryRep::sql("SELECT job_family, tcoe FROM employees WHERE tcoe >= 150000");
    let model = vpivot(
        &mut db,
        &mut cache,
        base,
        vec!["job_family".to_string()],
        PivotOptions::with_root(),
    )
    .unwrap();
    let sql = model.tree_sql(&PathTree::new()).unwrap();
    let res = db.run_sql_query(&sql).unwrap();
    // Root plus Engineering, Executive and Operations groups.
    assert_eq!(res.len(), 4);
    assert_eq!(int(&res, 0, RECORD_COUNT_COL), 4);
    assert_eq!(int(&res, 1, RECORD_COUNT_COL), 2);
}

#[test]
fn round_tripped_query_generates_identical_sql() {
    let mut db = fixture();
    let mut cache = SchemaCache::new();
    let q = QueryRep::table("employees")
        .filter(reltab::FilterExpr::and().ge(
            reltab::expr::col("tcoe"),
            reltab::expr::constant(150_000i64),
        ))
        .group_by(["job_family"], ["tcoe"]);
    let tables = resolve_leaf_schemas(&mut db, &mut cache, &q).unwrap();

    let wire = reltab::json::query_to_json(&q).unwrap();
    let decoded = reltab::json::query_from_json(Dialect::SQLite, &wire).unwrap();
    similar_asserts::assert_eq!(
        sql::unpaged_query_to_sql(Dialect::SQLite, &tables, &q).unwrap(),
        sql::unpaged_query_to_sql(Dialect::SQLite, &tables, &decoded).unwrap()
    );
}
