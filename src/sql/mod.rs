//! SQL generation: lowering the operator tree to a SQL AST and printing
//! that AST as dialect text.

pub mod ast;
mod gen_expr;
mod gen_query;
mod printer;

pub use gen_query::{count_sql, gen_sql_query, query_to_sql, unpaged_query_to_sql};
pub use printer::{pp_sql_query, SqlPrinter};
