use crate::schema::Schema;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while building, checking or generating queries.
///
/// All of these surface synchronously to the immediate caller; nothing is
/// retried inside the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown column \"{column}\" in subquery: {sql}")]
    UnknownColumn { column: String, sql: String },

    #[error("unsupported join type: {0}")]
    UnsupportedJoinType(String),

    #[error("cannot infer column type of extend expression: {0}")]
    TypeInference(String),

    #[error("non-constant operand for {op} operator")]
    NonConstantOperand { op: String },

    #[error("incompatible schemas: {reason}")]
    SchemaMismatch {
        reason: String,
        left: Box<Schema>,
        right: Box<Schema>,
    },

    #[error("duplicate column id \"{0}\" in schema")]
    DuplicateColumn(String),

    #[error("unknown tag \"{tag}\" while decoding {context}")]
    UnknownTag { tag: String, context: &'static str },

    #[error("malformed value while decoding {context}: {detail}")]
    Decode {
        context: &'static str,
        detail: String,
    },

    #[error("unknown dialect name: {0}")]
    UnknownDialect(String),

    #[error("path depth {depth} exceeds pivot column count {pivot_count}")]
    PathTooDeep { depth: usize, pivot_count: usize },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
