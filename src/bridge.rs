use crate::{result::Result, sql_utils::SqlCommand, values::SqlValue};

/// A statement ready for one driver: placeholders already translated
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub command: SqlCommand,
}

/// Raw outcome of executing a statement, before it is shaped for the caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// Trait for executing a single statement against a database backend.
///
/// Implementations run the statement inside a transaction and commit it before returning.
pub trait SqlExecutor {
    fn driver(&self) -> crate::config::Driver;

    fn execute(&mut self, statement: &Statement) -> Result<Execution>;
}

/// Current-thread runtime that drives the async clients behind the blocking API
#[cfg(any(feature = "postgres", feature = "mysql"))]
pub(crate) fn blocking_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
