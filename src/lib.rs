#[cfg(not(any(feature = "sqlite", feature = "postgres", feature = "mysql")))]
compile_error!("enable at least one of the `sqlite`, `postgres` or `mysql` features");

pub mod bridge;
#[cfg(feature = "mysql")]
pub mod bridge_mysql;
#[cfg(feature = "postgres")]
pub mod bridge_postgresql;
#[cfg(feature = "sqlite")]
pub mod bridge_sqlite;
pub mod config;
pub mod connection;
pub mod lookup;
pub mod result;
pub mod runner;
pub mod sql_utils;
pub mod values;

// Re-export types for convenience
pub use bridge::{Execution, SqlExecutor, Statement};
pub use config::{DbCreds, Driver, load_config, load_config_file, load_config_with};
pub use connection::DatabaseConnection;
pub use lookup::{
    Choice, ColumnLookup, ColumnValues, RowChooser, TerminalChooser, get_column_values,
    get_column_values_regexp,
};
pub use result::{BridgeError, Result};
pub use runner::{RunOptions, SqlOutcome, run_sql, run_sql_on};
pub use sql_utils::SqlCommand;
pub use values::SqlValue;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export third-party types used in the public API to provide fallback for dependency conflicts
pub use serde_json::Value as JsonValue;

#[cfg(feature = "sqlite")]
pub use rusqlite::Connection as SqliteConnection;
