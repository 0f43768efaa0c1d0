#[cfg(feature = "mysql")]
use crate::bridge_mysql::MySqlBridge;
#[cfg(feature = "postgres")]
use crate::bridge_postgresql::PostgresBridge;
#[cfg(feature = "sqlite")]
use crate::bridge_sqlite::SqliteBridge;
use crate::{
    bridge::{Execution, SqlExecutor, Statement},
    config::{DbCreds, Driver},
    result::{BridgeError, Result},
};

/// Database connection enum that holds the different database backends
pub enum DatabaseConnection {
    /// SQLite connection
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteBridge),
    /// PostgreSQL connection
    #[cfg(feature = "postgres")]
    Postgres(PostgresBridge),
    /// MySQL connection
    #[cfg(feature = "mysql")]
    MySql(MySqlBridge),
}

impl DatabaseConnection {
    /// Open a connection with the bridge matching `creds.driver`
    pub fn open(creds: &DbCreds) -> Result<Self> {
        match creds.driver {
            #[cfg(feature = "sqlite")]
            Driver::Sqlite => Ok(DatabaseConnection::Sqlite(SqliteBridge::open(creds)?)),
            #[cfg(feature = "postgres")]
            Driver::Postgres => Ok(DatabaseConnection::Postgres(PostgresBridge::connect(
                creds,
            )?)),
            #[cfg(feature = "mysql")]
            Driver::MySql => Ok(DatabaseConnection::MySql(MySqlBridge::connect(creds)?)),
            #[allow(unreachable_patterns)]
            other => Err(BridgeError::DriverNotEnabled(other.to_string())),
        }
    }

    /// Close the connection; failures are logged and swallowed
    pub fn close(self) {
        let result: Result<()> = match self {
            #[cfg(feature = "sqlite")]
            DatabaseConnection::Sqlite(bridge) => bridge.close(),
            #[cfg(feature = "postgres")]
            DatabaseConnection::Postgres(bridge) => {
                drop(bridge);
                Ok(())
            }
            #[cfg(feature = "mysql")]
            DatabaseConnection::MySql(bridge) => bridge.close(),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to close database connection");
        }
    }
}

impl SqlExecutor for DatabaseConnection {
    fn driver(&self) -> Driver {
        match self {
            #[cfg(feature = "sqlite")]
            DatabaseConnection::Sqlite(bridge) => bridge.driver(),
            #[cfg(feature = "postgres")]
            DatabaseConnection::Postgres(bridge) => bridge.driver(),
            #[cfg(feature = "mysql")]
            DatabaseConnection::MySql(bridge) => bridge.driver(),
        }
    }

    fn execute(&mut self, statement: &Statement) -> Result<Execution> {
        match self {
            #[cfg(feature = "sqlite")]
            DatabaseConnection::Sqlite(bridge) => bridge.execute(statement),
            #[cfg(feature = "postgres")]
            DatabaseConnection::Postgres(bridge) => bridge.execute(statement),
            #[cfg(feature = "mysql")]
            DatabaseConnection::MySql(bridge) => bridge.execute(statement),
        }
    }
}
