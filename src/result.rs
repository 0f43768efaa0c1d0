use thiserror::Error;

/// Main error type for the db-bridge library
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
    #[error("Config file error: {0}")]
    Ini(#[from] ini::Error),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),
    #[error("Driver '{0}' is not enabled in this build")]
    DriverNotEnabled(String),
    #[error("Specify only one of db_creds or profile, not both")]
    ConflictingCredentials,
    #[error("SQL permission error: {0}")]
    Permission(String),
    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("At least one column must be requested")]
    NoColumns,
    #[error("Parameter type mismatch: expected {expected}, got {got}")]
    ParameterTypeMismatch { expected: String, got: String },
    #[error("Invalid choice {index}: only {available} candidates")]
    InvalidChoice { index: usize, available: usize },
    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    MySql(#[from] sqlx::Error),
    #[error("Failed to execute SQL: {source}")]
    Execution {
        sql: String,
        #[source]
        source: Box<BridgeError>,
    },
}

impl BridgeError {
    pub fn new_config(msg: impl Into<String>) -> Self {
        BridgeError::Config(msg.into())
    }

    pub fn new_parameter_type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        BridgeError::ParameterTypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// True for guardrail rejections, whether raised directly or wrapped
    pub fn is_permission(&self) -> bool {
        match self {
            BridgeError::Permission(_) => true,
            BridgeError::Execution { source, .. } => source.is_permission(),
            _ => false,
        }
    }
}

/// Type alias for Results using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
