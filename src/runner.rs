use crate::{
    bridge::{Execution, SqlExecutor, Statement},
    config::{DbCreds, load_config},
    connection::DatabaseConnection,
    result::{BridgeError, Result},
    sql_utils::{
        SqlCommand, check_permissions, leading_command, render_sql, replace_none_with_null,
        translate_placeholders,
    },
    values::SqlValue,
};
use serde_json::Value;

/// Options accepted by [`run_sql`]
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Return rows as objects keyed by column name (true) or as arrays (false)
    pub as_dict: bool,
    /// Log level override; `None` announces INSERT/UPDATE/DELETE and keeps everything else quiet
    pub quiet: Option<bool>,
    /// Replace `None` literals with `NULL` when no params are given
    pub none_to_null: bool,
    /// INI profile to load credentials from
    pub profile: Option<String>,
    /// Explicit credentials; mutually exclusive with `profile`
    pub db_creds: Option<DbCreds>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            as_dict: true,
            quiet: None,
            none_to_null: true,
            profile: None,
            db_creds: None,
        }
    }
}

impl RunOptions {
    pub fn with_creds(creds: DbCreds) -> Self {
        Self {
            db_creds: Some(creds),
            ..Self::default()
        }
    }

    pub fn with_profile(profile: impl Into<String>) -> Self {
        Self {
            profile: Some(profile.into()),
            ..Self::default()
        }
    }

    pub fn as_tuples(mut self) -> Self {
        self.as_dict = false;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = Some(quiet);
        self
    }

    pub fn keep_none(mut self) -> Self {
        self.none_to_null = false;
        self
    }

    /// Credentials these options point at: explicit ones, or the (default) profile
    pub fn resolve_creds(&self) -> Result<DbCreds> {
        match (&self.profile, &self.db_creds) {
            (Some(_), Some(_)) => Err(BridgeError::ConflictingCredentials),
            (_, Some(creds)) => Ok(creds.clone()),
            (profile, None) => load_config(profile.as_deref()),
        }
    }
}

/// Result of [`run_sql`], shaped by the statement's leading command
#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutcome {
    /// SELECT: one object (or array, see [`RunOptions::as_dict`]) per row
    Rows(Vec<Value>),
    /// INSERT: the id of the inserted row when the driver reports one
    LastInsertId(Option<i64>),
    /// UPDATE/DELETE: number of rows affected
    RowsAffected(u64),
    /// Any other statement
    Empty,
}

impl SqlOutcome {
    pub fn rows(&self) -> &[Value] {
        match self {
            SqlOutcome::Rows(rows) => rows,
            _ => &[],
        }
    }

    pub fn into_rows(self) -> Vec<Value> {
        match self {
            SqlOutcome::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        match self {
            SqlOutcome::LastInsertId(id) => *id,
            _ => None,
        }
    }

    pub fn rows_affected(&self) -> Option<u64> {
        match self {
            SqlOutcome::RowsAffected(count) => Some(*count),
            _ => None,
        }
    }
}

/// Execute one SQL statement against the database selected by `opts`.
///
/// Placeholders are always written `%s`, whatever the driver. Without params the SQL runs
/// verbatim (after `None` → `NULL` replacement). CREATE/DROP, and UPDATE/DELETE without a
/// WHERE clause, are rejected before a connection is opened. A fresh connection is opened
/// for the call and closed before returning.
pub fn run_sql(sql: &str, params: Option<&[SqlValue]>, opts: &RunOptions) -> Result<SqlOutcome> {
    let creds = opts.resolve_creds()?;
    let (raw_sql, command) = prepare_sql(sql, params, opts)?;

    let mut conn = DatabaseConnection::open(&creds).inspect_err(|e| {
        tracing::error!(error = %e, driver = %creds.driver, database = %creds.database, "failed to connect");
    })?;
    let outcome = execute_prepared(&mut conn, raw_sql, command, params, opts);
    conn.close();
    outcome
}

/// Same as [`run_sql`], on a connection the caller already holds; credential options are ignored
pub fn run_sql_on<E>(
    conn: &mut E,
    sql: &str,
    params: Option<&[SqlValue]>,
    opts: &RunOptions,
) -> Result<SqlOutcome>
where
    E: SqlExecutor + ?Sized,
{
    let (raw_sql, command) = prepare_sql(sql, params, opts)?;
    execute_prepared(conn, raw_sql, command, params, opts)
}

fn prepare_sql(
    sql: &str,
    params: Option<&[SqlValue]>,
    opts: &RunOptions,
) -> Result<(String, SqlCommand)> {
    let mut raw_sql = sql.trim().to_string();
    if params.is_none() && opts.none_to_null {
        raw_sql = replace_none_with_null(&raw_sql);
    }

    let command = leading_command(&raw_sql);
    check_permissions(&raw_sql, &command).inspect_err(|e| {
        tracing::warn!(error = %e, "rejected SQL statement");
    })?;
    Ok((raw_sql, command))
}

fn execute_prepared<E>(
    conn: &mut E,
    raw_sql: String,
    command: SqlCommand,
    params: Option<&[SqlValue]>,
    opts: &RunOptions,
) -> Result<SqlOutcome>
where
    E: SqlExecutor + ?Sized,
{
    let (statement, final_sql) = match params {
        Some(params) => (
            Statement {
                sql: translate_placeholders(&raw_sql, conn.driver()),
                params: params.to_vec(),
                command,
            },
            render_sql(&raw_sql, params, conn.driver()),
        ),
        None => (
            Statement {
                sql: raw_sql.clone(),
                params: Vec::new(),
                command,
            },
            raw_sql,
        ),
    };

    let quiet = opts.quiet.unwrap_or(!statement.command.is_write());
    if quiet {
        tracing::debug!(sql = %final_sql, "running query");
    } else {
        tracing::info!(sql = %final_sql, "running query");
    }

    let execution = conn.execute(&statement).map_err(|e| {
        tracing::error!(error = %e, sql = %final_sql, "SQL execution failed");
        BridgeError::Execution {
            sql: final_sql.clone(),
            source: Box::new(e),
        }
    })?;

    Ok(shape_outcome(&statement.command, execution, opts.as_dict, quiet))
}

fn shape_outcome(command: &SqlCommand, execution: Execution, as_dict: bool, quiet: bool) -> SqlOutcome {
    match command {
        SqlCommand::Select => SqlOutcome::Rows(shape_rows(execution.columns, execution.rows, as_dict)),
        SqlCommand::Insert => {
            log_rows_affected(execution.rows_affected, quiet);
            // Drivers without a last-insert id report the first RETURNING column instead
            let id = execution.last_insert_id.or_else(|| {
                execution
                    .rows
                    .first()
                    .and_then(|row| row.first())
                    .and_then(Value::as_i64)
            });
            SqlOutcome::LastInsertId(id)
        }
        SqlCommand::Update | SqlCommand::Delete => {
            log_rows_affected(execution.rows_affected, quiet);
            SqlOutcome::RowsAffected(execution.rows_affected)
        }
        _ => SqlOutcome::Empty,
    }
}

fn log_rows_affected(rows_affected: u64, quiet: bool) {
    if quiet {
        tracing::debug!(rows_affected, "{rows_affected} rows affected.");
    } else {
        tracing::info!(rows_affected, "{rows_affected} rows affected.");
    }
}

fn shape_rows(columns: Vec<String>, rows: Vec<Vec<Value>>, as_dict: bool) -> Vec<Value> {
    rows.into_iter()
        .map(|row| {
            if as_dict {
                Value::Object(columns.iter().cloned().zip(row).collect())
            } else {
                Value::Array(row)
            }
        })
        .collect()
}
