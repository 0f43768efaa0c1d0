use crate::{
    bridge::{Execution, SqlExecutor, Statement},
    config::{DbCreds, Driver},
    result::{BridgeError, Result},
    values::SqlValue,
};
use regex::Regex;
use rusqlite::{
    Connection,
    functions::FunctionFlags,
    types::{ToSqlOutput, ValueRef},
};
use std::path::Path;

// SQLite has no boolean type; booleans are stored as integers
impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Bool(b) => ToSqlOutput::Borrowed(ValueRef::Integer(*b as i64)),
            SqlValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            SqlValue::Float(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// SQLite adapter owning one rusqlite connection
pub struct SqliteBridge {
    conn: Connection,
}

impl SqliteBridge {
    /// Open (and create) the database file, creating missing parent directories
    pub fn open(creds: &DbCreds) -> Result<Self> {
        let path = Path::new(&creds.database);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        tracing::debug!(path = %path.display(), "opening SQLite database");
        Self::from_connection(Connection::open(path)?)
    }

    /// Wrap an existing connection, e.g. an in-memory database
    pub fn from_connection(conn: Connection) -> Result<Self> {
        register_regexp(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| BridgeError::Sqlite(e))
    }
}

impl SqlExecutor for SqliteBridge {
    fn driver(&self) -> Driver {
        Driver::Sqlite
    }

    fn execute(&mut self, statement: &Statement) -> Result<Execution> {
        let tx = self.conn.transaction()?;
        let execution = execute_in_transaction(&tx, statement)?;
        tx.commit()?;
        Ok(execution)
    }
}

fn execute_in_transaction(tx: &rusqlite::Transaction, statement: &Statement) -> Result<Execution> {
    let mut stmt = tx.prepare(&statement.sql)?;
    let params = rusqlite::params_from_iter(statement.params.iter());

    if stmt.column_count() == 0 {
        let changed = stmt.execute(params)?;
        return Ok(Execution {
            rows_affected: changed as u64,
            last_insert_id: last_insert_id(tx),
            ..Execution::default()
        });
    }

    // Statements producing rows: SELECT, PRAGMA, or writes with RETURNING
    let columns: Vec<String> = stmt
        .column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();
    let column_count = columns.len();

    let rows = stmt
        .query_map(params, |row| {
            (0..column_count)
                .map(|idx| row.get_ref(idx).map(value_ref_to_json))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Execution {
        rows_affected: rows.len() as u64,
        columns,
        rows,
        last_insert_id: last_insert_id(tx),
    })
}

fn last_insert_id(conn: &Connection) -> Option<i64> {
    Some(conn.last_insert_rowid()).filter(|id| *id != 0)
}

/// Convert a SQLite value to JSON; non-finite reals become null and blobs become byte arrays
pub fn value_ref_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(r) => serde_json::Value::from(r),
        ValueRef::Text(s) => serde_json::Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => serde_json::Value::Array(
            b.iter()
                .map(|&byte| serde_json::Value::Number(byte.into()))
                .collect(),
        ),
        ValueRef::Null => serde_json::Value::Null,
    }
}

fn value_ref_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(r) => Some(r.to_string()),
        ValueRef::Text(s) | ValueRef::Blob(s) => Some(String::from_utf8_lossy(s).to_string()),
    }
}

/// `X REGEXP Y` in SQLite calls `regexp(Y, X)`; NULL on either side yields NULL
fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let Some(text) = value_ref_text(ctx.get_raw(1)) else {
                return Ok(None);
            };
            if matches!(ctx.get_raw(0), ValueRef::Null) {
                return Ok(None);
            }
            // Compiled once per statement; SQLite keeps it while the pattern argument is constant
            let regex = ctx.get_or_create_aux(0, |raw| -> std::result::Result<Regex, regex::Error> {
                Regex::new(&value_ref_text(raw).unwrap_or_default())
            })?;
            Ok(Some(regex.is_match(&text)))
        },
    )?;
    Ok(())
}
