use crate::{
    bridge::{Execution, SqlExecutor, Statement, blocking_runtime},
    config::{DbCreds, Driver},
    result::Result,
    sql_utils::SqlCommand,
    values::SqlValue,
};
use serde_json::Value;
use sqlx::{
    Column, Connection, MySql, Row, TypeInfo, ValueRef,
    mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow},
    query::Query,
};
use tokio::runtime::Runtime;

/// MySQL adapter: one sqlx connection driven by a private runtime
pub struct MySqlBridge {
    runtime: Runtime,
    conn: MySqlConnection,
}

impl MySqlBridge {
    pub fn connect(creds: &DbCreds) -> Result<Self> {
        let runtime = blocking_runtime()?;

        let mut options = MySqlConnectOptions::new()
            .host(&creds.host)
            .port(creds.port())
            .database(&creds.database);
        if let Some(user) = &creds.user {
            options = options.username(user);
        }
        if let Some(password) = &creds.password {
            options = options.password(password);
        }

        tracing::debug!(host = %creds.host, port = creds.port(), database = %creds.database, "connecting to MySQL");
        let conn = runtime.block_on(MySqlConnection::connect_with(&options))?;
        Ok(Self { runtime, conn })
    }

    pub fn close(self) -> Result<()> {
        let Self { runtime, conn } = self;
        runtime.block_on(conn.close())?;
        Ok(())
    }
}

impl SqlExecutor for MySqlBridge {
    fn driver(&self) -> Driver {
        Driver::MySql
    }

    fn execute(&mut self, statement: &Statement) -> Result<Execution> {
        let Self { runtime, conn } = self;
        runtime.block_on(execute_in_transaction(conn, statement))
    }
}

async fn execute_in_transaction(
    conn: &mut MySqlConnection,
    statement: &Statement,
) -> Result<Execution> {
    let mut tx = conn.begin().await?;
    let query = bind_params(sqlx::query(&statement.sql), &statement.params);

    let execution = if statement.command == SqlCommand::Select {
        let rows = query.fetch_all(&mut *tx).await?;
        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let rows = rows
            .iter()
            .map(row_to_values)
            .collect::<Result<Vec<_>>>()?;
        Execution {
            rows_affected: rows.len() as u64,
            columns,
            rows,
            last_insert_id: None,
        }
    } else {
        let result = query.execute(&mut *tx).await?;
        Execution {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_id() as i64).filter(|id| *id != 0),
            ..Execution::default()
        }
    };

    tx.commit().await?;
    Ok(execution)
}

fn bind_params<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Integer(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Blob(b) => query.bind(b.clone()),
        };
    }
    query
}

fn row_to_values(row: &MySqlRow) -> Result<Vec<Value>> {
    (0..row.columns().len())
        .map(|idx| mysql_value_to_json(row, idx))
        .collect()
}

/// Convert a MySQL column value to JSON based on the column's type name
pub fn mysql_value_to_json(row: &MySqlRow, idx: usize) -> Result<Value> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let type_name = row.columns()[idx].type_info().name().to_uppercase();
    let value = match type_name.as_str() {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(idx)?),
        "FLOAT" | "DOUBLE" => Value::from(row.try_get::<f64, _>(idx)?),
        "JSON" => row.try_get::<Value, _>(idx)?,
        "DATE" => Value::String(row.try_get::<chrono::NaiveDate, _>(idx)?.to_string()),
        "TIME" => Value::String(row.try_get::<chrono::NaiveTime, _>(idx)?.to_string()),
        "DATETIME" => Value::String(row.try_get::<chrono::NaiveDateTime, _>(idx)?.to_string()),
        "TIMESTAMP" => Value::String(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)?
                .to_rfc3339(),
        ),
        "YEAR" => Value::from(row.try_get_unchecked::<u16, _>(idx)?),
        "BIT" => Value::from(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
        name if name.contains("INT") && name.contains("UNSIGNED") => {
            Value::from(row.try_get::<u64, _>(idx)?)
        }
        name if name.contains("INT") => Value::from(row.try_get::<i64, _>(idx)?),
        name if name.contains("BLOB") || name.contains("BINARY") => {
            Value::from(row.try_get::<Vec<u8>, _>(idx)?)
        }
        // DECIMAL, ENUM, SET and text types all arrive as text
        _ => Value::String(
            row.try_get::<String, _>(idx)
                .or_else(|_| row.try_get_unchecked::<String, _>(idx))?,
        ),
    };
    Ok(value)
}
