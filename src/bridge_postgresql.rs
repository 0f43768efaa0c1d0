use crate::{
    bridge::{Execution, SqlExecutor, Statement, blocking_runtime},
    config::{DbCreds, Driver},
    result::{BridgeError, Result},
    values::SqlValue,
};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::error::Error;
use std::fmt;
use tokio::runtime::Runtime;
use tokio_postgres::{
    Client, NoTls,
    types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked},
};
use uuid::Uuid;

// PostgreSQL type OIDs for all column types
const POSTGRES_TYPE_OID_BOOL: u32 = 16;
const POSTGRES_TYPE_OID_BYTEA: u32 = 17;
const POSTGRES_TYPE_OID_NAME: u32 = 19;
const POSTGRES_TYPE_OID_INT8: u32 = 20;
const POSTGRES_TYPE_OID_INT2: u32 = 21;
const POSTGRES_TYPE_OID_INT4: u32 = 23;
const POSTGRES_TYPE_OID_TEXT: u32 = 25;
const POSTGRES_TYPE_OID_JSON: u32 = 114;
const POSTGRES_TYPE_OID_FLOAT4: u32 = 700;
const POSTGRES_TYPE_OID_FLOAT8: u32 = 701;
const POSTGRES_TYPE_OID_UNKNOWN: u32 = 705;
const POSTGRES_TYPE_OID_BPCHAR: u32 = 1042;
const POSTGRES_TYPE_OID_VARCHAR: u32 = 1043;
const POSTGRES_TYPE_OID_DATE: u32 = 1082;
const POSTGRES_TYPE_OID_TIME: u32 = 1083;
const POSTGRES_TYPE_OID_TIMESTAMP: u32 = 1114;
const POSTGRES_TYPE_OID_TIMESTAMPTZ: u32 = 1184;
const POSTGRES_TYPE_OID_NUMERIC: u32 = 1700;
const POSTGRES_TYPE_OID_UUID: u32 = 2950;
const POSTGRES_TYPE_OID_JSONB: u32 = 3802;

type PostgresParam = Box<dyn ToSql + Sync>;
type WireError = Box<dyn Error + Sync + Send>;

/// PostgreSQL adapter: one tokio-postgres client driven by a private runtime
pub struct PostgresBridge {
    runtime: Runtime,
    client: Client,
}

impl PostgresBridge {
    pub fn connect(creds: &DbCreds) -> Result<Self> {
        let runtime = blocking_runtime()?;

        let mut config = tokio_postgres::Config::new();
        config
            .host(creds.host.as_str())
            .port(creds.port())
            .dbname(creds.database.as_str());
        if let Some(user) = &creds.user {
            config.user(user.as_str());
        }
        if let Some(password) = &creds.password {
            config.password(password.as_str());
        }

        tracing::debug!(host = %creds.host, port = creds.port(), database = %creds.database, "connecting to PostgreSQL");
        let client = runtime.block_on(async {
            let (client, connection) = config.connect(NoTls).await?;

            // The connection task only makes progress while the runtime is driven by block_on
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!(error = %e, "PostgreSQL connection error");
                }
            });

            Ok::<_, BridgeError>(client)
        })?;

        Ok(Self { runtime, client })
    }
}

impl SqlExecutor for PostgresBridge {
    fn driver(&self) -> Driver {
        Driver::Postgres
    }

    fn execute(&mut self, statement: &Statement) -> Result<Execution> {
        let Self { runtime, client } = self;
        runtime.block_on(execute_in_transaction(client, statement))
    }
}

async fn execute_in_transaction(client: &mut Client, statement: &Statement) -> Result<Execution> {
    let transaction = client.transaction().await?;
    let prepared = transaction.prepare(&statement.sql).await?;

    let params = bind_params(&statement.params, prepared.params())?;
    let param_refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();

    let execution = if prepared.columns().is_empty() {
        let rows_affected = transaction.execute(&prepared, &param_refs).await?;
        Execution {
            rows_affected,
            ..Execution::default()
        }
    } else {
        let columns = prepared
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect();
        let rows = transaction.query(&prepared, &param_refs).await?;
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
    };

    transaction.commit().await?;
    Ok(execution)
}

/// Convert every parameter to the type the server inferred for its placeholder
fn bind_params(values: &[SqlValue], types: &[Type]) -> Result<Vec<PostgresParam>> {
    if values.len() != types.len() {
        return Err(BridgeError::new_parameter_type_mismatch(
            format!("{} parameters", types.len()),
            format!("{} parameters", values.len()),
        ));
    }

    values
        .iter()
        .zip(types)
        .map(|(value, ty)| sql_value_to_postgresql_tosql(value, ty))
        .collect()
}

/// NULL stays NULL for any target type; other values go through `convert`
fn nullable<T>(value: &SqlValue, convert: impl Fn(&SqlValue) -> Option<T>) -> Option<Option<T>> {
    if value.is_null() {
        Some(None)
    } else {
        convert(value).map(Some)
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// `YYYY-MM-DD HH:MM:SS[.f]`, with `T` or a space as separator; a bare date means midnight
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// RFC 3339 or `YYYY-MM-DD HH:MM:SS+HH[:MM]`; without an offset the value is taken as UTC
fn parse_timestamptz(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_timestamp(s).map(|naive| naive.and_utc()))
}

pub fn sql_value_to_postgresql_tosql(value: &SqlValue, ty: &Type) -> Result<PostgresParam> {
    let mismatch = || BridgeError::new_parameter_type_mismatch(ty.name(), value.type_name());
    let text = |v: &SqlValue| v.as_text();

    let param: PostgresParam = match ty.oid() {
        POSTGRES_TYPE_OID_BOOL => Box::new(nullable(value, SqlValue::as_bool).ok_or_else(mismatch)?),
        POSTGRES_TYPE_OID_INT2 => Box::new(
            nullable(value, |v| v.as_i64().and_then(|i| i16::try_from(i).ok()))
                .ok_or_else(mismatch)?,
        ),
        POSTGRES_TYPE_OID_INT4 => Box::new(
            nullable(value, |v| v.as_i64().and_then(|i| i32::try_from(i).ok()))
                .ok_or_else(mismatch)?,
        ),
        POSTGRES_TYPE_OID_INT8 => Box::new(nullable(value, SqlValue::as_i64).ok_or_else(mismatch)?),
        POSTGRES_TYPE_OID_FLOAT4 => Box::new(
            nullable(value, |v| v.as_f64().map(|f| f as f32)).ok_or_else(mismatch)?,
        ),
        POSTGRES_TYPE_OID_FLOAT8 => Box::new(nullable(value, SqlValue::as_f64).ok_or_else(mismatch)?),
        POSTGRES_TYPE_OID_NUMERIC => Box::new(
            nullable(value, |v| match v {
                SqlValue::Integer(_) | SqlValue::Float(_) | SqlValue::Text(_) => {
                    text(v).and_then(|s| PgNumeric::parse(&s))
                }
                _ => None,
            })
            .ok_or_else(mismatch)?,
        ),
        POSTGRES_TYPE_OID_DATE => Box::new(
            nullable(value, |v| text(v).and_then(|s| parse_date(&s))).ok_or_else(mismatch)?,
        ),
        POSTGRES_TYPE_OID_TIME => Box::new(
            nullable(value, |v| text(v).and_then(|s| parse_time(&s))).ok_or_else(mismatch)?,
        ),
        POSTGRES_TYPE_OID_TIMESTAMP => Box::new(
            nullable(value, |v| text(v).and_then(|s| parse_timestamp(&s))).ok_or_else(mismatch)?,
        ),
        POSTGRES_TYPE_OID_TIMESTAMPTZ => Box::new(
            nullable(value, |v| text(v).and_then(|s| parse_timestamptz(&s)))
                .ok_or_else(mismatch)?,
        ),
        POSTGRES_TYPE_OID_UUID => Box::new(
            nullable(value, |v| match v {
                SqlValue::Blob(b) => Uuid::from_slice(b).ok(),
                other => text(other).and_then(|s| Uuid::parse_str(s.trim()).ok()),
            })
            .ok_or_else(mismatch)?,
        ),
        POSTGRES_TYPE_OID_BYTEA => Box::new(
            nullable(value, |v| match v {
                SqlValue::Blob(b) => Some(b.clone()),
                SqlValue::Text(s) => Some(s.as_bytes().to_vec()),
                _ => None,
            })
            .ok_or_else(mismatch)?,
        ),
        POSTGRES_TYPE_OID_JSON | POSTGRES_TYPE_OID_JSONB => Box::new(
            nullable(value, |v| match v {
                SqlValue::Text(s) => Some(
                    serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.clone())),
                ),
                other => Some(other.to_json()),
            })
            .ok_or_else(mismatch)?,
        ),
        _ if <String as ToSql>::accepts(ty) => {
            Box::new(nullable(value, SqlValue::as_text).ok_or_else(mismatch)?)
        }
        // tokio-postgres refuses to send text for anything else
        _ => return Err(mismatch()),
    };
    Ok(param)
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// NUMERIC in the server's binary layout: base-10000 digits, the weight of the first digit,
/// a sign word and the display scale
#[derive(Debug, Clone, PartialEq)]
struct PgNumeric {
    sign: u16,
    weight: i16,
    dscale: u16,
    digits: Vec<i16>,
}

impl PgNumeric {
    /// Plain decimal notation (`-12.50`, `+3`, `.5`) or `NaN`
    fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("nan") {
            return Some(Self {
                sign: NUMERIC_NAN,
                weight: 0,
                dscale: 0,
                digits: Vec::new(),
            });
        }

        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if (int_part.is_empty() && frac_part.is_empty())
            || !int_part
                .bytes()
                .chain(frac_part.bytes())
                .all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let dscale = u16::try_from(frac_part.len()).ok()?;
        let int_part = int_part.trim_start_matches('0');
        let int_groups = int_part.len().div_ceil(4);
        let frac_groups = frac_part.len().div_ceil(4);
        let int_padded = format!("{int_part:0>width$}", width = int_groups * 4);
        let frac_padded = format!("{frac_part:0<width$}", width = frac_groups * 4);

        let mut digits: Vec<i16> = int_padded
            .as_bytes()
            .chunks(4)
            .chain(frac_padded.as_bytes().chunks(4))
            .map(|group| {
                group
                    .iter()
                    .fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
            })
            .collect();

        let leading_zeros = digits.iter().take_while(|d| **d == 0).count();
        digits.drain(..leading_zeros);
        while digits.last() == Some(&0) {
            digits.pop();
        }
        let weight = if digits.is_empty() {
            0
        } else {
            i16::try_from(int_groups).ok()? - 1 - i16::try_from(leading_zeros).ok()?
        };
        let sign = if negative && !digits.is_empty() {
            NUMERIC_NEG
        } else {
            NUMERIC_POS
        };

        Some(Self {
            sign,
            weight,
            dscale,
            digits,
        })
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        let word = |at: usize| raw.get(at..at + 2).map(|b| [b[0], b[1]]);
        let ndigits = usize::try_from(i16::from_be_bytes(word(0)?)).ok()?;
        let weight = i16::from_be_bytes(word(2)?);
        let sign = u16::from_be_bytes(word(4)?);
        let dscale = u16::from_be_bytes(word(6)?);

        let body = raw.get(8..)?;
        if body.len() != ndigits * 2 {
            return None;
        }
        let digits = body
            .chunks_exact(2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .collect();

        Some(Self {
            sign,
            weight,
            dscale,
            digits,
        })
    }

    fn encode(&self, out: &mut BytesMut) -> std::result::Result<(), WireError> {
        out.put_i16(i16::try_from(self.digits.len())?);
        out.put_i16(self.weight);
        out.put_u16(self.sign);
        out.put_u16(self.dscale);
        for digit in &self.digits {
            out.put_i16(*digit);
        }
        Ok(())
    }

    fn digit_at(&self, idx: i32) -> i16 {
        usize::try_from(idx)
            .ok()
            .and_then(|i| self.digits.get(i))
            .copied()
            .unwrap_or(0)
    }
}

impl fmt::Display for PgNumeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sign {
            NUMERIC_NAN => return f.write_str("NaN"),
            NUMERIC_PINF => return f.write_str("Infinity"),
            NUMERIC_NINF => return f.write_str("-Infinity"),
            NUMERIC_NEG => f.write_str("-")?,
            _ => {}
        }

        let weight = i32::from(self.weight);
        if weight < 0 {
            f.write_str("0")?;
        } else {
            write!(f, "{}", self.digit_at(0))?;
            for idx in 1..=weight {
                write!(f, "{:04}", self.digit_at(idx))?;
            }
        }

        let dscale = usize::from(self.dscale);
        if dscale > 0 {
            let mut frac = String::with_capacity(dscale + 4);
            let mut idx = weight + 1;
            while frac.len() < dscale {
                frac.push_str(&format!("{:04}", self.digit_at(idx)));
                idx += 1;
            }
            frac.truncate(dscale);
            write!(f, ".{frac}")?;
        }
        Ok(())
    }
}

impl ToSql for PgNumeric {
    fn to_sql(&self, _: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, WireError> {
        self.encode(out)?;
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, WireError> {
        Self::decode(raw).ok_or_else(|| "malformed NUMERIC value".into())
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Undecoded column bytes, accepted for every type
struct RawValue<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, WireError> {
        Ok(RawValue(raw))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn to_json_value<T: serde::Serialize>(value: T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(Into::into)
}

/// Convert a PostgreSQL column value to JSON using OID-based type detection
pub fn postgres_value_to_json(row: &tokio_postgres::Row, idx: usize) -> Result<serde_json::Value> {
    let column_type = row.columns()[idx].type_();
    match column_type.oid() {
        POSTGRES_TYPE_OID_BOOL => to_json_value(row.try_get::<_, Option<bool>>(idx)?),
        POSTGRES_TYPE_OID_INT2 => to_json_value(row.try_get::<_, Option<i16>>(idx)?),
        POSTGRES_TYPE_OID_INT4 => to_json_value(row.try_get::<_, Option<i32>>(idx)?),
        POSTGRES_TYPE_OID_INT8 => to_json_value(row.try_get::<_, Option<i64>>(idx)?),
        POSTGRES_TYPE_OID_FLOAT4 => to_json_value(row.try_get::<_, Option<f32>>(idx)?),
        POSTGRES_TYPE_OID_FLOAT8 => to_json_value(row.try_get::<_, Option<f64>>(idx)?),
        POSTGRES_TYPE_OID_TEXT
        | POSTGRES_TYPE_OID_VARCHAR
        | POSTGRES_TYPE_OID_BPCHAR
        | POSTGRES_TYPE_OID_NAME
        | POSTGRES_TYPE_OID_UNKNOWN => to_json_value(row.try_get::<_, Option<String>>(idx)?),
        POSTGRES_TYPE_OID_BYTEA => to_json_value(row.try_get::<_, Option<Vec<u8>>>(idx)?),
        POSTGRES_TYPE_OID_JSON | POSTGRES_TYPE_OID_JSONB => {
            to_json_value(row.try_get::<_, Option<serde_json::Value>>(idx)?)
        }
        // Decimal text keeps the full precision
        POSTGRES_TYPE_OID_NUMERIC => to_json_value(
            row.try_get::<_, Option<PgNumeric>>(idx)?
                .map(|n| n.to_string()),
        ),
        POSTGRES_TYPE_OID_UUID => to_json_value(
            row.try_get::<_, Option<Uuid>>(idx)?
                .map(|u| u.to_string()),
        ),
        POSTGRES_TYPE_OID_DATE => to_json_value(
            row.try_get::<_, Option<NaiveDate>>(idx)?
                .map(|d| d.to_string()),
        ),
        POSTGRES_TYPE_OID_TIME => to_json_value(
            row.try_get::<_, Option<NaiveTime>>(idx)?
                .map(|t| t.to_string()),
        ),
        POSTGRES_TYPE_OID_TIMESTAMP => to_json_value(
            row.try_get::<_, Option<NaiveDateTime>>(idx)?
                .map(|ts| ts.to_string()),
        ),
        POSTGRES_TYPE_OID_TIMESTAMPTZ => to_json_value(
            row.try_get::<_, Option<DateTime<Utc>>>(idx)?
                .map(|ts| ts.to_rfc3339()),
        ),
        _ => {
            let raw = row.try_get::<_, Option<RawValue>>(idx)?;
            Ok(raw_value_to_json(column_type, raw.map(|r| r.0)))
        }
    }
}

/// Fallback for types without a dedicated decoder: NULL stays null, text-encoded types
/// (enums, citext and friends) become strings, anything else gets a marker
fn raw_value_to_json(ty: &Type, raw: Option<&[u8]>) -> serde_json::Value {
    match raw {
        None => serde_json::Value::Null,
        Some(bytes) if <String as FromSql>::accepts(ty) || matches!(ty.kind(), Kind::Enum(_)) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        Some(_) => serde_json::Value::String(format!(
            "Unsupported PostgreSQL type {} (OID {})",
            ty.name(),
            ty.oid()
        )),
    }
}

fn row_to_values(row: &tokio_postgres::Row) -> Result<Vec<serde_json::Value>> {
    (0..row.len())
        .map(|idx| postgres_value_to_json(row, idx))
        .collect()
}
