//! Row lookups by a unique column, with interactive disambiguation when several rows match.

use crate::{
    result::{BridgeError, Result},
    runner::{RunOptions, run_sql},
    sql_utils::validate_identifier,
    values::SqlValue,
};
use dialoguer::{Select, theme::ColorfulTheme};
use serde_json::{Map, Value};

/// What to fetch: `columns` of the row in `table` whose `unique_column` equals `value`
#[derive(Debug, Clone)]
pub struct ColumnLookup {
    pub columns: Vec<String>,
    pub table: String,
    pub unique_column: String,
    pub value: SqlValue,
    /// Shown to the chooser when several rows match; dropped from dict results unless requested
    pub primary_key: String,
    pub as_tuple: bool,
}

impl ColumnLookup {
    pub fn new<I, S>(
        table: impl Into<String>,
        unique_column: impl Into<String>,
        value: impl Into<SqlValue>,
        columns: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            table: table.into(),
            unique_column: unique_column.into(),
            value: value.into(),
            primary_key: "id".to_string(),
            as_tuple: true,
        }
    }

    pub fn primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn as_dict(mut self) -> Self {
        self.as_tuple = false;
        self
    }

    fn pk_requested(&self) -> bool {
        self.columns.iter().any(|col| *col == self.primary_key)
    }

    /// `SELECT <pk>, <columns> FROM <table> WHERE <unique_column> = %s`
    pub fn select_sql(&self) -> Result<String> {
        if self.columns.is_empty() {
            return Err(BridgeError::NoColumns);
        }
        for name in self
            .columns
            .iter()
            .chain([&self.table, &self.unique_column, &self.primary_key])
        {
            validate_identifier(name)?;
        }

        let cols = self.columns.join(", ");
        let select_cols = if self.pk_requested() {
            cols
        } else {
            format!("{}, {cols}", self.primary_key)
        };
        Ok(format!(
            "SELECT {select_cols} FROM {} WHERE {} = %s",
            self.table, self.unique_column
        ))
    }

    fn project(&self, row: Map<String, Value>) -> ColumnValues {
        if self.as_tuple {
            let mut values: Vec<Value> = self
                .columns
                .iter()
                .map(|col| row_get(&row, col).cloned().unwrap_or(Value::Null))
                .collect();
            if values.len() == 1 {
                ColumnValues::Scalar(values.remove(0))
            } else {
                ColumnValues::Tuple(values)
            }
        } else if self.pk_requested() {
            ColumnValues::Dict(row)
        } else {
            ColumnValues::Dict(
                row.into_iter()
                    .filter(|(key, _)| !key.eq_ignore_ascii_case(&self.primary_key))
                    .collect(),
            )
        }
    }
}

/// Values of the resolved row
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    /// A single requested column
    Scalar(Value),
    /// Several requested columns, in request order
    Tuple(Vec<Value>),
    /// Column name to value
    Dict(Map<String, Value>),
}

/// One candidate row offered to a [`RowChooser`]
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    /// The row's primary key
    pub key: String,
    /// `column: value` pairs joined with ` | `
    pub label: String,
}

/// Picks one of several candidate rows; returns the index into `choices`
pub trait RowChooser {
    fn choose(&self, prompt: &str, choices: &[Choice]) -> Result<usize>;
}

impl<F> RowChooser for F
where
    F: Fn(&str, &[Choice]) -> Result<usize>,
{
    fn choose(&self, prompt: &str, choices: &[Choice]) -> Result<usize> {
        self(prompt, choices)
    }
}

/// Asks on the terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalChooser;

impl RowChooser for TerminalChooser {
    fn choose(&self, prompt: &str, choices: &[Choice]) -> Result<usize> {
        let items: Vec<String> = choices
            .iter()
            .map(|choice| format!("{}: {}", choice.key, choice.label))
            .collect();
        let index = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .items(&items)
            .default(0)
            .interact()?;
        Ok(index)
    }
}

/// Fetch `lookup.columns` for the row whose unique column matches `lookup.value`.
///
/// Returns `None` when nothing matches. When several rows match, `chooser` picks one.
pub fn get_column_values(
    lookup: &ColumnLookup,
    opts: &RunOptions,
    chooser: &dyn RowChooser,
) -> Result<Option<ColumnValues>> {
    let sql = lookup.select_sql()?;
    let opts = RunOptions {
        as_dict: true,
        ..opts.clone()
    };
    let rows = run_sql(&sql, Some(std::slice::from_ref(&lookup.value)), &opts)?.into_rows();
    resolve_rows(lookup, rows, chooser)
}

fn resolve_rows(
    lookup: &ColumnLookup,
    rows: Vec<Value>,
    chooser: &dyn RowChooser,
) -> Result<Option<ColumnValues>> {
    let mut rows: Vec<Map<String, Value>> = rows
        .into_iter()
        .filter_map(|row| match row {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();

    let row = match rows.len() {
        0 => return Ok(None),
        1 => rows.remove(0),
        available => {
            tracing::warn!(
                table = %lookup.table,
                column = %lookup.unique_column,
                value = %lookup.value,
                matches = available,
                "Multiple results found!"
            );
            let choices: Vec<Choice> = rows
                .iter()
                .map(|row| Choice {
                    key: row_get(row, &lookup.primary_key)
                        .map(display_value)
                        .unwrap_or_default(),
                    label: row
                        .iter()
                        .map(|(key, value)| format!("{key}: {}", display_value(value)))
                        .collect::<Vec<_>>()
                        .join(" | "),
                })
                .collect();
            let prompt = format!(
                "Select the correct {} {} ({} matches for {})",
                lookup.table, lookup.primary_key, lookup.table, lookup.value
            );

            let index = chooser.choose(&prompt, &choices)?;
            if index >= available {
                return Err(BridgeError::InvalidChoice { index, available });
            }
            rows.swap_remove(index)
        }
    };

    Ok(Some(lookup.project(row)))
}

/// Fetch `columns` of every row whose `column` matches the regular expression `pattern`.
///
/// Uses `REGEXP` (`~` on PostgreSQL). Returns one object per row, empty when nothing matches.
pub fn get_column_values_regexp<S: AsRef<str>>(
    columns: &[S],
    table: &str,
    column: &str,
    pattern: &str,
    opts: &RunOptions,
) -> Result<Vec<Value>> {
    if columns.is_empty() {
        return Err(BridgeError::NoColumns);
    }
    let columns: Vec<&str> = columns.iter().map(AsRef::as_ref).collect();
    for name in columns.iter().chain([&table, &column]) {
        validate_identifier(name)?;
    }

    let creds = opts.resolve_creds()?;
    let sql = format!(
        "SELECT {} FROM {table} WHERE {column} {} %s",
        columns.join(", "),
        creds.driver.regexp_operator()
    );
    let opts = RunOptions {
        as_dict: true,
        profile: None,
        db_creds: Some(creds),
        ..opts.clone()
    };

    let rows = run_sql(&sql, Some(&[SqlValue::from(pattern)]), &opts)?.into_rows();
    if rows.len() > 1 {
        tracing::warn!(table, column, pattern, "Multiple ({}) results found!", rows.len());
    }
    Ok(rows)
}

/// Column lookup tolerant of the case folding some servers apply to unquoted identifiers
fn row_get<'a>(row: &'a Map<String, Value>, column: &str) -> Option<&'a Value> {
    row.get(column).or_else(|| {
        row.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    })
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup() -> ColumnLookup {
        ColumnLookup::new("users", "email", "a@example.com", ["name", "age"])
    }

    fn rows() -> Vec<Value> {
        vec![
            json!({"id": 7, "name": "Ann", "age": 31}),
            json!({"id": 9, "name": "Ann B", "age": 40}),
        ]
    }

    #[test]
    fn test_select_sql_prepends_primary_key() {
        assert_eq!(
            lookup().select_sql().unwrap(),
            "SELECT id, name, age FROM users WHERE email = %s"
        );
        let with_pk = ColumnLookup::new("users", "email", "x", ["id", "name"]);
        assert_eq!(
            with_pk.select_sql().unwrap(),
            "SELECT id, name FROM users WHERE email = %s"
        );
    }

    #[test]
    fn test_select_sql_rejects_bad_identifiers() {
        let bad = ColumnLookup::new("users; --", "email", "x", ["name"]);
        assert!(matches!(
            bad.select_sql(),
            Err(BridgeError::InvalidIdentifier(_))
        ));
        let empty = ColumnLookup::new("users", "email", "x", Vec::<String>::new());
        assert!(matches!(empty.select_sql(), Err(BridgeError::NoColumns)));
    }

    #[test]
    fn test_chooser_receives_labelled_choices() {
        let chooser = |prompt: &str, choices: &[Choice]| -> Result<usize> {
            assert!(prompt.contains("users id"));
            assert_eq!(
                choices,
                &[
                    Choice {
                        key: "7".to_string(),
                        label: "id: 7 | name: Ann | age: 31".to_string()
                    },
                    Choice {
                        key: "9".to_string(),
                        label: "id: 9 | name: Ann B | age: 40".to_string()
                    },
                ]
            );
            Ok(1)
        };
        let resolved = resolve_rows(&lookup(), rows(), &chooser).unwrap();
        assert_eq!(
            resolved,
            Some(ColumnValues::Tuple(vec![json!("Ann B"), json!(40)]))
        );
    }

    #[test]
    fn test_out_of_range_choice() {
        let chooser = |_: &str, _: &[Choice]| -> Result<usize> { Ok(5) };
        assert!(matches!(
            resolve_rows(&lookup(), rows(), &chooser),
            Err(BridgeError::InvalidChoice {
                index: 5,
                available: 2
            })
        ));
    }

    #[test]
    fn test_projection_shapes() {
        let never = |_: &str, _: &[Choice]| -> Result<usize> { panic!("not ambiguous") };
        let single = vec![json!({"id": 7, "name": "Ann", "age": 31})];

        let scalar = ColumnLookup::new("users", "email", "x", ["name"]);
        assert_eq!(
            resolve_rows(&scalar, single.clone(), &never).unwrap(),
            Some(ColumnValues::Scalar(json!("Ann")))
        );

        let dict = lookup().as_dict();
        let Some(ColumnValues::Dict(map)) = resolve_rows(&dict, single.clone(), &never).unwrap()
        else {
            panic!("expected dict");
        };
        assert_eq!(Value::Object(map), json!({"name": "Ann", "age": 31}));

        let dict_with_pk = ColumnLookup::new("users", "email", "x", ["id", "age"]).as_dict();
        let Some(ColumnValues::Dict(map)) = resolve_rows(&dict_with_pk, single, &never).unwrap()
        else {
            panic!("expected dict");
        };
        assert!(map.contains_key("id"));

        assert_eq!(resolve_rows(&lookup(), vec![], &never).unwrap(), None);
    }
}
