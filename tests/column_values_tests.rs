#![cfg(feature = "sqlite")]

use db_bridge::{
    BridgeError, Choice, ColumnLookup, ColumnValues, DbCreds, Result, RunOptions,
    get_column_values, get_column_values_regexp,
};
use rusqlite::Connection;
use serde_json::json;
use std::cell::RefCell;
use tempfile::TempDir;

fn setup_db() -> (TempDir, RunOptions) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, city TEXT, email TEXT);
         INSERT INTO people VALUES (1, 'Ann', 'Oslo', 'ann@example.com');
         INSERT INTO people VALUES (2, 'Bob', 'Lima', 'bob@example.com');
         INSERT INTO people VALUES (3, 'Bob', 'Pune', 'bob2@example.com');
         CREATE TABLE cities (code TEXT PRIMARY KEY, name TEXT);
         INSERT INTO cities VALUES ('OSL', 'Oslo');
         INSERT INTO cities VALUES ('LIM', 'Lima');",
    )
    .unwrap();
    let opts = RunOptions::with_creds(DbCreds::sqlite(path.to_string_lossy()));
    (dir, opts)
}

fn never_asked(_: &str, _: &[Choice]) -> Result<usize> {
    panic!("chooser should not be consulted")
}

#[test]
fn test_single_match_scalar() {
    let (_dir, opts) = setup_db();
    let lookup = ColumnLookup::new("people", "email", "ann@example.com", ["city"]);
    let values = get_column_values(&lookup, &opts, &never_asked).unwrap();
    assert_eq!(values, Some(ColumnValues::Scalar(json!("Oslo"))));
}

#[test]
fn test_single_match_tuple_in_request_order() {
    let (_dir, opts) = setup_db();
    let lookup = ColumnLookup::new("people", "email", "ann@example.com", ["city", "name"]);
    let values = get_column_values(&lookup, &opts, &never_asked).unwrap();
    assert_eq!(
        values,
        Some(ColumnValues::Tuple(vec![json!("Oslo"), json!("Ann")]))
    );
}

#[test]
fn test_no_match_returns_none() {
    let (_dir, opts) = setup_db();
    let lookup = ColumnLookup::new("people", "email", "zed@example.com", ["city"]);
    assert_eq!(get_column_values(&lookup, &opts, &never_asked).unwrap(), None);
}

#[test]
fn test_dict_drops_unrequested_primary_key() {
    let (_dir, opts) = setup_db();
    let lookup = ColumnLookup::new("people", "email", "ann@example.com", ["name", "city"]).as_dict();
    let Some(ColumnValues::Dict(map)) = get_column_values(&lookup, &opts, &never_asked).unwrap()
    else {
        panic!("expected a dict result");
    };
    assert_eq!(serde_json::Value::Object(map), json!({"name": "Ann", "city": "Oslo"}));

    let with_pk = ColumnLookup::new("people", "email", "ann@example.com", ["id", "name"]).as_dict();
    let Some(ColumnValues::Dict(map)) = get_column_values(&with_pk, &opts, &never_asked).unwrap()
    else {
        panic!("expected a dict result");
    };
    assert_eq!(serde_json::Value::Object(map), json!({"id": 1, "name": "Ann"}));
}

#[test]
fn test_multiple_matches_ask_the_chooser() {
    let (_dir, opts) = setup_db();
    let seen = RefCell::new(Vec::new());
    let chooser = |prompt: &str, choices: &[Choice]| -> Result<usize> {
        seen.borrow_mut().push(prompt.to_string());
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0].key, "2");
        assert_eq!(choices[1].key, "3");
        assert!(choices[1].label.contains("city: Pune"));
        Ok(1)
    };

    let lookup = ColumnLookup::new("people", "name", "Bob", ["city"]);
    let values = get_column_values(&lookup, &opts, &chooser).unwrap();
    assert_eq!(values, Some(ColumnValues::Scalar(json!("Pune"))));

    let prompts = seen.into_inner();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("Select the correct people id"));
}

#[test]
fn test_out_of_range_choice_is_an_error() {
    let (_dir, opts) = setup_db();
    let lookup = ColumnLookup::new("people", "name", "Bob", ["city"]);
    let err = get_column_values(&lookup, &opts, &|_: &str, _: &[Choice]| -> Result<usize> { Ok(2) })
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::InvalidChoice {
            index: 2,
            available: 2
        }
    ));
}

#[test]
fn test_custom_primary_key() {
    let (_dir, opts) = setup_db();
    let lookup = ColumnLookup::new("cities", "name", "Lima", ["name"])
        .primary_key("code")
        .as_dict();
    let Some(ColumnValues::Dict(map)) = get_column_values(&lookup, &opts, &never_asked).unwrap()
    else {
        panic!("expected a dict result");
    };
    assert_eq!(serde_json::Value::Object(map), json!({"name": "Lima"}));
}

#[test]
fn test_invalid_identifier_rejected() {
    let (_dir, opts) = setup_db();
    let lookup = ColumnLookup::new("people", "email = email OR 1", "x", ["city"]);
    assert!(matches!(
        get_column_values(&lookup, &opts, &never_asked),
        Err(BridgeError::InvalidIdentifier(_))
    ));
}

#[test]
fn test_regexp_matches() {
    let (_dir, opts) = setup_db();
    let rows = get_column_values_regexp(&["id", "email"], "people", "email", "^bob", &opts).unwrap();
    assert_eq!(
        rows,
        vec![
            json!({"id": 2, "email": "bob@example.com"}),
            json!({"id": 3, "email": "bob2@example.com"}),
        ]
    );

    let none = get_column_values_regexp(&["id"], "people", "email", "^nobody", &opts).unwrap();
    assert!(none.is_empty());
}

#[test]
fn test_regexp_invalid_pattern_is_an_execution_error() {
    let (_dir, opts) = setup_db();
    let err = get_column_values_regexp(&["id"], "people", "email", "(unclosed", &opts).unwrap_err();
    assert!(matches!(err, BridgeError::Execution { .. }));
}

#[test]
fn test_regexp_rejects_bad_identifiers() {
    let (_dir, opts) = setup_db();
    let err = get_column_values_regexp(&["id; DROP TABLE people"], "people", "email", ".", &opts)
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidIdentifier(_)));
}

#[test]
fn test_empty_column_list_is_rejected() {
    let (_dir, opts) = setup_db();
    let no_columns: [&str; 0] = [];
    assert!(matches!(
        get_column_values_regexp(&no_columns, "people", "email", ".", &opts),
        Err(BridgeError::NoColumns)
    ));

    let lookup = ColumnLookup::new("people", "email", "ann@example.com", no_columns);
    assert!(matches!(
        get_column_values(&lookup, &opts, &never_asked),
        Err(BridgeError::NoColumns)
    ));
}

#[test]
fn test_regexp_over_many_rows() {
    let (_dir, opts) = setup_db();
    let rows = get_column_values_regexp(&["id"], "people", "city", "^(Oslo|Pune)$", &opts).unwrap();
    assert_eq!(rows, vec![json!({"id": 1}), json!({"id": 3})]);
}
