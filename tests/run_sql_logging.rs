#![cfg(feature = "sqlite")]

use db_bridge::{DbCreds, RunOptions, SqlValue, run_sql};
use rusqlite::Connection;
use std::fmt;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing::{Event, Level, Subscriber, field::Field};
use tracing_subscriber::{
    Registry,
    layer::{Context, Layer, SubscriberExt},
};

type Captured = Arc<Mutex<Vec<(Level, String)>>>;

/// Records the level and message of every event
struct CaptureLayer {
    events: Captured,
}

struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}

fn setup_db() -> (TempDir, RunOptions) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logged.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
         INSERT INTO notes (body) VALUES ('first');",
    )
    .unwrap();
    let opts = RunOptions::with_creds(DbCreds::sqlite(path.to_string_lossy()));
    (dir, opts)
}

/// Run `f` with a capturing subscriber and return the levels of events whose message ends with `suffix`
fn levels_of(suffix: &str, f: impl FnOnce()) -> Vec<Level> {
    let events: Captured = Arc::default();
    let subscriber = Registry::default().with(CaptureLayer {
        events: events.clone(),
    });
    tracing::subscriber::with_default(subscriber, f);

    let events = events.lock().unwrap();
    events
        .iter()
        .filter(|(_, message)| message.ends_with(suffix))
        .map(|(level, _)| *level)
        .collect()
}

#[test]
fn test_reads_log_at_debug() {
    let (_dir, opts) = setup_db();
    let levels = levels_of("running query", || {
        run_sql("SELECT body FROM notes", None, &opts).unwrap();
    });
    assert_eq!(levels, vec![Level::DEBUG]);
}

#[test]
fn test_writes_log_at_info() {
    let (_dir, opts) = setup_db();
    let insert = || {
        run_sql(
            "INSERT INTO notes (body) VALUES (%s)",
            Some(&[SqlValue::from("second")]),
            &opts,
        )
        .unwrap();
    };
    assert_eq!(levels_of("running query", insert), vec![Level::INFO]);
    assert_eq!(levels_of("rows affected.", insert), vec![Level::INFO]);
}

#[test]
fn test_quiet_override_wins() {
    let (_dir, opts) = setup_db();

    let loud = opts.clone().quiet(false);
    let levels = levels_of("running query", || {
        run_sql("SELECT body FROM notes", None, &loud).unwrap();
    });
    assert_eq!(levels, vec![Level::INFO]);

    let hushed = opts.quiet(true);
    let levels = levels_of("rows affected.", || {
        run_sql("UPDATE notes SET body = 'x' WHERE id = 1", None, &hushed).unwrap();
    });
    assert_eq!(levels, vec![Level::DEBUG]);
}
