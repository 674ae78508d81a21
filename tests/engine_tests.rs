use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use slq::export::{CsvRecordWriter, RecordBuffer};
use slq::models::enums::DriverType;
use slq::models::structs::{QueryRows, Source, SourceMetadata, SourceSet, Value};
use slq::query_ast::errors::{Result, SlqError};
use slq::query_ast::executor::{Connection, Driver, ScratchDb, ScratchStore, ping_all};
use slq::query_ast::executors::{SqliteDriver, SqliteScratchStore};
use slq::query_ast::{DriverRegistry, Engine, build_plan};

/// A driver that can't reach anything but remembers being asked to.
struct RecordingDriver {
    driver: DriverType,
    opened: Arc<AtomicBool>,
}

#[async_trait]
impl Driver for RecordingDriver {
    fn driver_type(&self) -> DriverType {
        self.driver
    }

    async fn open(&self, src: &Source) -> Result<Box<dyn Connection>> {
        self.opened.store(true, Ordering::SeqCst);
        Err(SlqError::driver(format!("open {}", src.handle), "unreachable"))
    }

    async fn ping(&self, _src: &Source) -> Result<()> {
        Ok(())
    }

    async fn metadata(&self, src: &Source) -> Result<SourceMetadata> {
        Err(SlqError::driver(format!("metadata {}", src.handle), "unreachable"))
    }
}

/// The real SQLite driver, counting the connections it hands out and the
/// ones given back.
struct CountingDriver {
    inner: SqliteDriver,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

struct CountingConnection {
    inner: Box<dyn Connection>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for CountingConnection {
    async fn query(&mut self, sql: &str) -> Result<QueryRows> {
        self.inner.query(sql).await
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.inner.execute(sql, params).await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

#[async_trait]
impl Driver for CountingDriver {
    fn driver_type(&self) -> DriverType {
        DriverType::SQLite
    }

    async fn open(&self, src: &Source) -> Result<Box<dyn Connection>> {
        let inner = self.inner.open(src).await?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingConnection { inner, closes: self.closes.clone() }))
    }

    async fn ping(&self, src: &Source) -> Result<()> {
        self.inner.ping(src).await
    }

    async fn metadata(&self, src: &Source) -> Result<SourceMetadata> {
        self.inner.metadata(src).await
    }
}

struct RecordingScratch {
    opened: Arc<AtomicBool>,
}

#[async_trait]
impl ScratchStore for RecordingScratch {
    fn driver_type(&self) -> DriverType {
        DriverType::SQLite
    }

    async fn open_new(&self) -> Result<ScratchDb> {
        self.opened.store(true, Ordering::SeqCst);
        Err(SlqError::driver("open scratch", "unreachable"))
    }
}

async fn sqlite_db(path: &Path, handle: &str, statements: &[&str]) -> Source {
    let create = Source::new(handle, format!("{}?mode=rwc", path.display()), DriverType::SQLite);
    let driver = SqliteDriver::new();
    let mut conn = driver.open(&create).await.expect("open");
    for stmt in statements {
        conn.execute(stmt, &[]).await.expect(stmt);
    }
    conn.close().await.expect("close");
    Source::new(handle, path.display().to_string(), DriverType::SQLite)
}

fn registry(scratch: Arc<SqliteScratchStore>) -> DriverRegistry {
    DriverRegistry::with_defaults(scratch)
}

#[tokio::test]
async fn cross_source_same_table_name_fails_before_io() {
    let opened = Arc::new(AtomicBool::new(false));
    let scratch_opened = Arc::new(AtomicBool::new(false));

    let mut reg = DriverRegistry::new();
    reg.register(Arc::new(RecordingDriver { driver: DriverType::MySQL, opened: opened.clone() }));
    reg.register(Arc::new(RecordingDriver { driver: DriverType::PostgreSQL, opened: opened.clone() }));
    let scratch = RecordingScratch { opened: scratch_opened.clone() };

    let mut srcs = SourceSet::new();
    srcs.add(Source::new("@db1", "mysql://u:p@localhost/a", DriverType::MySQL)).expect("ok");
    srcs.add(Source::new("@db2", "postgres://u:p@localhost/b", DriverType::PostgreSQL)).expect("ok");

    let plan = build_plan(&srcs, "@db1.user, @db2.user | join(.uid)").expect("plan");
    let engine = Engine::new(&srcs, &reg, &scratch);
    let mut out = RecordBuffer::new();
    let err = engine.execute(&plan, &mut out).await.expect_err("same table names");

    assert!(err.is_structure(), "{}", err);
    assert!(!opened.load(Ordering::SeqCst));
    assert!(!scratch_opened.load(Ordering::SeqCst));
    assert!(out.records.is_empty());
    assert!(!out.closed);
}

#[tokio::test]
async fn driver_failure_reaches_caller() {
    let opened = Arc::new(AtomicBool::new(false));
    let mut reg = DriverRegistry::new();
    reg.register(Arc::new(RecordingDriver { driver: DriverType::MySQL, opened: opened.clone() }));
    let scratch = RecordingScratch { opened: Arc::new(AtomicBool::new(false)) };

    let mut srcs = SourceSet::new();
    srcs.add(Source::new("@db1", "mysql://u:p@localhost/a", DriverType::MySQL)).expect("ok");
    let plan = build_plan(&srcs, "@db1 | .actor | .[0:3]").expect("plan");

    let err = Engine::new(&srcs, &reg, &scratch)
        .execute(&plan, &mut RecordBuffer::new())
        .await
        .expect_err("unreachable source");
    assert!(err.is_driver());
    assert!(opened.load(Ordering::SeqCst));

    // No driver registered for the source's type: fails without opening anything.
    srcs.add(Source::new("@pg", "postgres://u:p@localhost/a", DriverType::PostgreSQL)).expect("ok");
    let plan = build_plan(&srcs, "@pg | .actor").expect("plan");
    let err = Engine::new(&srcs, &reg, &scratch).query(&plan).await.expect_err("no driver");
    assert!(err.is_structure());
}

#[tokio::test]
async fn single_source_query() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = sqlite_db(
        &dir.path().join("sakila.db"),
        "@sakila",
        &[
            "CREATE TABLE actor (actor_id INTEGER, first_name TEXT, last_name TEXT)",
            "INSERT INTO actor VALUES (1, 'PENELOPE', 'GUINESS'), (2, 'NICK', 'WAHLBERG'), \
             (3, 'ED', 'CHASE'), (4, 'JENNIFER', 'DAVIS')",
        ],
    )
    .await;
    let mut srcs = SourceSet::new();
    srcs.add(src).expect("ok");
    srcs.set_active("@sakila").expect("ok");

    let scratch = Arc::new(SqliteScratchStore::new(dir.path().join("scratch")));
    let reg = registry(scratch.clone());
    let engine = Engine::new(&srcs, &reg, scratch.as_ref());

    let plan = build_plan(&srcs, ".actor | .[1:3] | .first_name, .actor_id").expect("plan");
    let mut out = RecordBuffer::new();
    engine.execute(&plan, &mut out).await.expect("execute");
    assert!(out.closed);
    let got: Vec<Vec<Value>> = out.records.iter().map(|r| r.values.clone()).collect();
    assert_eq!(
        got,
        vec![
            vec![Value::Text("NICK".into()), Value::Int(2)],
            vec![Value::Text("ED".into()), Value::Int(3)],
        ]
    );
    assert_eq!(out.records[0].fields[0].name, "first_name");

    let plan = build_plan(&srcs, "@sakila | .actor | .[2:] | .last_name").expect("plan");
    let mut csv = CsvRecordWriter::new(Vec::new());
    engine.execute(&plan, &mut csv).await.expect("execute");
    let text = String::from_utf8(csv.into_inner().expect("flush")).expect("utf8");
    assert_eq!(text, "last_name\nCHASE\nDAVIS\n");

    // No rows still gets a header.
    let plan = build_plan(&srcs, ".actor | .[10:] | .last_name, .first_name").expect("plan");
    let mut csv = CsvRecordWriter::new(Vec::new());
    engine.execute(&plan, &mut csv).await.expect("execute");
    let text = String::from_utf8(csv.into_inner().expect("flush")).expect("utf8");
    assert_eq!(text, "last_name,first_name\n");
}

#[tokio::test]
async fn federated_join_across_sqlite_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let users = sqlite_db(
        &dir.path().join("users.db"),
        "@users",
        &[
            "CREATE TABLE user (uid INTEGER, username TEXT)",
            "INSERT INTO user VALUES (1, 'neilotoole'), (2, 'ksoze'), (3, 'kubla')",
        ],
    )
    .await;
    let addrs = sqlite_db(
        &dir.path().join("addrs.db"),
        "@addrs",
        &[
            "CREATE TABLE address (aid INTEGER, uid INTEGER, country TEXT)",
            "INSERT INTO address VALUES (10, 1, 'IE'), (11, 3, 'MN'), (12, 9, 'US')",
        ],
    )
    .await;
    let mut srcs = SourceSet::new();
    srcs.add(users).expect("ok");
    srcs.add(addrs).expect("ok");

    let scratch_dir = dir.path().join("scratch");
    let scratch = Arc::new(SqliteScratchStore::new(&scratch_dir));
    let reg = registry(scratch.clone());
    let engine = Engine::new(&srcs, &reg, scratch.as_ref());

    let plan = build_plan(
        &srcs,
        "@users.user, @addrs.address | join(.user.uid == .address.uid) | .user.uid, .username, .country",
    )
    .expect("plan");
    let rows = engine.query(&plan).await.expect("query");
    let mut got = rows.rows.clone();
    got.sort_by_key(|r| match r[0] {
        Value::Int(n) => n,
        _ => -1,
    });
    assert_eq!(
        got,
        vec![
            vec![Value::Int(1), Value::Text("neilotoole".into()), Value::Text("IE".into())],
            vec![Value::Int(3), Value::Text("kubla".into()), Value::Text("MN".into())],
        ]
    );

    // Scratch databases are gone once the query returns.
    let leftover = std::fs::read_dir(&scratch_dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn failed_federation_closes_connections_and_scratch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let users = sqlite_db(
        &dir.path().join("u.db"),
        "@u",
        &["CREATE TABLE user (uid INTEGER, username TEXT)", "INSERT INTO user VALUES (1, 'ksoze')"],
    )
    .await;
    // No address table here.
    let addrs = sqlite_db(&dir.path().join("a.db"), "@a", &["CREATE TABLE other (x INTEGER)"]).await;
    let mut srcs = SourceSet::new();
    srcs.add(users).expect("ok");
    srcs.add(addrs).expect("ok");

    let scratch_dir = dir.path().join("scratch");
    let scratch = Arc::new(SqliteScratchStore::new(&scratch_dir));
    let opens = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let mut reg = registry(scratch.clone());
    reg.register(Arc::new(CountingDriver {
        inner: SqliteDriver::new(),
        opens: opens.clone(),
        closes: closes.clone(),
    }));
    let engine = Engine::new(&srcs, &reg, scratch.as_ref());

    let plan = build_plan(&srcs, "@u.user, @a.address | join(.uid)").expect("plan");
    let mut out = RecordBuffer::new();
    let err = engine.execute(&plan, &mut out).await.expect_err("missing table");

    assert!(err.is_driver(), "{}", err);
    assert!(err.to_string().contains("no such table: address"), "{}", err);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert_eq!(closes.load(Ordering::SeqCst), 2);
    assert!(out.records.is_empty());
    assert!(!out.closed);

    let leftover = std::fs::read_dir(&scratch_dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn xlsx_source_joins_with_sqlite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let book = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/people.xlsx");
    let mut srcs = SourceSet::new();
    srcs.add(Source::from_location("@book", book).expect("xlsx location")).expect("ok");
    srcs.add(
        sqlite_db(
            &dir.path().join("visits.db"),
            "@visits",
            &["CREATE TABLE visit (uid INTEGER, city TEXT)", "INSERT INTO visit VALUES (1, 'Cork'), (3, 'Ulm')"],
        )
        .await,
    )
    .expect("ok");

    let scratch_dir = dir.path().join("scratch");
    let scratch = Arc::new(SqliteScratchStore::new(&scratch_dir));
    let reg = registry(scratch.clone());
    let engine = Engine::new(&srcs, &reg, scratch.as_ref());

    let plan = build_plan(&srcs, "@book | .pet | .kind").expect("plan");
    let rows = engine.query(&plan).await.expect("query");
    assert_eq!(rows.rows, vec![vec![Value::Text("cat".into())], vec![Value::Text("dog".into())]]);

    let plan = build_plan(&srcs, "@book.person, @visits.visit | join(.uid) | .score, .city").expect("plan");
    let mut rows = engine.query(&plan).await.expect("query").rows;
    rows.sort_by(|a, b| a[1].to_string().cmp(&b[1].to_string()));
    assert_eq!(
        rows,
        vec![
            vec![Value::Float(1.5), Value::Text("Cork".into())],
            vec![Value::Float(7.0), Value::Text("Ulm".into())],
        ]
    );
    let leftover = std::fs::read_dir(&scratch_dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn csv_source_and_federation_with_csv() {
    let dir = tempfile::tempdir().expect("tempdir");
    let csv_path = dir.path().join("people.csv");
    std::fs::write(&csv_path, "uid,name\n1,ann\n2,bob\n3,\n").expect("write");
    let people = Source::new("@people", csv_path.display().to_string(), DriverType::Csv).with_option("header", "true");
    let scores = sqlite_db(
        &dir.path().join("scores.db"),
        "@scores",
        &["CREATE TABLE score (uid INTEGER, points REAL)", "INSERT INTO score VALUES (1, 9.5), (2, 7.0)"],
    )
    .await;
    let mut srcs = SourceSet::new();
    srcs.add(people).expect("ok");
    srcs.add(scores).expect("ok");

    let scratch = Arc::new(SqliteScratchStore::new(dir.path().join("scratch")));
    let reg = registry(scratch.clone());
    let engine = Engine::new(&srcs, &reg, scratch.as_ref());

    let plan = build_plan(&srcs, "@people | .data | .name").expect("plan");
    let rows = engine.query(&plan).await.expect("query");
    assert_eq!(
        rows.rows,
        vec![vec![Value::Text("ann".into())], vec![Value::Text("bob".into())], vec![Value::Null]]
    );

    let plan = build_plan(&srcs, "@people.data, @scores.score | join(.uid) | .name, .points").expect("plan");
    let mut rows = engine.query(&plan).await.expect("query").rows;
    rows.sort_by(|a, b| a[0].to_string().cmp(&b[0].to_string()));
    assert_eq!(
        rows,
        vec![
            vec![Value::Text("ann".into()), Value::Float(9.5)],
            vec![Value::Text("bob".into()), Value::Float(7.0)],
        ]
    );
}

#[tokio::test]
async fn ping_all_reports_each_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ok = sqlite_db(&dir.path().join("ok.db"), "@ok", &["CREATE TABLE t (x INTEGER)"]).await;
    let mut srcs = SourceSet::new();
    srcs.add(ok).expect("ok");
    srcs.add(Source::new("@gone", dir.path().join("gone.db").display().to_string(), DriverType::SQLite))
        .expect("ok");

    let scratch = Arc::new(SqliteScratchStore::new(dir.path().join("scratch")));
    let results = ping_all(&srcs, &registry(scratch), std::time::Duration::from_secs(5)).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "@ok");
    assert!(results[0].1.is_ok());
    assert_eq!(results[1].0, "@gone");
    assert!(results[1].1.is_err());
}
