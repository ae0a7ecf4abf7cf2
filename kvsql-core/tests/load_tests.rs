//! Batch loader end-to-end: Arrow IPC input files, per-block transactions,
//! bounded concurrency, unified error-abort semantics.

use std::fs::File;
use std::path::PathBuf;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use kvsql_core::load::LoadOptions;
use kvsql_core::{Database, DatabaseConfig, TransactionHandle, TransactionOptions};
use kvsql_plan::{CompileOptions, ParameterSet, SqlType, StatsSnapshot};
use kvsql_result::{ErrorCode, ErrorInfo, Result};
use kvsql_sql::DefaultSqlCompiler;

fn test_db() -> Database {
    let db = Database::new(
        DatabaseConfig {
            thread_pool_size: 4,
            ..Default::default()
        },
        Arc::new(DefaultSqlCompiler::new()),
    );
    db.start().unwrap();
    db
}

fn exec(db: &Database, tx: Option<&TransactionHandle>, sql: &str) -> Result<StatsSnapshot> {
    let statement = db.create_executable(sql, Arc::new(ParameterSet::new()))?;
    let (sender, receiver) = channel();
    db.execute_async(
        tx,
        &statement,
        None,
        Box::new(move |status, stats| {
            let _ = sender.send((status, stats));
        }),
        true,
    )?;
    let (status, stats) = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("statement completion never fired");
    status.map(|_| stats).map_err(ErrorInfo::into_error)
}

/// Write one Arrow IPC file with one record batch (= one block) per entry.
fn write_ipc_file(dir: &tempfile::TempDir, name: &str, blocks: &[Vec<i64>]) -> PathBuf {
    let path = dir.path().join(name);
    let schema = Arc::new(Schema::new(vec![Field::new("c0", DataType::Int64, false)]));
    let file = File::create(&path).unwrap();
    let mut writer = FileWriter::try_new(file, &schema).unwrap();
    for block in blocks {
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![Arc::new(Int64Array::from(block.clone()))],
        )
        .unwrap();
        writer.write(&batch).unwrap();
    }
    writer.finish().unwrap();
    path
}

fn prepare_insert(db: &Database) -> kvsql_core::StatementHandle {
    let mut host_variables = rustc_hash::FxHashMap::default();
    host_variables.insert("p0".to_string(), SqlType::Int8);
    db.prepare(
        "INSERT INTO t VALUES (:p0)",
        CompileOptions {
            session_id: None,
            host_variables,
        },
    )
    .unwrap()
}

fn count_rows(db: &Database) -> i64 {
    let store = Arc::new(kvsql_plan::ResultStore::new());
    let statement = db
        .create_executable("SELECT count(*) FROM t", Arc::new(ParameterSet::new()))
        .unwrap();
    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    let (sender, receiver) = channel();
    db.execute_async(
        Some(&tx),
        &statement,
        Some(Arc::clone(&store) as Arc<dyn kvsql_plan::RecordChannel>),
        Box::new(move |status, _| {
            let _ = sender.send(status);
        }),
        true,
    )
    .unwrap();
    receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("count query never completed")
        .unwrap();
    db.abort_transaction(&tx).unwrap();
    db.destroy_transaction(&tx).unwrap();

    let batches = store.take_batches();
    let array = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("count(*) yields Int64");
    array.value(0)
}

#[test]
fn test_load_inserts_every_row_of_every_block() {
    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();
    let prepared = prepare_insert(&db);

    let dir = tempfile::tempdir().unwrap();
    let file_a = write_ipc_file(
        &dir,
        "a.arrow",
        &[vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9, 10, 11, 12]],
    );
    let file_b = write_ipc_file(
        &dir,
        "b.arrow",
        &[vec![13, 14, 15, 16], vec![17, 18, 19, 20], vec![21, 22, 23, 24]],
    );

    let mut template = ParameterSet::new();
    template.set_reference_column_position("p0", SqlType::Int8, 0);

    let (sender, receiver) = channel();
    let (_, executor) = db
        .execute_load_with_factory(
            &prepared,
            Arc::new(template),
            vec![file_a, file_b],
            LoadOptions {
                max_concurrent_files: 2,
                max_concurrent_blocks_per_file: 2,
            },
            Arc::new(kvsql_core::load::ArrowIpcReaderFactory),
            Box::new(move |status| {
                let _ = sender.send(status);
            }),
        )
        .unwrap();

    receiver
        .recv_timeout(Duration::from_secs(30))
        .expect("load completion never fired")
        .unwrap();
    assert!(executor.state().finished());
    assert_eq!(executor.state().running_statements(), 0);
    assert_eq!(count_rows(&db), 24);

    db.stop().unwrap();
}

#[test]
fn test_load_expands_column_references_by_name() {
    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();
    let prepared = prepare_insert(&db);

    let dir = tempfile::tempdir().unwrap();
    let file = write_ipc_file(&dir, "named.arrow", &[vec![100, 200]]);

    let mut template = ParameterSet::new();
    template.set_reference_column_name("p0", SqlType::Int8, "c0");

    let (sender, receiver) = channel();
    db.execute_load(
        &prepared,
        Arc::new(template),
        vec![file],
        LoadOptions::default(),
        Box::new(move |status| {
            let _ = sender.send(status);
        }),
    )
    .unwrap();

    receiver
        .recv_timeout(Duration::from_secs(30))
        .expect("load completion never fired")
        .unwrap();
    assert_eq!(count_rows(&db), 2);
    db.stop().unwrap();
}

#[test]
fn test_load_missing_file_reports_error_exactly_once() {
    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();
    let prepared = prepare_insert(&db);

    let mut template = ParameterSet::new();
    template.set_reference_column_position("p0", SqlType::Int8, 0);

    let (sender, receiver) = channel();
    db.execute_load(
        &prepared,
        Arc::new(template),
        vec![PathBuf::from("/no/such/file.arrow")],
        LoadOptions::default(),
        Box::new(move |status| {
            let _ = sender.send(status);
        }),
    )
    .unwrap();

    let info = receiver
        .recv_timeout(Duration::from_secs(30))
        .expect("load completion never fired")
        .unwrap_err();
    assert_eq!(info.code(), ErrorCode::LoadFileException);
    assert!(info.supplemental_text().contains("file:"));
    // Exactly once: no second completion arrives.
    assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(count_rows(&db), 0);
    db.stop().unwrap();
}

#[test]
fn test_load_duplicate_key_aborts_with_first_error() {
    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();
    let prepared = prepare_insert(&db);

    let dir = tempfile::tempdir().unwrap();
    // The duplicate sits inside one block, so the second insert observes the
    // first through its own transaction.
    let file = write_ipc_file(&dir, "dup.arrow", &[vec![1, 1]]);

    let mut template = ParameterSet::new();
    template.set_reference_column_position("p0", SqlType::Int8, 0);

    let (sender, receiver) = channel();
    let (_, executor) = db
        .execute_load_with_factory(
            &prepared,
            Arc::new(template),
            vec![file],
            LoadOptions::default(),
            Arc::new(kvsql_core::load::ArrowIpcReaderFactory),
            Box::new(move |status| {
                let _ = sender.send(status);
            }),
        )
        .unwrap();

    let info = receiver
        .recv_timeout(Duration::from_secs(30))
        .expect("load completion never fired")
        .unwrap_err();
    assert_eq!(info.code(), ErrorCode::UniqueConstraintViolationException);
    assert!(info.supplemental_text().contains("block:0"));
    assert!(executor.state().finished());
    assert_eq!(executor.state().running_statements(), 0);
    db.stop().unwrap();
}
