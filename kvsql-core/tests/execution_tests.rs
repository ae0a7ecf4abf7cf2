//! End-to-end statement execution through the full pipeline: compile,
//! transaction begin, scheduled execution, three-phase commit.

use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, Float64Array, Int64Array};
use arrow::record_batch::RecordBatch;
use kvsql_core::{Database, DatabaseConfig, TransactionHandle, TransactionOptions};
use kvsql_plan::{
    ChannelKind, CompileOptions, ParameterSet, RecordChannel, ResultStore, SqlType, StatsSnapshot,
    Value,
};
use kvsql_result::{Error, ErrorCode, ErrorInfo, Result};
use kvsql_sql::DefaultSqlCompiler;

fn test_db() -> Database {
    let config = DatabaseConfig {
        thread_pool_size: 2,
        ..Default::default()
    };
    let db = Database::new(config, Arc::new(DefaultSqlCompiler::new()));
    db.start().unwrap();
    db
}

fn exec(db: &Database, tx: Option<&TransactionHandle>, sql: &str) -> Result<StatsSnapshot> {
    exec_params(db, tx, sql, ParameterSet::new())
}

fn exec_params(
    db: &Database,
    tx: Option<&TransactionHandle>,
    sql: &str,
    params: ParameterSet,
) -> Result<StatsSnapshot> {
    let statement = db.create_executable(sql, Arc::new(params))?;
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

fn query(db: &Database, tx: &TransactionHandle, sql: &str) -> Result<Vec<RecordBatch>> {
    let store = Arc::new(ResultStore::new());
    let statement = db.create_executable(sql, Arc::new(ParameterSet::new()))?;
    let (sender, receiver) = channel();
    db.execute_async(
        Some(tx),
        &statement,
        Some(Arc::clone(&store) as Arc<dyn RecordChannel>),
        Box::new(move |status, _| {
            let _ = sender.send(status);
        }),
        true,
    )?;
    receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("query completion never fired")
        .map_err(ErrorInfo::into_error)?;
    Ok(store.take_batches())
}

fn int64_values(batches: &[RecordBatch], column: usize) -> Vec<i64> {
    let mut out = Vec::new();
    for batch in batches {
        let array = batch
            .column(column)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("expected an Int64 column");
        for i in 0..array.len() {
            out.push(array.value(i));
        }
    }
    out
}

#[test]
fn test_create_insert_select_order_by() {
    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();

    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    exec(&db, Some(&tx), "INSERT INTO t VALUES (2), (1)").unwrap();
    db.commit(&tx, Default::default()).unwrap();
    db.destroy_transaction(&tx).unwrap();

    let reader = db.create_transaction(TransactionOptions::default()).unwrap();
    let batches = query(&db, &reader, "SELECT c0 FROM t ORDER BY c0").unwrap();
    assert_eq!(int64_values(&batches, 0), vec![1, 2]);
    db.abort_transaction(&reader).unwrap();
    db.destroy_transaction(&reader).unwrap();

    db.stop().unwrap();
}

#[test]
fn test_duplicate_insert_fails_statement_and_commit() {
    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();

    let tx1 = db.create_transaction(TransactionOptions::default()).unwrap();
    exec(&db, Some(&tx1), "INSERT INTO t VALUES (1)").unwrap();
    db.commit(&tx1, Default::default()).unwrap();
    db.destroy_transaction(&tx1).unwrap();

    // The identical insert on a second transaction hits the unique
    // constraint at execution, and its commit reports a serialization
    // failure.
    let tx2 = db.create_transaction(TransactionOptions::default()).unwrap();
    let err = exec(&db, Some(&tx2), "INSERT INTO t VALUES (1)").unwrap_err();
    assert_eq!(err.code(), ErrorCode::UniqueConstraintViolationException);

    let commit_err = db.commit(&tx2, Default::default()).unwrap_err();
    assert_eq!(commit_err.code(), ErrorCode::CcException);
    db.destroy_transaction(&tx2).unwrap();

    db.stop().unwrap();
}

#[test]
fn test_select_filter_count_update_delete() {
    let db = test_db();
    exec(
        &db,
        None,
        "CREATE TABLE t (c0 BIGINT PRIMARY KEY, c1 DOUBLE)",
    )
    .unwrap();

    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    let stats = exec(
        &db,
        Some(&tx),
        "INSERT INTO t VALUES (1, 1.5), (2, 2.5), (3, 3.5)",
    )
    .unwrap();
    assert_eq!(stats.inserted, 3);
    db.commit(&tx, Default::default()).unwrap();
    db.destroy_transaction(&tx).unwrap();

    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    let batches = query(&db, &tx, "SELECT c0 FROM t WHERE c0 >= 2 ORDER BY c0").unwrap();
    assert_eq!(int64_values(&batches, 0), vec![2, 3]);

    let count = query(&db, &tx, "SELECT count(*) FROM t").unwrap();
    assert_eq!(int64_values(&count, 0), vec![3]);

    let stats = exec(&db, Some(&tx), "UPDATE t SET c1 = 9.0 WHERE c0 = 2").unwrap();
    assert_eq!(stats.updated, 1);
    let stats = exec(&db, Some(&tx), "DELETE FROM t WHERE c0 = 1").unwrap();
    assert_eq!(stats.deleted, 1);
    db.commit(&tx, Default::default()).unwrap();
    db.destroy_transaction(&tx).unwrap();

    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    let batches = query(&db, &tx, "SELECT c0, c1 FROM t ORDER BY c0").unwrap();
    assert_eq!(int64_values(&batches, 0), vec![2, 3]);
    let doubles: Vec<f64> = batches
        .iter()
        .flat_map(|batch| {
            let array = batch
                .column(1)
                .as_any()
                .downcast_ref::<Float64Array>()
                .expect("expected a Float64 column");
            (0..array.len()).map(|i| array.value(i)).collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(doubles, vec![9.0, 3.5]);
    db.abort_transaction(&tx).unwrap();
    db.destroy_transaction(&tx).unwrap();

    db.stop().unwrap();
}

#[test]
fn test_parameterized_statement_via_prepare_resolve() {
    let db = test_db();
    exec(
        &db,
        None,
        "CREATE TABLE t (c0 BIGINT PRIMARY KEY, c1 VARCHAR)",
    )
    .unwrap();

    let mut host_variables = rustc_hash_map();
    host_variables.insert("p0".to_string(), SqlType::Int8);
    host_variables.insert("p1".to_string(), SqlType::text());
    let prepared = db
        .prepare(
            "INSERT INTO t VALUES (:p0, :p1)",
            CompileOptions {
                session_id: None,
                host_variables,
            },
        )
        .unwrap();

    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    let mut params = ParameterSet::new();
    params.set_value("p0", Value::Int8(42));
    params.set_value("p1", Value::Text("answer".into()));
    let (sender, receiver) = channel();
    db.execute_on_context_async(
        &tx,
        &prepared,
        Arc::new(params),
        None,
        Box::new(move |status, stats| {
            let _ = sender.send((status, stats));
        }),
        true,
    )
    .unwrap();
    let (status, stats) = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("completion never fired");
    status.unwrap();
    assert_eq!(stats.inserted, 1);
    db.commit(&tx, Default::default()).unwrap();
    db.destroy_transaction(&tx).unwrap();

    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    let batches = query(&db, &tx, "SELECT c0 FROM t WHERE c1 = 'answer'").unwrap();
    assert_eq!(int64_values(&batches, 0), vec![42]);
    db.abort_transaction(&tx).unwrap();
    db.destroy_transaction(&tx).unwrap();

    db.destroy_statement(&prepared).unwrap();
    db.stop().unwrap();
}

fn rustc_hash_map<V>() -> rustc_hash::FxHashMap<String, V> {
    rustc_hash::FxHashMap::default()
}

#[test]
fn test_oversized_secondary_key_aborts_transaction() {
    let db = test_db();
    exec(
        &db,
        None,
        "CREATE TABLE t (c0 BIGINT PRIMARY KEY, c1 VARCHAR)",
    )
    .unwrap();
    exec(&db, None, "CREATE INDEX t_c1 ON t (c1)").unwrap();

    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    exec(&db, Some(&tx), "INSERT INTO t VALUES (1, 'short')").unwrap();
    db.commit(&tx, Default::default()).unwrap();
    db.destroy_transaction(&tx).unwrap();

    // An update whose new value exceeds the secondary's key length limit
    // fails the statement and aborts the transaction; the primary row stays
    // intact.
    let oversized = "x".repeat(4096);
    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    let err = exec(
        &db,
        Some(&tx),
        &format!("UPDATE t SET c1 = '{oversized}' WHERE c0 = 1"),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValueTooLongException);
    db.destroy_transaction(&tx).unwrap();

    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    let batches = query(&db, &tx, "SELECT c0 FROM t WHERE c1 = 'short'").unwrap();
    assert_eq!(int64_values(&batches, 0), vec![1]);
    db.abort_transaction(&tx).unwrap();
    db.destroy_transaction(&tx).unwrap();

    db.stop().unwrap();
}

#[test]
fn test_non_query_rejects_record_channel() {
    struct RecordSink;
    impl RecordChannel for RecordSink {
        fn kind(&self) -> ChannelKind {
            ChannelKind::Record
        }
        fn write(&self, _batch: RecordBatch) -> Result<()> {
            Ok(())
        }
    }

    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();
    let tx = db.create_transaction(TransactionOptions::default()).unwrap();

    let statement = db
        .create_executable("INSERT INTO t VALUES (1)", Arc::new(ParameterSet::new()))
        .unwrap();
    let err = db
        .execute_async(
            Some(&tx),
            &statement,
            Some(Arc::new(RecordSink)),
            Box::new(|_, _| {}),
            true,
        )
        .unwrap_err();
    assert!(matches!(err, Error::InconsistentStatement(_)));

    db.abort_transaction(&tx).unwrap();
    db.destroy_transaction(&tx).unwrap();
    db.stop().unwrap();
}

#[test]
fn test_explain_has_no_side_effects() {
    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();
    let statement = db
        .create_executable("SELECT c0 FROM t", Arc::new(ParameterSet::new()))
        .unwrap();
    let rendered = db.explain(&statement).unwrap();
    assert!(rendered.contains("select"));
    assert!(rendered.contains("\"table\":\"t\""));
    db.stop().unwrap();
}
