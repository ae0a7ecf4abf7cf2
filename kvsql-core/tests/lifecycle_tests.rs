//! Database lifecycle: start validation, metadata recovery across restart,
//! stop quiesce and timeout.

use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use kvsql_core::catalog::LEGACY_SYSTEM_SEQUENCES_NAME;
use kvsql_core::{
    Database, DatabaseConfig, TransactionHandle, TransactionOptions, TransactionType,
};
use kvsql_kv::{KvEngine, StorageOptions};
use kvsql_plan::{ParameterSet, StatsSnapshot};
use kvsql_result::{ErrorCode, ErrorInfo, Result};
use kvsql_sql::DefaultSqlCompiler;

fn config() -> DatabaseConfig {
    DatabaseConfig {
        thread_pool_size: 2,
        ..Default::default()
    }
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

#[test]
fn test_start_twice_fails_and_stop_is_idempotent() {
    let db = Database::new(config(), Arc::new(DefaultSqlCompiler::new()));
    // Stopping a never-started database is a no-op.
    db.stop().unwrap();

    db.start().unwrap();
    assert_eq!(
        db.start().unwrap_err().code(),
        ErrorCode::InvalidState
    );
    db.stop().unwrap();
    db.stop().unwrap();
}

#[test]
fn test_invalid_core_assignment_aborts_start() {
    let db = Database::new(
        DatabaseConfig {
            core_affinity: true,
            force_numa_node: Some(0),
            ..config()
        },
        Arc::new(DefaultSqlCompiler::new()),
    );
    assert_eq!(db.start().unwrap_err().code(), ErrorCode::IoError);
}

#[test]
fn test_index_definitions_survive_restart() {
    let kv: Arc<dyn KvEngine> = kvsql_kv::mem::MemKv::open("restart-test");

    let db = Database::with_kv_engine(config(), Arc::new(DefaultSqlCompiler::new()), Arc::clone(&kv));
    db.start().unwrap();
    exec(
        &db,
        None,
        "CREATE TABLE t (c0 BIGINT PRIMARY KEY, c1 VARCHAR)",
    )
    .unwrap();
    exec(&db, None, "CREATE INDEX t_c1 ON t (c1)").unwrap();
    let before_table = db.catalog().tables().find("t").unwrap();
    let before_primary = db.catalog().indexes().find("t").unwrap();
    let before_secondary = db.catalog().indexes().find("t_c1").unwrap();
    db.stop().unwrap();

    let reopened =
        Database::with_kv_engine(config(), Arc::new(DefaultSqlCompiler::new()), Arc::clone(&kv));
    reopened.start().unwrap();
    assert_eq!(
        reopened.catalog().tables().find("t").as_deref(),
        Some(before_table.as_ref())
    );
    assert_eq!(
        reopened.catalog().indexes().find("t").as_deref(),
        Some(before_primary.as_ref())
    );
    assert_eq!(
        reopened.catalog().indexes().find("t_c1").as_deref(),
        Some(before_secondary.as_ref())
    );
    assert_eq!(reopened.catalog().list_tables(), vec!["t".to_string()]);
    reopened.stop().unwrap();
}

#[test]
fn test_data_survives_restart() {
    let kv: Arc<dyn KvEngine> = kvsql_kv::mem::MemKv::open("restart-data");

    let db = Database::with_kv_engine(config(), Arc::new(DefaultSqlCompiler::new()), Arc::clone(&kv));
    db.start().unwrap();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();
    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    exec(&db, Some(&tx), "INSERT INTO t VALUES (1), (2), (3)").unwrap();
    db.commit(&tx, Default::default()).unwrap();
    db.destroy_transaction(&tx).unwrap();
    db.stop().unwrap();

    let reopened =
        Database::with_kv_engine(config(), Arc::new(DefaultSqlCompiler::new()), Arc::clone(&kv));
    reopened.start().unwrap();
    let tx = reopened
        .create_transaction(TransactionOptions::default())
        .unwrap();
    let stats = exec(&reopened, Some(&tx), "DELETE FROM t WHERE c0 >= 1").unwrap();
    assert_eq!(stats.deleted, 3);
    reopened.abort_transaction(&tx).unwrap();
    reopened.destroy_transaction(&tx).unwrap();
    reopened.stop().unwrap();
}

#[test]
fn test_legacy_metadata_refuses_start() {
    let kv: Arc<dyn KvEngine> = kvsql_kv::mem::MemKv::open("legacy-test");
    kv.create_storage(LEGACY_SYSTEM_SEQUENCES_NAME, StorageOptions::default())
        .unwrap();

    let db = Database::with_kv_engine(config(), Arc::new(DefaultSqlCompiler::new()), kv);
    let err = db.start().unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    assert!(err.to_string().contains("too old"));
}

#[test]
fn test_stop_times_out_while_a_begin_wait_is_in_flight() {
    let db = Database::new(config(), Arc::new(DefaultSqlCompiler::new()));
    db.start().unwrap();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();

    let ltx = TransactionOptions {
        transaction_type: TransactionType::Ltx,
        write_preserve: vec!["t".to_string()],
        ..Default::default()
    };
    let blocker = db.create_transaction(ltx.clone()).unwrap();

    // The second LTX's begin-wait keeps a request in process indefinitely.
    let (sender, receiver) = channel();
    db.create_transaction_async(
        ltx,
        Box::new(move |handle, status| {
            let _ = sender.send((handle, status));
        }),
    )
    .unwrap();

    let err = db.stop().unwrap_err();
    assert_eq!(err.code(), ErrorCode::TimeOut);

    // Release the blocker; the waiter completes and stop succeeds.
    db.abort_transaction(&blocker).unwrap();
    db.destroy_transaction(&blocker).unwrap();
    let (handle, status) = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("blocked begin never completed");
    status.unwrap();
    let tx = handle.unwrap();
    db.abort_transaction(&tx).unwrap();
    db.destroy_transaction(&tx).unwrap();
    db.stop().unwrap();
}
