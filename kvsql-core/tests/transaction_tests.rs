//! Transaction pipeline behavior: begin (sync and async, with the LTX
//! readiness wait and cancellation), abort idempotence, commit gating, and
//! commit profiling.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use kvsql_core::{
    CommitOptions, CommitResponseKind, Database, DatabaseConfig, TransactionHandle,
    TransactionOptions, TransactionType,
};
use kvsql_plan::{ParameterSet, StatsSnapshot};
use kvsql_result::{ErrorCode, ErrorInfo, Result};
use kvsql_sql::DefaultSqlCompiler;

fn test_db() -> Database {
    test_db_with(DatabaseConfig {
        thread_pool_size: 2,
        ..Default::default()
    })
}

fn test_db_with(config: DatabaseConfig) -> Database {
    let db = Database::new(config, Arc::new(DefaultSqlCompiler::new()));
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

fn ltx_on(table: &str) -> TransactionOptions {
    TransactionOptions {
        transaction_type: TransactionType::Ltx,
        write_preserve: vec![table.to_string()],
        ..Default::default()
    }
}

#[test]
fn test_abort_is_idempotent_and_commit_after_abort_is_inactive() {
    let db = test_db();
    let tx = db.create_transaction(TransactionOptions::default()).unwrap();

    db.abort_transaction(&tx).unwrap();
    // A second abort is ok and has no side effects.
    db.abort_transaction(&tx).unwrap();

    let err = db.commit(&tx, Default::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InactiveTransactionException);

    db.destroy_transaction(&tx).unwrap();
    db.stop().unwrap();
}

#[test]
fn test_abort_after_commit_is_ok_and_has_no_effect() {
    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();

    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    exec(&db, Some(&tx), "INSERT INTO t VALUES (7)").unwrap();
    db.commit(&tx, Default::default()).unwrap();
    db.abort_transaction(&tx).unwrap();
    db.destroy_transaction(&tx).unwrap();

    // The committed row is still there.
    let reader = db.create_transaction(TransactionOptions::default()).unwrap();
    let stats = exec(&db, Some(&reader), "DELETE FROM t WHERE c0 = 7").unwrap();
    assert_eq!(stats.deleted, 1);
    db.abort_transaction(&reader).unwrap();
    db.destroy_transaction(&reader).unwrap();
    db.stop().unwrap();
}

#[test]
fn test_destroy_unknown_handle_is_invalid_argument() {
    let db = test_db();
    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    db.abort_transaction(&tx).unwrap();
    db.destroy_transaction(&tx).unwrap();
    let err = db.destroy_transaction(&tx).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    db.stop().unwrap();
}

#[test]
fn test_begin_with_unknown_write_preserve_table() {
    let db = test_db();
    let err = db.create_transaction(ltx_on("no_such_table")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::TargetNotFoundException);
    db.stop().unwrap();
}

#[test]
fn test_ltx_write_preserve_ordering() {
    let db = test_db();
    exec(
        &db,
        None,
        "CREATE TABLE t (c0 BIGINT PRIMARY KEY, c1 DOUBLE)",
    )
    .unwrap();

    let tx1 = db.create_transaction(ltx_on("t")).unwrap();

    // tx2's begin-wait cannot complete while tx1 holds the overlapping
    // write-preserve set.
    let (sender, receiver) = channel();
    db.create_transaction_async(
        ltx_on("t"),
        Box::new(move |handle, status| {
            let _ = sender.send((handle, status));
        }),
    )
    .unwrap();
    assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());

    exec(&db, Some(&tx1), "INSERT INTO t VALUES (1, 1.0)").unwrap();
    db.commit(&tx1, Default::default()).unwrap();
    db.destroy_transaction(&tx1).unwrap();

    let (handle, status) = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("second LTX never became ready");
    status.unwrap();
    let tx2 = handle.expect("second LTX has no handle");

    exec(&db, Some(&tx2), "INSERT INTO t VALUES (2, 2.0)").unwrap();
    db.commit(&tx2, Default::default()).unwrap();
    db.destroy_transaction(&tx2).unwrap();

    let reader = db.create_transaction(TransactionOptions::default()).unwrap();
    let stats = exec(&db, Some(&reader), "DELETE FROM t WHERE c0 >= 1").unwrap();
    assert_eq!(stats.deleted, 2);
    db.abort_transaction(&reader).unwrap();
    db.destroy_transaction(&reader).unwrap();
    db.stop().unwrap();
}

#[test]
fn test_ltx_begin_wait_is_cancelable() {
    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();

    let blocker = db.create_transaction(ltx_on("t")).unwrap();

    let cancel = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = channel();
    db.create_transaction_async_with_source(
        ltx_on("t"),
        Some(Arc::clone(&cancel)),
        Box::new(move |handle, status| {
            let _ = sender.send((handle, status));
        }),
    )
    .unwrap();
    assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());

    cancel.store(true, std::sync::atomic::Ordering::SeqCst);
    let (handle, status) = receiver
        .recv_timeout(Duration::from_secs(10))
        .expect("cancel never delivered");
    assert!(handle.is_none());
    assert_eq!(status.unwrap_err().code(), ErrorCode::Canceled);

    db.abort_transaction(&blocker).unwrap();
    db.destroy_transaction(&blocker).unwrap();
    db.stop().unwrap();
}

#[test]
fn test_commit_response_kinds() {
    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();

    for (value, kind) in [
        (1, CommitResponseKind::Accepted),
        (2, CommitResponseKind::Available),
        (3, CommitResponseKind::Stored),
        (4, CommitResponseKind::Propagated),
    ] {
        let tx = db.create_transaction(TransactionOptions::default()).unwrap();
        exec(&db, Some(&tx), &format!("INSERT INTO t VALUES ({value})")).unwrap();
        db.commit(
            &tx,
            CommitOptions {
                response_kind: kind,
                ..Default::default()
            },
        )
        .unwrap();
        db.destroy_transaction(&tx).unwrap();
    }

    let reader = db.create_transaction(TransactionOptions::default()).unwrap();
    let stats = exec(&db, Some(&reader), "DELETE FROM t WHERE c0 >= 1").unwrap();
    assert_eq!(stats.deleted, 4);
    db.abort_transaction(&reader).unwrap();
    db.destroy_transaction(&reader).unwrap();
    db.stop().unwrap();
}

#[test]
fn test_commit_auto_dispose_removes_handle() {
    let db = test_db();
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();
    let tx = db.create_transaction(TransactionOptions::default()).unwrap();
    exec(&db, Some(&tx), "INSERT INTO t VALUES (1)").unwrap();
    db.commit(
        &tx,
        CommitOptions {
            auto_dispose: true,
            ..Default::default()
        },
    )
    .unwrap();
    let err = db.destroy_transaction(&tx).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    db.stop().unwrap();
}

#[test]
fn test_commit_profile_is_folded_into_stats() {
    let db = test_db_with(DatabaseConfig {
        thread_pool_size: 2,
        profile_commits: true,
        ..Default::default()
    });
    exec(&db, None, "CREATE TABLE t (c0 BIGINT PRIMARY KEY)").unwrap();

    for value in 1..=2 {
        let tx = db.create_transaction(TransactionOptions::default()).unwrap();
        exec(&db, Some(&tx), &format!("INSERT INTO t VALUES ({value})")).unwrap();
        db.commit(&tx, Default::default()).unwrap();
        db.destroy_transaction(&tx).unwrap();
    }

    let stats = db.commit_stats();
    assert_eq!(stats.commit_count(), 2);
    assert_eq!(stats.request_to_precommit().count(), 2);
    // Whether durability fired or was skipped, the completion phase is
    // recorded for both commits.
    assert_eq!(stats.durability_to_completion().count(), 2);
    let json = stats.to_json();
    assert_eq!(json["counters"]["commit_requested"].as_u64(), Some(2));

    db.stop().unwrap();
}

#[test]
fn test_read_only_transaction_begins_and_aborts() {
    let db = test_db();
    let tx = db
        .create_transaction(TransactionOptions {
            transaction_type: TransactionType::ReadOnly,
            ..Default::default()
        })
        .unwrap();
    db.abort_transaction(&tx).unwrap();
    db.destroy_transaction(&tx).unwrap();
    db.stop().unwrap();
}
