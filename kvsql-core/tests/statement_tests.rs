//! Prepared-statement store behavior: registration scope, destroy
//! semantics, resolve failures.

use std::sync::Arc;

use kvsql_core::{Database, DatabaseConfig, StatementHandle};
use kvsql_plan::{CompileOptions, ParameterSet};
use kvsql_result::ErrorCode;
use kvsql_sql::DefaultSqlCompiler;

fn test_db() -> Database {
    let db = Database::new(
        DatabaseConfig {
            thread_pool_size: 2,
            ..Default::default()
        },
        Arc::new(DefaultSqlCompiler::new()),
    );
    db.start().unwrap();
    db
}

fn create_table(db: &Database) {
    let statement = db
        .create_executable(
            "CREATE TABLE t (c0 BIGINT PRIMARY KEY)",
            Arc::new(ParameterSet::new()),
        )
        .unwrap();
    db.execute_async(None, &statement, None, Box::new(|status, _| status.unwrap()), true)
        .unwrap();
}

fn session_options(session_id: u64) -> CompileOptions {
    CompileOptions {
        session_id: Some(session_id),
        ..Default::default()
    }
}

#[test]
fn test_prepare_then_destroy_leaves_nothing_behind() {
    let db = test_db();
    create_table(&db);

    let handle = db
        .prepare("SELECT c0 FROM t", CompileOptions::default())
        .unwrap();
    db.destroy_statement(&handle).unwrap();

    let err = db
        .resolve(&handle, Arc::new(ParameterSet::new()))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StatementNotFoundException);

    let err = db.destroy_statement(&handle).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    db.stop().unwrap();
}

#[test]
fn test_session_scoped_statement_resolves_only_in_its_session() {
    let db = test_db();
    create_table(&db);

    let scoped = db
        .prepare("SELECT c0 FROM t", session_options(7))
        .unwrap();
    assert_eq!(scoped.session_id(), Some(7));

    // The same surrogate id is invisible through the global store and
    // through other sessions.
    let global_alias = StatementHandle::new(scoped.surrogate_id(), None);
    assert!(db
        .resolve(&global_alias, Arc::new(ParameterSet::new()))
        .is_err());
    let foreign_alias = StatementHandle::new(scoped.surrogate_id(), Some(8));
    assert!(db
        .resolve(&foreign_alias, Arc::new(ParameterSet::new()))
        .is_err());

    db.resolve(&scoped, Arc::new(ParameterSet::new())).unwrap();
    db.stop().unwrap();
}

#[test]
fn test_statement_survives_destroy_of_other_session() {
    let db = test_db();
    create_table(&db);

    let mine = db.prepare("SELECT c0 FROM t", session_options(1)).unwrap();
    let theirs = db.prepare("SELECT c0 FROM t", session_options(2)).unwrap();

    db.dispose_session(2);
    // The other session's statement is gone; this session's survives.
    assert!(db.resolve(&theirs, Arc::new(ParameterSet::new())).is_err());
    db.resolve(&mine, Arc::new(ParameterSet::new())).unwrap();

    db.dispose_session(1);
    assert!(db.resolve(&mine, Arc::new(ParameterSet::new())).is_err());
    db.stop().unwrap();
}

#[test]
fn test_create_executable_is_not_registered() {
    let db = test_db();
    create_table(&db);

    let statement = db
        .create_executable("SELECT c0 FROM t", Arc::new(ParameterSet::new()))
        .unwrap();
    assert!(statement.result_shape().is_some());

    // Nothing was published to any store.
    let fabricated = StatementHandle::new(u64::MAX, None);
    assert_eq!(
        db.destroy_statement(&fabricated).unwrap_err().code(),
        ErrorCode::InvalidArgument
    );
    db.stop().unwrap();
}

#[test]
fn test_compile_failure_publishes_nothing() {
    let db = test_db();
    let err = db
        .prepare("SELECT FROM WHERE", CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::SqlExecutionException);

    let err = db
        .prepare("FROBNICATE ALL THE THINGS", CompileOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::SqlExecutionException);
    db.stop().unwrap();
}
