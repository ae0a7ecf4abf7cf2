use std::{fmt, io};
use thiserror::Error;

/// Unified error type for all kvsql operations.
///
/// Each variant corresponds to one of the error codes surfaced at the service
/// boundary. Variants carry a human-readable message; [`Error::code`] exposes
/// the stable code used by clients for programmatic matching.
///
/// # Thread Safety
///
/// `Error` implements `Send` and `Sync`, allowing errors to travel through
/// task completion callbacks and across scheduler worker threads.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during file or storage operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow error during columnar data handling (result-set record batches,
    /// batch-load input files).
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid user input or API parameter.
    ///
    /// Also raised for handles that are not present in the store they were
    /// expected in (e.g. destroying an unknown statement).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted against an object in the wrong lifecycle state,
    /// e.g. starting a database whose persisted metadata is too old.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A named entity was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A bounded wait expired, e.g. the stop-loop quiesce timeout.
    #[error("operation timed out: {0}")]
    TimedOut(String),

    /// Prepared statement handle did not resolve in any store.
    #[error("statement not found: {0}")]
    StatementNotFound(String),

    /// A table, index or sequence referenced by name does not exist.
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// A table, index or sequence with the given name already exists.
    #[error("target already exists: {0}")]
    TargetAlreadyExists(String),

    /// The transaction is no longer active (committed, aborted, or failed).
    #[error("inactive transaction: {0}")]
    InactiveTransaction(String),

    /// The storage engine refused to begin a transaction because a resource
    /// limit (e.g. the concurrent transaction cap) was reached.
    #[error("transaction exceeded limit: {0}")]
    TransactionExceededLimit(String),

    /// Generic SQL execution failure reported by the compiler or an operator.
    #[error("SQL execution failed: {0}")]
    SqlExecution(String),

    /// Failure inside the service layer itself rather than SQL semantics.
    #[error("SQL service error: {0}")]
    SqlService(String),

    /// Concurrency-control failure: the commit could not be serialized.
    #[error("serialization failure: {0}")]
    CcError(String),

    /// A long transaction's declared write-preserve set conflicted with
    /// another transaction.
    #[error("conflict on write preserve: {0}")]
    ConflictOnWritePreserve(String),

    /// The statement's result shape is inconsistent with the supplied output
    /// channel (e.g. a non-query executed against a record channel).
    #[error("inconsistent statement: {0}")]
    InconsistentStatement(String),

    /// A batch-load input file could not be opened or decoded.
    #[error("load file error: {0}")]
    LoadFile(String),

    /// A unique constraint (primary key or unique index) was violated.
    #[error("unique constraint violation: {0}")]
    UniqueConstraintViolation(String),

    /// Expression evaluation failed (bad cast, overflow, invalid operand).
    #[error("value evaluation error: {0}")]
    ValueEvaluation(String),

    /// An encoded value exceeded the storage engine's key length limit.
    #[error("value too long: {0}")]
    ValueTooLong(String),

    /// The caller lacks permission for the requested operation.
    #[error("permission error: {0}")]
    PermissionError(String),

    /// The operation is restricted in the current configuration.
    #[error("restricted operation: {0}")]
    RestrictedOperation(String),

    /// The operation is illegal in the object's current state, e.g. commit
    /// while in-transaction tasks are still running.
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    /// The request was canceled by the caller before it completed.
    #[error("canceled: {0}")]
    Canceled(String),

    /// Internal error indicating a bug or unexpected state.
    ///
    /// This should never occur during normal operation; the message names the
    /// violated invariant.
    #[error("an internal operation failed: {0}")]
    Internal(String),
}

/// Stable error codes surfaced to clients.
///
/// One code per [`Error`] variant; the mapping never changes once published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    IoError,
    InvalidArgument,
    InvalidState,
    NotFound,
    TimeOut,
    StatementNotFoundException,
    TargetNotFoundException,
    TargetAlreadyExistsException,
    InactiveTransactionException,
    TransactionExceededLimitException,
    SqlExecutionException,
    SqlServiceException,
    CcException,
    ConflictOnWritePreserveException,
    InconsistentStatementException,
    LoadFileException,
    UniqueConstraintViolationException,
    ValueEvaluationException,
    ValueTooLongException,
    PermissionError,
    RestrictedOperationException,
    IllegalOperation,
    Canceled,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::IoError => "io_error",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::NotFound => "not_found",
            ErrorCode::TimeOut => "time_out",
            ErrorCode::StatementNotFoundException => "statement_not_found_exception",
            ErrorCode::TargetNotFoundException => "target_not_found_exception",
            ErrorCode::TargetAlreadyExistsException => "target_already_exists_exception",
            ErrorCode::InactiveTransactionException => "inactive_transaction_exception",
            ErrorCode::TransactionExceededLimitException => {
                "transaction_exceeded_limit_exception"
            }
            ErrorCode::SqlExecutionException => "sql_execution_exception",
            ErrorCode::SqlServiceException => "sql_service_exception",
            ErrorCode::CcException => "cc_exception",
            ErrorCode::ConflictOnWritePreserveException => "conflict_on_write_preserve_exception",
            ErrorCode::InconsistentStatementException => "inconsistent_statement_exception",
            ErrorCode::LoadFileException => "load_file_exception",
            ErrorCode::UniqueConstraintViolationException => {
                "unique_constraint_violation_exception"
            }
            ErrorCode::ValueEvaluationException => "value_evaluation_exception",
            ErrorCode::ValueTooLongException => "value_too_long_exception",
            ErrorCode::PermissionError => "permission_error",
            ErrorCode::RestrictedOperationException => "restricted_operation_exception",
            ErrorCode::IllegalOperation => "illegal_operation",
            ErrorCode::Canceled => "canceled",
            ErrorCode::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl Error {
    /// The stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Io(_) => ErrorCode::IoError,
            Error::Arrow(_) => ErrorCode::SqlServiceException,
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::InvalidState(_) => ErrorCode::InvalidState,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::TimedOut(_) => ErrorCode::TimeOut,
            Error::StatementNotFound(_) => ErrorCode::StatementNotFoundException,
            Error::TargetNotFound(_) => ErrorCode::TargetNotFoundException,
            Error::TargetAlreadyExists(_) => ErrorCode::TargetAlreadyExistsException,
            Error::InactiveTransaction(_) => ErrorCode::InactiveTransactionException,
            Error::TransactionExceededLimit(_) => ErrorCode::TransactionExceededLimitException,
            Error::SqlExecution(_) => ErrorCode::SqlExecutionException,
            Error::SqlService(_) => ErrorCode::SqlServiceException,
            Error::CcError(_) => ErrorCode::CcException,
            Error::ConflictOnWritePreserve(_) => ErrorCode::ConflictOnWritePreserveException,
            Error::InconsistentStatement(_) => ErrorCode::InconsistentStatementException,
            Error::LoadFile(_) => ErrorCode::LoadFileException,
            Error::UniqueConstraintViolation(_) => ErrorCode::UniqueConstraintViolationException,
            Error::ValueEvaluation(_) => ErrorCode::ValueEvaluationException,
            Error::ValueTooLong(_) => ErrorCode::ValueTooLongException,
            Error::PermissionError(_) => ErrorCode::PermissionError,
            Error::RestrictedOperation(_) => ErrorCode::RestrictedOperationException,
            Error::IllegalOperation(_) => ErrorCode::IllegalOperation,
            Error::Canceled(_) => ErrorCode::Canceled,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Convenience constructor for I/O-classified errors built from a message
    /// rather than a propagated `io::Error`.
    #[inline]
    pub fn io_message<M: fmt::Display>(msg: M) -> Self {
        Error::Io(io::Error::other(msg.to_string()))
    }

    /// Whether this error represents caller-initiated cancellation.
    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled(_))
    }
}
