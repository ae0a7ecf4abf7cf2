//! Error types and result definitions for the kvsql SQL execution engine.
//!
//! This crate provides the unified error type ([`Error`]) and result type alias
//! ([`Result<T>`]) used throughout all kvsql crates, plus the [`ErrorInfo`]
//! diagnostics record handed to asynchronous completion callbacks.
//!
//! # Error Philosophy
//!
//! kvsql uses a single error enum rather than crate-specific error types.
//! This approach:
//! - Simplifies error handling across crate boundaries
//! - Allows errors to propagate naturally with the `?` operator
//! - Gives every user-visible failure a stable [`ErrorCode`]
//!
//! # Error Categories
//!
//! - **Input errors** (`InvalidArgument`, `SqlExecution` on compile): malformed
//!   SQL, unknown identifiers, type mismatches. Surfaced synchronously.
//! - **State errors** (`InvalidState`, `InactiveTransaction`,
//!   `StatementNotFound`): operations against closed or missing objects.
//! - **Contention errors** (`CcError`, `WritePreserveConflict`,
//!   `UniqueConstraintViolation`): surfaced through commit or statement
//!   callbacks; the transaction becomes inactive.
//! - **Resource errors** (`TransactionLimitExceeded`, `ValueTooLong`).
//! - **External errors** (`Io`, `LoadFile`): abort the current unit of work.

pub mod error;
pub mod info;
pub mod result;

pub use error::{Error, ErrorCode};
pub use info::ErrorInfo;
pub use result::Result;
