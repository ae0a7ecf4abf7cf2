//! Minimal SQL compiler for kvsql.
//!
//! Implements the [`SqlCompiler`] seam over `sqlparser` for single-table
//! statements: CREATE TABLE (typed columns, primary key), CREATE INDEX,
//! DROP TABLE, INSERT ... VALUES with parameters, single-table SELECT with
//! projection, a primary-key-friendly WHERE shape, ORDER BY and COUNT(*),
//! plus UPDATE and DELETE with the same WHERE shapes.
//!
//! Compiled plans execute directly against the KV transaction in the
//! request context using the order-preserving key codec; the mirror
//! container reports the Arrow result shape and an estimated work level.
//! Anything outside the subset fails compilation; the core never sees
//! partial plans.
//!
//! [`SqlCompiler`]: kvsql_plan::SqlCompiler

mod compiler;
mod exec;
mod ir;

pub use compiler::DefaultSqlCompiler;
