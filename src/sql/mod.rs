//! SQL parsing and AST manipulation.
//!
//! Everything that touches SQL text goes through `sqlparser` with the
//! `GenericDialect`; composition happens on the AST and the final statement
//! is emitted via `Display`. No string-level SQL surgery.

pub mod ast;
pub mod restricted;

pub use restricted::RestrictedSql;
