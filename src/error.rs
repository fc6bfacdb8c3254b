//! Error types shared across the crate.
//!
//! The taxonomy is small and user-facing: configuration problems, query
//! construction problems, backend transport problems, and explicitly
//! unimplemented surface. Adapters map these onto exit codes and HTTP
//! statuses; none of them carry backtraces into user output.

/// Errors that can occur while resolving, planning, or executing an inquiry.
#[derive(Debug, thiserror::Error)]
pub enum MimirError {
    /// Missing, unparseable, or semantically invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Query construction failed or a source has no usable connection.
    #[error("query error: {0}")]
    Query(String),

    /// Backend transport or authentication failure at execution time.
    #[error("connection error: {0}")]
    Connection(String),

    /// A supported-surface boundary was hit.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// SQL that should have parsed did not.
    #[error("SQL parse error: {0}")]
    SqlParse(#[from] sqlparser::parser::ParserError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MimirResult<T> = Result<T, MimirError>;

impl MimirError {
    /// Shorthand for a configuration error with a formatted message.
    pub fn config(msg: impl Into<String>) -> Self {
        MimirError::Config(msg.into())
    }

    /// Shorthand for a query error with a formatted message.
    pub fn query(msg: impl Into<String>) -> Self {
        MimirError::Query(msg.into())
    }

    /// Shorthand for a connection error with a formatted message.
    pub fn connection(msg: impl Into<String>) -> Self {
        MimirError::Connection(msg.into())
    }
}
