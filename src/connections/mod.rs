//! Backend connections.
//!
//! A connection is anything that can execute raw SQL and hand back a
//! columnar table. Two concrete backends exist: a pooled SQL database
//! (MySQL or PostgreSQL) and an embedded analytical database file. The
//! factory picks one from the `connection_class` of a secret.

mod embedded;
mod sqldb;

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use serde::Deserialize;

pub use embedded::EmbeddedDatabase;
pub use sqldb::{Flavour, SqlDatabase};

use crate::error::{MimirError, MimirResult};

/// A columnar query result: one schema, zero or more record batches.
#[derive(Debug, Clone)]
pub struct ArrowTable {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl ArrowTable {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        ArrowTable { schema, batches }
    }

    /// Build a table from non-empty batches, taking the schema of the first.
    pub fn from_batches(batches: Vec<RecordBatch>) -> MimirResult<Self> {
        let schema = batches
            .first()
            .map(|batch| batch.schema())
            .ok_or_else(|| MimirError::query("cannot build a table from zero batches"))?;
        Ok(ArrowTable { schema, batches })
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect()
    }
}

/// Capability shared by every backend: execute SQL, return columns.
///
/// Implementations are either internally pooled and thread-safe or open a
/// fresh handle per call; both make `execute` safe to run from blocking
/// workers of concurrent inquiries.
pub trait Connection: Send + Sync {
    fn execute(&self, sql: &str) -> MimirResult<ArrowTable>;
}

/// A connection secret as stored in `<secrets>/<connection_name>.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSecret {
    pub connection_class: String,
    #[serde(default)]
    pub flavour: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Database or schema name for pooled backends.
    #[serde(default)]
    pub schema: Option<String>,
    /// Database file path for the embedded backend.
    #[serde(default)]
    pub path: Option<String>,
}

/// Builds connections out of secrets. The default factory covers the two
/// built-in classes; tests substitute their own.
pub trait ConnectionFactory: Send + Sync {
    fn create(
        &self,
        connection_name: &str,
        secret: &ConnectionSecret,
    ) -> MimirResult<Arc<dyn Connection>>;
}

/// Maps `connection_class` onto the built-in backends.
#[derive(Debug, Default)]
pub struct DefaultConnectionFactory;

impl ConnectionFactory for DefaultConnectionFactory {
    fn create(
        &self,
        connection_name: &str,
        secret: &ConnectionSecret,
    ) -> MimirResult<Arc<dyn Connection>> {
        match secret.connection_class.as_str() {
            "sqldb" => Ok(Arc::new(SqlDatabase::from_secret(connection_name, secret)?)),
            "embedded" => Ok(Arc::new(EmbeddedDatabase::from_secret(
                connection_name,
                secret,
            )?)),
            other => Err(MimirError::NotImplemented(format!(
                "connection class '{other}' is not supported (expected 'sqldb' or 'embedded')"
            ))),
        }
    }
}
