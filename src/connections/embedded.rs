//! Embedded analytical file backend.
//!
//! Treats a local DuckDB file as a SQL table store. A fresh handle is
//! opened per call, so the backend carries no shared state and is trivially
//! safe under concurrent inquiries.

use std::path::PathBuf;

use arrow::record_batch::RecordBatch;

use super::{ArrowTable, Connection, ConnectionSecret};
use crate::error::{MimirError, MimirResult};

/// A connection to an embedded database file.
pub struct EmbeddedDatabase {
    name: String,
    path: PathBuf,
}

impl EmbeddedDatabase {
    pub fn from_secret(connection_name: &str, secret: &ConnectionSecret) -> MimirResult<Self> {
        let path = secret.path.clone().ok_or_else(|| {
            MimirError::config(format!(
                "secret '{connection_name}' is missing the required 'path' field"
            ))
        })?;
        Ok(EmbeddedDatabase {
            name: connection_name.to_string(),
            path: PathBuf::from(path),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn transport_err(&self, err: impl std::fmt::Display) -> MimirError {
        MimirError::connection(format!("connection '{}': {err}", self.name))
    }
}

impl Connection for EmbeddedDatabase {
    fn execute(&self, sql: &str) -> MimirResult<ArrowTable> {
        let conn = duckdb::Connection::open(&self.path).map_err(|e| self.transport_err(e))?;
        let mut statement = conn.prepare(sql).map_err(|e| self.transport_err(e))?;
        let arrow = statement
            .query_arrow([])
            .map_err(|e| self.transport_err(e))?;
        let schema = arrow.get_schema();
        let batches: Vec<RecordBatch> = arrow.collect();
        Ok(ArrowTable::new(schema, batches))
    }
}
