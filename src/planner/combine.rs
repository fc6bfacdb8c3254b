//! The per-inquiry combination substrate.
//!
//! An in-memory DuckDB instance that accepts named Arrow tables and
//! executes the combined federated SQL over them. Lifetime is exactly one
//! inquiry; dropping the context tears the engine down on every exit path.

use arrow::record_batch::RecordBatch;
use duckdb::vtab::arrow::{arrow_recordbatch_to_query_params, ArrowVTab};

use crate::connections::ArrowTable;
use crate::error::{MimirError, MimirResult};

/// An ephemeral in-process analytical engine.
pub struct CombineContext {
    conn: duckdb::Connection,
}

impl CombineContext {
    pub fn new() -> MimirResult<Self> {
        let conn = duckdb::Connection::open_in_memory().map_err(substrate_err)?;
        conn.register_table_function::<ArrowVTab>("arrow")
            .map_err(substrate_err)?;
        Ok(CombineContext { conn })
    }

    /// Register a columnar table under a name the combined SQL can reference.
    pub fn register(&self, name: &str, table: &ArrowTable) -> MimirResult<()> {
        let mut batches = table.batches.iter();
        // A zero-batch result still registers its schema.
        let first = batches
            .next()
            .cloned()
            .unwrap_or_else(|| RecordBatch::new_empty(table.schema.clone()));
        self.conn
            .execute(
                &format!("CREATE TABLE {name} AS SELECT * FROM arrow(?, ?)"),
                arrow_recordbatch_to_query_params(first),
            )
            .map_err(substrate_err)?;
        for batch in batches {
            self.conn
                .execute(
                    &format!("INSERT INTO {name} SELECT * FROM arrow(?, ?)"),
                    arrow_recordbatch_to_query_params(batch.clone()),
                )
                .map_err(substrate_err)?;
        }
        Ok(())
    }

    /// Execute SQL over the registered tables.
    pub fn execute(&self, sql: &str) -> MimirResult<ArrowTable> {
        let mut statement = self.conn.prepare(sql).map_err(substrate_err)?;
        let arrow = statement.query_arrow([]).map_err(substrate_err)?;
        let schema = arrow.get_schema();
        let batches: Vec<RecordBatch> = arrow.collect();
        Ok(ArrowTable::new(schema, batches))
    }
}

fn substrate_err(err: duckdb::Error) -> MimirError {
    MimirError::query(format!("combination substrate: {err}"))
}
