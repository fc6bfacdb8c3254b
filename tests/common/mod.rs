//! Shared fixtures: a configuration tree on disk plus a connection factory
//! that serves canned columnar results instead of dialing databases.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;

use mimir::catalog::FileConfigLoader;
use mimir::connections::{ArrowTable, Connection, ConnectionFactory, ConnectionSecret};
use mimir::engine::Engine;
use mimir::error::{MimirError, MimirResult};

pub fn write(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// Lay down the standard fixture tree: two sources, two metrics, one
/// dimension, and embedded-class secrets for both connections.
pub fn write_fixtures(dir: &Path) {
    write(
        &dir.join("configs/sources/sources.yaml"),
        r#"
my_source:
  sql: SELECT created_at, my_dimension, my_other_dimension, amount FROM raw_data
  time_col: created_at
  connection_name: my_connection
  description: sales facts
inventory:
  sql: SELECT snapshot_at, my_dimension, stock FROM inventory_raw
  time_col: snapshot_at
  connection_name: inventory_connection
"#,
    );
    write(
        &dir.join("configs/dimensions/my_dimension.yaml"),
        "name: my_dimension\ndescription: a shared dimension\n",
    );
    write(
        &dir.join("configs/metrics/my_metric.yaml"),
        "name: my_metric\nsource_name: my_source\nsql: SELECT SUM(amount) AS my_metric\n",
    );
    write(
        &dir.join("configs/metrics/stock_level.yaml"),
        "name: stock_level\nsource_name: inventory\nsql: SELECT SUM(stock) AS stock_level\n",
    );
    write(
        &dir.join("configs/metrics/my_metric_bad_source.yaml"),
        "name: my_metric_bad_source\nsource_name: nowhere\nsql: SELECT SUM(amount) AS my_metric_bad_source\n",
    );
    write(
        &dir.join("secrets/my_connection.json"),
        r#"{"connection_class": "embedded", "path": "/tmp/unused.duckdb"}"#,
    );
    write(
        &dir.join("secrets/inventory_connection.json"),
        r#"{"connection_class": "embedded", "path": "/tmp/unused.duckdb"}"#,
    );
}

/// A connection that answers every query with the same canned table.
struct StaticConnection {
    table: ArrowTable,
}

impl Connection for StaticConnection {
    fn execute(&self, _sql: &str) -> MimirResult<ArrowTable> {
        Ok(self.table.clone())
    }
}

/// A factory handing out canned results keyed by connection name.
pub struct StaticFactory {
    tables: HashMap<String, ArrowTable>,
}

impl StaticFactory {
    pub fn new(tables: Vec<(&str, ArrowTable)>) -> Self {
        StaticFactory {
            tables: tables
                .into_iter()
                .map(|(name, table)| (name.to_string(), table))
                .collect(),
        }
    }
}

impl ConnectionFactory for StaticFactory {
    fn create(
        &self,
        connection_name: &str,
        _secret: &ConnectionSecret,
    ) -> MimirResult<Arc<dyn Connection>> {
        let table = self.tables.get(connection_name).cloned().ok_or_else(|| {
            MimirError::config(format!("no canned result for connection '{connection_name}'"))
        })?;
        Ok(Arc::new(StaticConnection { table }))
    }
}

/// An engine over the fixture tree whose connections return canned tables.
pub fn engine_with_results(dir: &Path, tables: Vec<(&str, ArrowTable)>) -> Engine {
    let loader = FileConfigLoader::new(dir.join("configs"), Some(dir.join("secrets")));
    Engine::with_factory(
        Arc::new(loader),
        Arc::new(StaticFactory::new(tables)),
        true,
    )
}

/// An engine over the fixture tree that never binds connections.
pub fn offline_engine(dir: &Path) -> Engine {
    let loader = FileConfigLoader::new(dir.join("configs"), Some(dir.join("secrets")));
    Engine::new(Arc::new(loader), false)
}

pub fn strings(values: &[&str]) -> ArrayRef {
    Arc::new(StringArray::from(values.to_vec()))
}

pub fn ints(values: &[i64]) -> ArrayRef {
    Arc::new(Int64Array::from(values.to_vec()))
}

pub fn table(columns: Vec<(&str, ArrayRef)>) -> ArrowTable {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let arrays: Vec<ArrayRef> = columns.into_iter().map(|(_, array)| array).collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays).unwrap();
    ArrowTable::new(schema, vec![batch])
}

pub fn empty_table(columns: Vec<(&str, arrow::datatypes::DataType)>) -> ArrowTable {
    let fields: Vec<Field> = columns
        .into_iter()
        .map(|(name, data_type)| Field::new(name, data_type, true))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    ArrowTable::new(schema, Vec::new())
}
