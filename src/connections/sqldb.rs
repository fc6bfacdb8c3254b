//! Pooled SQL database backend.
//!
//! Holds an r2d2 connection pool for one of the supported flavours and
//! converts row-major driver results into Arrow batches. Pools are built
//! lazily so that catalog resolution does not dial the database; transport
//! failures surface at execution time.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use postgres::types::Type as PgType;
use postgres::NoTls;
use r2d2_mysql::mysql::consts::ColumnType as MysqlColumnType;
use r2d2_mysql::mysql::prelude::Queryable;
use r2d2_mysql::mysql::{OptsBuilder, Value as MysqlValue};
use r2d2_mysql::MySqlConnectionManager;
use r2d2_postgres::PostgresConnectionManager;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::{ArrowTable, Connection, ConnectionSecret};
use crate::error::{MimirError, MimirResult};

const POOL_SIZE: u32 = 4;

/// The closed set of supported SQL flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavour {
    MySql,
    PostgreSql,
}

impl Flavour {
    pub fn parse(flavour: &str) -> MimirResult<Self> {
        match flavour {
            "mysql" => Ok(Flavour::MySql),
            "postgresql" => Ok(Flavour::PostgreSql),
            other => Err(MimirError::NotImplemented(format!(
                "the requested SQL flavour '{other}' is not yet implemented"
            ))),
        }
    }
}

enum BackendPool {
    MySql(r2d2::Pool<MySqlConnectionManager>),
    Postgres(r2d2::Pool<PostgresConnectionManager<NoTls>>),
}

/// A connection to a SQL database through a connection pool.
pub struct SqlDatabase {
    name: String,
    pool: BackendPool,
}

impl SqlDatabase {
    /// Build the pool described by a `sqldb` secret.
    pub fn from_secret(connection_name: &str, secret: &ConnectionSecret) -> MimirResult<Self> {
        let flavour = secret.flavour.as_deref().ok_or_else(|| {
            MimirError::config(format!(
                "secret '{connection_name}' is missing the required 'flavour' field"
            ))
        })?;
        let database = secret.schema.clone().ok_or_else(|| {
            MimirError::config(format!(
                "secret '{connection_name}' is missing the required 'schema' field"
            ))
        })?;

        let pool = match Flavour::parse(flavour)? {
            Flavour::MySql => {
                let opts = OptsBuilder::new()
                    .ip_or_hostname(secret.host.clone())
                    .tcp_port(secret.port.unwrap_or(3306))
                    .user(secret.user.clone())
                    .pass(secret.password.clone())
                    .db_name(Some(database));
                let manager = MySqlConnectionManager::new(opts);
                BackendPool::MySql(
                    r2d2::Pool::builder()
                        .max_size(POOL_SIZE)
                        .build_unchecked(manager),
                )
            }
            Flavour::PostgreSql => {
                let mut config = postgres::Config::new();
                config
                    .host(secret.host.as_deref().unwrap_or("localhost"))
                    .port(secret.port.unwrap_or(5432))
                    .dbname(&database);
                if let Some(user) = &secret.user {
                    config.user(user);
                }
                if let Some(password) = &secret.password {
                    config.password(password);
                }
                let manager = PostgresConnectionManager::new(config, NoTls);
                BackendPool::Postgres(
                    r2d2::Pool::builder()
                        .max_size(POOL_SIZE)
                        .build_unchecked(manager),
                )
            }
        };

        Ok(SqlDatabase {
            name: connection_name.to_string(),
            pool,
        })
    }

    fn transport_err(&self, err: impl std::fmt::Display) -> MimirError {
        MimirError::connection(format!("connection '{}': {err}", self.name))
    }
}

impl Connection for SqlDatabase {
    fn execute(&self, sql: &str) -> MimirResult<ArrowTable> {
        match &self.pool {
            BackendPool::MySql(pool) => {
                let mut conn = pool.get().map_err(|e| self.transport_err(e))?;
                query_mysql(&mut conn, sql).map_err(|e| self.transport_err(e))
            }
            BackendPool::Postgres(pool) => {
                let mut client = pool.get().map_err(|e| self.transport_err(e))?;
                query_postgres(&mut client, sql).map_err(|e| self.transport_err(e))
            }
        }
    }
}

// Per-column accumulator. Backends deliver rows; Arrow wants columns.
enum ColumnData {
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Text(Vec<Option<String>>),
}

impl ColumnData {
    fn data_type(&self) -> DataType {
        match self {
            ColumnData::Int(_) => DataType::Int64,
            ColumnData::Float(_) => DataType::Float64,
            ColumnData::Bool(_) => DataType::Boolean,
            ColumnData::Text(_) => DataType::Utf8,
        }
    }

    fn into_array(self) -> ArrayRef {
        match self {
            ColumnData::Int(values) => Arc::new(Int64Array::from(values)),
            ColumnData::Float(values) => Arc::new(Float64Array::from(values)),
            ColumnData::Bool(values) => Arc::new(BooleanArray::from(values)),
            ColumnData::Text(values) => Arc::new(StringArray::from(values)),
        }
    }
}

fn finish_batch(names: Vec<String>, columns: Vec<ColumnData>) -> Result<ArrowTable, String> {
    let fields: Vec<Field> = names
        .iter()
        .zip(columns.iter())
        .map(|(name, column)| Field::new(name, column.data_type(), true))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let arrays: Vec<ArrayRef> = columns.into_iter().map(ColumnData::into_array).collect();
    let batch = RecordBatch::try_new(schema.clone(), arrays).map_err(|e| e.to_string())?;
    Ok(ArrowTable::new(schema, vec![batch]))
}

fn query_mysql(
    conn: &mut r2d2::PooledConnection<MySqlConnectionManager>,
    sql: &str,
) -> Result<ArrowTable, String> {
    let mut result = conn.query_iter(sql).map_err(|e| e.to_string())?;

    let (names, mut builders): (Vec<String>, Vec<ColumnData>) = {
        let columns = result.columns();
        columns
            .as_ref()
            .iter()
            .map(|col| {
                let builder = match col.column_type() {
                    MysqlColumnType::MYSQL_TYPE_TINY
                    | MysqlColumnType::MYSQL_TYPE_SHORT
                    | MysqlColumnType::MYSQL_TYPE_INT24
                    | MysqlColumnType::MYSQL_TYPE_LONG
                    | MysqlColumnType::MYSQL_TYPE_LONGLONG
                    | MysqlColumnType::MYSQL_TYPE_YEAR => ColumnData::Int(Vec::new()),
                    MysqlColumnType::MYSQL_TYPE_FLOAT
                    | MysqlColumnType::MYSQL_TYPE_DOUBLE
                    | MysqlColumnType::MYSQL_TYPE_DECIMAL
                    | MysqlColumnType::MYSQL_TYPE_NEWDECIMAL => ColumnData::Float(Vec::new()),
                    _ => ColumnData::Text(Vec::new()),
                };
                (col.name_str().to_string(), builder)
            })
            .unzip()
    };

    for row in result.by_ref() {
        let row = row.map_err(|e| e.to_string())?;
        let values = row.unwrap();
        for (builder, value) in builders.iter_mut().zip(values.into_iter()) {
            push_mysql_value(builder, value)?;
        }
    }

    finish_batch(names, builders)
}

fn push_mysql_value(builder: &mut ColumnData, value: MysqlValue) -> Result<(), String> {
    match builder {
        ColumnData::Int(values) => values.push(match value {
            MysqlValue::NULL => None,
            MysqlValue::Int(v) => Some(v),
            MysqlValue::UInt(v) => Some(v as i64),
            MysqlValue::Bytes(b) => String::from_utf8_lossy(&b).parse().ok(),
            other => return Err(format!("unexpected integer value: {other:?}")),
        }),
        ColumnData::Float(values) => values.push(match value {
            MysqlValue::NULL => None,
            MysqlValue::Float(v) => Some(v as f64),
            MysqlValue::Double(v) => Some(v),
            MysqlValue::Int(v) => Some(v as f64),
            MysqlValue::UInt(v) => Some(v as f64),
            MysqlValue::Bytes(b) => String::from_utf8_lossy(&b).parse().ok(),
            other => return Err(format!("unexpected float value: {other:?}")),
        }),
        ColumnData::Text(values) => values.push(render_mysql_text(value)),
        ColumnData::Bool(values) => values.push(match value {
            MysqlValue::NULL => None,
            MysqlValue::Int(v) => Some(v != 0),
            MysqlValue::UInt(v) => Some(v != 0),
            other => return Err(format!("unexpected boolean value: {other:?}")),
        }),
    }
    Ok(())
}

fn render_mysql_text(value: MysqlValue) -> Option<String> {
    match value {
        MysqlValue::NULL => None,
        MysqlValue::Bytes(b) => Some(String::from_utf8_lossy(&b).into_owned()),
        MysqlValue::Int(v) => Some(v.to_string()),
        MysqlValue::UInt(v) => Some(v.to_string()),
        MysqlValue::Float(v) => Some(v.to_string()),
        MysqlValue::Double(v) => Some(v.to_string()),
        MysqlValue::Date(y, m, d, 0, 0, 0, 0) => Some(format!("{y:04}-{m:02}-{d:02}")),
        MysqlValue::Date(y, m, d, h, mi, s, _) => {
            Some(format!("{y:04}-{m:02}-{d:02} {h:02}:{mi:02}:{s:02}"))
        }
        MysqlValue::Time(neg, days, h, m, s, _) => {
            let sign = if neg { "-" } else { "" };
            let hours = u32::from(h) + days * 24;
            Some(format!("{sign}{hours:02}:{m:02}:{s:02}"))
        }
    }
}

fn query_postgres(
    client: &mut r2d2::PooledConnection<PostgresConnectionManager<NoTls>>,
    sql: &str,
) -> Result<ArrowTable, String> {
    let statement = client.prepare(sql).map_err(|e| e.to_string())?;
    let rows = client.query(&statement, &[]).map_err(|e| e.to_string())?;

    let names: Vec<String> = statement
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    let types: Vec<PgType> = statement
        .columns()
        .iter()
        .map(|col| col.type_().clone())
        .collect();
    let mut builders: Vec<ColumnData> = types
        .iter()
        .map(|ty| {
            if [PgType::INT2, PgType::INT4, PgType::INT8].contains(ty) {
                ColumnData::Int(Vec::new())
            } else if [PgType::FLOAT4, PgType::FLOAT8, PgType::NUMERIC].contains(ty) {
                ColumnData::Float(Vec::new())
            } else if *ty == PgType::BOOL {
                ColumnData::Bool(Vec::new())
            } else {
                ColumnData::Text(Vec::new())
            }
        })
        .collect();

    for row in &rows {
        for (i, (builder, ty)) in builders.iter_mut().zip(types.iter()).enumerate() {
            push_postgres_value(builder, ty, &row, i)?;
        }
    }

    finish_batch(names, builders)
}

fn push_postgres_value(
    builder: &mut ColumnData,
    ty: &PgType,
    row: &postgres::Row,
    index: usize,
) -> Result<(), String> {
    match builder {
        ColumnData::Int(values) => {
            let value: Option<i64> = if *ty == PgType::INT2 {
                row.try_get::<_, Option<i16>>(index)
                    .map_err(|e| e.to_string())?
                    .map(i64::from)
            } else if *ty == PgType::INT4 {
                row.try_get::<_, Option<i32>>(index)
                    .map_err(|e| e.to_string())?
                    .map(i64::from)
            } else {
                row.try_get::<_, Option<i64>>(index)
                    .map_err(|e| e.to_string())?
            };
            values.push(value);
        }
        ColumnData::Float(values) => {
            let value: Option<f64> = if *ty == PgType::FLOAT4 {
                row.try_get::<_, Option<f32>>(index)
                    .map_err(|e| e.to_string())?
                    .map(f64::from)
            } else if *ty == PgType::NUMERIC {
                row.try_get::<_, Option<Decimal>>(index)
                    .map_err(|e| e.to_string())?
                    .and_then(|d| d.to_f64())
            } else {
                row.try_get::<_, Option<f64>>(index)
                    .map_err(|e| e.to_string())?
            };
            values.push(value);
        }
        ColumnData::Bool(values) => {
            values.push(
                row.try_get::<_, Option<bool>>(index)
                    .map_err(|e| e.to_string())?,
            );
        }
        ColumnData::Text(values) => {
            let value: Option<String> = if *ty == PgType::DATE {
                row.try_get::<_, Option<chrono::NaiveDate>>(index)
                    .map_err(|e| e.to_string())?
                    .map(|d| d.format("%Y-%m-%d").to_string())
            } else if *ty == PgType::TIMESTAMP {
                row.try_get::<_, Option<chrono::NaiveDateTime>>(index)
                    .map_err(|e| e.to_string())?
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            } else if *ty == PgType::TIMESTAMPTZ {
                row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(index)
                    .map_err(|e| e.to_string())?
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%z").to_string())
            } else {
                row.try_get::<_, Option<String>>(index)
                    .map_err(|e| format!("column {index} ({ty}): {e}"))?
            };
            values.push(value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flavour_closed_set() {
        assert_eq!(Flavour::parse("mysql").unwrap(), Flavour::MySql);
        assert_eq!(Flavour::parse("postgresql").unwrap(), Flavour::PostgreSql);
        let err = Flavour::parse("oracle").unwrap_err();
        assert!(matches!(err, MimirError::NotImplemented(_)));
    }

    #[test]
    fn test_from_secret_requires_flavour_and_schema() {
        let secret: ConnectionSecret = serde_json::from_str(
            r#"{"connection_class": "sqldb", "host": "localhost"}"#,
        )
        .unwrap();
        assert!(SqlDatabase::from_secret("c", &secret).is_err());
    }

    #[test]
    fn test_from_secret_builds_lazy_pool() {
        // No database is listening; pool construction must still succeed.
        let secret: ConnectionSecret = serde_json::from_str(
            r#"{
                "connection_class": "sqldb",
                "flavour": "mysql",
                "host": "localhost",
                "port": 3306,
                "user": "root",
                "password": "root",
                "schema": "analytics"
            }"#,
        )
        .unwrap();
        assert!(SqlDatabase::from_secret("my_connection", &secret).is_ok());
    }

    #[test]
    fn test_column_data_types() {
        assert_eq!(ColumnData::Int(Vec::new()).data_type(), DataType::Int64);
        assert_eq!(ColumnData::Text(Vec::new()).data_type(), DataType::Utf8);
    }
}
