//! Source definitions: a logical table backed by one connection.

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use serde::Deserialize;
use sqlparser::ast::{Expr, Ident, OrderByExpr, Query, Value};

use crate::connections::Connection;
use crate::error::{MimirError, MimirResult};
use crate::model::Dimension;
use crate::sql::ast;

/// Raw source configuration as authored in YAML.
///
/// Sources live in mapping files keyed by source name, so the name itself
/// is not part of the config body.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub sql: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub time_col: String,
    #[serde(default)]
    pub time_col_alias: Option<String>,
    #[serde(default)]
    pub connection_name: Option<String>,
    /// Dimensions joinable through dimension-source SQL.
    #[serde(default, rename = "dimensions")]
    pub source_dimensions: Vec<String>,
}

/// A logical table backed by one connection and one SQL body.
#[derive(Clone)]
pub struct Source {
    pub name: String,
    pub sql: String,
    pub description: Option<String>,
    pub time_col: String,
    pub time_col_alias: String,
    pub connection_name: String,
    pub source_dimensions: Vec<String>,
    /// Projections of `sql` minus the time alias. Derived, never authored.
    pub local_dimensions: Vec<String>,
    pub connection: Option<Arc<dyn Connection>>,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("time_col", &self.time_col)
            .field("time_col_alias", &self.time_col_alias)
            .field("connection_name", &self.connection_name)
            .field("source_dimensions", &self.source_dimensions)
            .field("local_dimensions", &self.local_dimensions)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Source {}

impl PartialOrd for Source {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Source {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl Source {
    /// Build a source from its raw configuration, deriving the time alias
    /// and local dimensions from its SQL body.
    pub fn from_config(
        name: &str,
        config: SourceConfig,
        connection: Option<Arc<dyn Connection>>,
    ) -> MimirResult<Self> {
        let sql = config.sql.ok_or_else(|| {
            MimirError::config(format!("source '{name}' is missing the required 'sql' field"))
        })?;
        let connection_name = config.connection_name.ok_or_else(|| {
            MimirError::config(format!(
                "source '{name}' is missing the required parameter 'connection_name'"
            ))
        })?;

        let time_col_alias = config
            .time_col_alias
            .unwrap_or_else(|| config.time_col.clone());

        let parsed = ast::parse_select(&sql).map_err(|e| {
            MimirError::config(format!("source '{name}' has an unparseable sql body: {e}"))
        })?;
        let local_dimensions = ast::projections(&parsed)?
            .iter()
            .map(ast::projection_name)
            .filter(|col| col != &time_col_alias)
            .collect();

        Ok(Source {
            name: name.to_string(),
            sql,
            description: config.description,
            time_col: config.time_col,
            time_col_alias,
            connection_name,
            source_dimensions: config.source_dimensions,
            local_dimensions,
            connection,
        })
    }

    fn validate_columns(
        &self,
        column_names: &[String],
        metric_names: &[String],
        granularity_alias: Option<&str>,
        error_message: &str,
    ) -> MimirResult<()> {
        let mut allowed: Vec<&str> = self
            .local_dimensions
            .iter()
            .chain(self.source_dimensions.iter())
            .chain(metric_names.iter())
            .map(String::as_str)
            .collect();
        allowed.push(&self.time_col_alias);
        if let Some(alias) = granularity_alias {
            allowed.push(alias);
        }

        let unavailable: Vec<&str> = column_names
            .iter()
            .map(String::as_str)
            .filter(|col| !allowed.contains(col))
            .collect();
        if !unavailable.is_empty() {
            return Err(MimirError::config(format!(
                "Invalid columns for source '{}'. {error_message} ({})",
                self.name,
                unavailable.join(", ")
            )));
        }
        Ok(())
    }

    /// Every requested dimension must be a local or source dimension.
    pub fn validate_dimensions(&self, dimensions: &[Arc<Dimension>]) -> MimirResult<()> {
        let names: Vec<String> = dimensions.iter().map(|d| d.name.clone()).collect();
        self.validate_columns(
            &names,
            &[],
            None,
            "The following dimensions are missing from the source config:",
        )
    }

    /// Every identifier in the WHERE clause must be a known column.
    pub fn validate_conditions(
        &self,
        where_clause: Option<&Expr>,
        metric_names: &[String],
    ) -> MimirResult<()> {
        let Some(where_clause) = where_clause else {
            return Ok(());
        };
        self.validate_columns(
            &ast::collect_identifiers(where_clause),
            metric_names,
            None,
            "The following filter columns are missing from the source config:",
        )
    }

    /// Every identifier in the ORDER BY list must be a known column.
    pub fn validate_sort(
        &self,
        order_by: Option<&[OrderByExpr]>,
        metric_names: &[String],
        granularity_alias: Option<&str>,
    ) -> MimirResult<()> {
        let Some(order_by) = order_by else {
            return Ok(());
        };
        let identifiers: Vec<String> = order_by
            .iter()
            .flat_map(|sorting| ast::collect_identifiers(&sorting.expr))
            .collect();
        self.validate_columns(
            &identifiers,
            metric_names,
            granularity_alias,
            "The following sort columns are missing from the source config:",
        )
    }

    /// Compile this source's SQL into the CTE body of an atomic query:
    /// append the projections of any non-local dimensions, then bound the
    /// raw time column. The end date is inclusive, so the upper bound is a
    /// strict `<` against the following day.
    pub fn compile_source(
        &self,
        dimensions: &[Arc<Dimension>],
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> MimirResult<Box<Query>> {
        let mut query = ast::parse_select(&self.sql)?;

        for dimension in dimensions {
            if dimension.is_local() {
                continue;
            }
            let Some(dim_sql) = &dimension.sql else {
                continue;
            };
            let dim_query = ast::parse_select(dim_sql).map_err(|e| {
                MimirError::config(format!(
                    "dimension '{}' has an unparseable sql body: {e}",
                    dimension.name
                ))
            })?;
            let items = ast::projections(&dim_query)?.to_vec();
            ast::append_projections(&mut query, items)?;
        }

        if let Some(start) = start_date {
            ast::push_where(&mut query, self.date_bound(">=", start)?)?;
        }
        if let Some(end) = end_date {
            let upper = end
                .checked_add_days(Days::new(1))
                .ok_or_else(|| MimirError::query("end_date is out of range"))?;
            ast::push_where(&mut query, self.date_bound("<", upper)?)?;
        }

        Ok(query)
    }

    fn date_bound(&self, op: &str, date: NaiveDate) -> MimirResult<Expr> {
        let op = match op {
            ">=" => sqlparser::ast::BinaryOperator::GtEq,
            "<" => sqlparser::ast::BinaryOperator::Lt,
            other => {
                return Err(MimirError::query(format!(
                    "unsupported date bound operator '{other}'"
                )))
            }
        };
        Ok(Expr::BinaryOp {
            left: Box::new(Expr::Identifier(Ident::new(self.time_col.as_str()))),
            op,
            right: Box::new(Expr::Value(Value::SingleQuotedString(
                date.format("%Y-%m-%d").to_string(),
            ))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_source() -> Source {
        let config: SourceConfig = serde_yaml::from_str(
            r#"
sql: SELECT created_at, my_dimension, amount FROM raw_data
time_col: created_at
connection_name: my_connection
dimensions:
  - joined_dimension
"#,
        )
        .unwrap();
        Source::from_config("my_source", config, None).unwrap()
    }

    #[test]
    fn test_local_dimensions_exclude_time_alias() {
        let source = sample_source();
        assert_eq!(source.time_col_alias, "created_at");
        assert_eq!(source.local_dimensions, vec!["my_dimension", "amount"]);
    }

    #[test]
    fn test_time_col_alias_override() {
        let config: SourceConfig = serde_yaml::from_str(
            "sql: SELECT created_at AS ts, region FROM raw\ntime_col: created_at\ntime_col_alias: ts\nconnection_name: c",
        )
        .unwrap();
        let source = Source::from_config("s", config, None).unwrap();
        assert_eq!(source.time_col_alias, "ts");
        assert_eq!(source.local_dimensions, vec!["region"]);
    }

    #[test]
    fn test_missing_sql_is_config_error() {
        let config: SourceConfig =
            serde_yaml::from_str("time_col: created_at\nconnection_name: c").unwrap();
        let err = Source::from_config("bad", config, None).unwrap_err();
        assert!(err.to_string().contains("'bad'"));
    }

    #[test]
    fn test_validate_dimensions() {
        let source = sample_source();
        let known = vec![Arc::new(Dimension::local("my_dimension"))];
        assert!(source.validate_dimensions(&known).is_ok());

        let joined = vec![Arc::new(Dimension::local("joined_dimension"))];
        assert!(source.validate_dimensions(&joined).is_ok());

        let unknown = vec![Arc::new(Dimension::local("some_other_dimension"))];
        let err = source.validate_dimensions(&unknown).unwrap_err().to_string();
        assert!(err.contains("my_source"));
        assert!(err.contains("some_other_dimension"));
    }

    #[test]
    fn test_validate_conditions_allows_metrics_and_time() {
        let source = sample_source();
        let clause = ast::parse_where_body("my_dimension = 'A' AND my_metric > 10").unwrap();
        source
            .validate_conditions(Some(&clause), &["my_metric".to_string()])
            .unwrap();

        let time_clause = ast::parse_where_body("created_at >= '2025-01-01'").unwrap();
        source.validate_conditions(Some(&time_clause), &[]).unwrap();

        let bad = ast::parse_where_body("mystery = 1").unwrap();
        assert!(source.validate_conditions(Some(&bad), &[]).is_err());
    }

    #[test]
    fn test_validate_sort_accepts_granularity_alias() {
        let source = sample_source();
        let order = ast::parse_order_body("ds DESC").unwrap();
        assert!(source.validate_sort(Some(&order), &[], Some("ds")).is_ok());
        assert!(source.validate_sort(Some(&order), &[], None).is_err());
    }

    #[test]
    fn test_compile_source_date_bounds() {
        let source = sample_source();
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let compiled = source
            .compile_source(&[], Some(start), Some(end))
            .unwrap();
        assert_eq!(
            compiled.to_string(),
            "SELECT created_at, my_dimension, amount FROM raw_data \
             WHERE created_at >= '2025-01-01' AND created_at < '2025-02-01'"
        );
    }

    #[test]
    fn test_compile_source_appends_joined_dimension_projections() {
        let source = sample_source();
        let joined = Arc::new(Dimension {
            name: "joined_dimension".to_string(),
            sql: Some("SELECT lookup.label AS joined_dimension".to_string()),
            description: None,
            source_name: "dim_lookup".to_string(),
        });
        let local = Arc::new(Dimension::local("my_dimension"));
        let compiled = source
            .compile_source(&[local, joined], None, None)
            .unwrap();
        assert_eq!(
            compiled.to_string(),
            "SELECT created_at, my_dimension, amount, lookup.label AS joined_dimension FROM raw_data"
        );
    }
}
