//! Metric definitions.

use std::sync::Arc;

use serde::Deserialize;

use crate::error::{MimirError, MimirResult};
use crate::model::Source;

/// Raw metric configuration as authored in YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub required_dimensions: Vec<String>,
}

/// A named aggregate tied to one source.
///
/// The SQL body is a SELECT whose projections are the metric's output
/// columns; `required_dimensions` are appended to any atomic query selecting
/// this metric even when the caller did not request them.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub sql: String,
    pub description: Option<String>,
    pub required_dimensions: Vec<String>,
    pub source: Arc<Source>,
}

impl Metric {
    pub fn from_config(config: MetricConfig, source: Arc<Source>) -> MimirResult<Self> {
        let sql = config.sql.ok_or_else(|| {
            MimirError::config(format!(
                "metric '{}' is missing the required 'sql' field",
                config.name
            ))
        })?;
        Ok(Metric {
            name: config.name,
            sql,
            description: config.description,
            required_dimensions: config.required_dimensions,
            source,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source.name
    }
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Metric {}

impl PartialOrd for Metric {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Metric {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceConfig;

    fn source() -> Arc<Source> {
        let config: SourceConfig = serde_yaml::from_str(
            "sql: SELECT created_at, my_dimension, amount FROM raw_data\ntime_col: created_at\nconnection_name: c",
        )
        .unwrap();
        Arc::new(Source::from_config("my_source", config, None).unwrap())
    }

    #[test]
    fn test_metric_requires_sql() {
        let config: MetricConfig =
            serde_yaml::from_str("name: my_metric\nsource_name: my_source").unwrap();
        assert!(Metric::from_config(config, source()).is_err());
    }

    #[test]
    fn test_metric_from_config() {
        let config: MetricConfig = serde_yaml::from_str(
            "name: my_metric\nsource_name: my_source\nsql: SELECT SUM(amount) AS my_metric\nrequired_dimensions:\n  - my_dimension",
        )
        .unwrap();
        let metric = Metric::from_config(config, source()).unwrap();
        assert_eq!(metric.name, "my_metric");
        assert_eq!(metric.source_name(), "my_source");
        assert_eq!(metric.required_dimensions, vec!["my_dimension"]);
    }
}
