//! Dimension definitions.

use serde::Deserialize;

/// Sentinel source name meaning "projected directly by the owning source".
pub const LOCAL_SOURCE: &str = "local";

/// Raw dimension configuration as authored in YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct DimensionConfig {
    pub name: String,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
}

/// A named, groupable column.
///
/// A dimension either lives in a source's own projections
/// (`source_name == "local"`, no SQL body) or is joined in through the SQL
/// of a dimension source.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub name: String,
    pub sql: Option<String>,
    pub description: Option<String>,
    pub source_name: String,
}

impl Dimension {
    pub fn from_config(config: DimensionConfig) -> Self {
        Dimension {
            name: config.name,
            sql: config.sql,
            description: config.description,
            source_name: config.source_name.unwrap_or_else(|| LOCAL_SOURCE.to_string()),
        }
    }

    /// Synthesize the stub for a dimension with no configuration file.
    pub fn local(name: &str) -> Self {
        Dimension {
            name: name.to_string(),
            sql: None,
            description: None,
            source_name: LOCAL_SOURCE.to_string(),
        }
    }

    /// Whether this dimension is satisfied by the source's own projections.
    pub fn is_local(&self) -> bool {
        self.source_name == LOCAL_SOURCE
    }
}

impl PartialEq for Dimension {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Dimension {}

impl PartialOrd for Dimension {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dimension {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_stub() {
        let dim = Dimension::local("region");
        assert_eq!(dim.name, "region");
        assert_eq!(dim.source_name, LOCAL_SOURCE);
        assert!(dim.is_local());
        assert!(dim.sql.is_none());
    }

    #[test]
    fn test_source_name_defaults_to_local() {
        let config: DimensionConfig =
            serde_yaml::from_str("name: my_dimension\ndescription: a dim").unwrap();
        let dim = Dimension::from_config(config);
        assert!(dim.is_local());
        assert_eq!(dim.description.as_deref(), Some("a dim"));
    }
}
