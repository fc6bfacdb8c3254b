//! Time-bucket granularities.

use serde::{Deserialize, Serialize};
use sqlparser::ast::SelectItem;

use crate::error::{MimirError, MimirResult};
use crate::sql::ast;

/// A closed set of time buckets an inquiry can group by.
///
/// Each variant carries the alias its bucket column is exposed under and
/// knows how to build the bucketing expression over a source's time column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    Time,
    Date,
    Month,
    Year,
}

impl Granularity {
    /// Parse the symbolic name used in requests (`TIME`, `DATE`, ...).
    pub fn parse(symbol: &str) -> MimirResult<Self> {
        match symbol {
            "TIME" => Ok(Granularity::Time),
            "DATE" => Ok(Granularity::Date),
            "MONTH" => Ok(Granularity::Month),
            "YEAR" => Ok(Granularity::Year),
            other => Err(MimirError::config(format!(
                "unknown granularity '{other}' (expected TIME, DATE, MONTH or YEAR)"
            ))),
        }
    }

    /// The output column alias for this bucket.
    pub fn alias(&self) -> &'static str {
        match self {
            Granularity::Time => "ts",
            Granularity::Date => "ds",
            Granularity::Month => "year_month",
            Granularity::Year => "year",
        }
    }

    /// The bucketing projection over `column`, e.g. `DATE(created_at) AS ds`.
    pub fn expression(&self, column: &str) -> MimirResult<SelectItem> {
        let sql = match self {
            Granularity::Time => format!("SELECT {column} AS ts"),
            Granularity::Date => format!("SELECT DATE({column}) AS ds"),
            Granularity::Month => {
                format!("SELECT DATE_TRUNC('month', {column}) AS year_month")
            }
            Granularity::Year => format!("SELECT DATE_TRUNC('year', {column}) AS year"),
        };
        let query = ast::parse_select(&sql)?;
        ast::projections(&query)?
            .first()
            .cloned()
            .ok_or_else(|| MimirError::query("granularity template lost its projection"))
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Granularity::Time => "TIME",
            Granularity::Date => "DATE",
            Granularity::Month => "MONTH",
            Granularity::Year => "YEAR",
        };
        f.write_str(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbols() {
        assert_eq!(Granularity::parse("DATE").unwrap(), Granularity::Date);
        assert_eq!(Granularity::parse("YEAR").unwrap(), Granularity::Year);
        assert!(Granularity::parse("day").is_err());
    }

    #[test]
    fn test_aliases() {
        assert_eq!(Granularity::Time.alias(), "ts");
        assert_eq!(Granularity::Date.alias(), "ds");
        assert_eq!(Granularity::Month.alias(), "year_month");
        assert_eq!(Granularity::Year.alias(), "year");
    }

    #[test]
    fn test_expressions_alias_their_own_column() {
        let item = Granularity::Date.expression("created_at").unwrap();
        assert_eq!(item.to_string(), "DATE(created_at) AS ds");

        // YEAR buckets under its own alias
        let item = Granularity::Year.expression("created_at").unwrap();
        assert_eq!(item.to_string(), "DATE_TRUNC('year', created_at) AS year");
    }

    #[test]
    fn test_serde_symbols() {
        let g: Granularity = serde_json::from_str("\"MONTH\"").unwrap();
        assert_eq!(g, Granularity::Month);
        assert_eq!(serde_json::to_string(&g).unwrap(), "\"MONTH\"");
    }
}
