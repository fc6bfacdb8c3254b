//! Atomic queries: one backend-executable SQL per source.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use rand::Rng;
use sqlparser::ast::{Expr, Query, SelectItem};

use crate::catalog::Catalog;
use crate::connections::ArrowTable;
use crate::error::{MimirError, MimirResult};
use crate::model::{Dimension, Granularity, Metric, Source};
use crate::sql::ast;

/// A single executable query against exactly one source.
///
/// Its SQL is the source compiled into a CTE, an inner SELECT projecting
/// the granularity bucket, the requested dimensions, and the metrics'
/// projection expressions, grouped by position over the non-metric
/// projections.
#[derive(Clone)]
pub struct AtomicQuery {
    /// Unique intermediate table name (`tbl_<30 hex>`).
    pub name: String,
    pub source: Arc<Source>,
    pub metrics: Vec<Arc<Metric>>,
    pub dimensions: Vec<Arc<Dimension>>,
    /// Dimensions demanded by the metrics but not requested by the caller.
    pub required_dimensions: Vec<Arc<Dimension>>,
    pub granularity: Option<Granularity>,
    pub ast: Box<Query>,
}

impl std::fmt::Debug for AtomicQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicQuery")
            .field("name", &self.name)
            .field("source", &self.source.name)
            .field(
                "metrics",
                &self.metrics.iter().map(|m| &m.name).collect::<Vec<_>>(),
            )
            .field(
                "dimensions",
                &self.dimensions.iter().map(|d| &d.name).collect::<Vec<_>>(),
            )
            .field("granularity", &self.granularity)
            .finish()
    }
}

impl AtomicQuery {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        catalog: &Catalog,
        source: Arc<Source>,
        metrics: Vec<Arc<Metric>>,
        dimensions: Vec<Arc<Dimension>>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        granularity: Option<Granularity>,
        global_filter: Option<&Expr>,
    ) -> MimirResult<Self> {
        let requested: BTreeSet<&str> = dimensions.iter().map(|d| d.name.as_str()).collect();
        let required_names: BTreeSet<String> = metrics
            .iter()
            .flat_map(|metric| metric.required_dimensions.iter())
            .filter(|name| !requested.contains(name.as_str()))
            .cloned()
            .collect();
        let required_dimensions = required_names
            .iter()
            .map(|name| catalog.get_dimension(name))
            .collect::<MimirResult<Vec<_>>>()?;

        let ast = build_sql(
            &source,
            &metrics,
            &dimensions,
            &required_dimensions,
            start_date,
            end_date,
            granularity,
            global_filter,
        )?;

        Ok(AtomicQuery {
            name: intermediate_name(),
            source,
            metrics,
            dimensions,
            required_dimensions,
            granularity,
            ast,
        })
    }

    /// The SQL this atomic query will send to its backend.
    pub fn sql(&self) -> String {
        self.ast.to_string()
    }

    /// Run the query on the owning source's connection.
    pub fn execute(&self) -> MimirResult<ArrowTable> {
        let connection = self.source.connection.as_ref().ok_or_else(|| {
            MimirError::query(format!(
                "Source '{}' has no active connection.",
                self.source.name
            ))
        })?;
        connection.execute(&self.sql())
    }
}

/// `tbl_` plus 30 hex characters of cryptographic randomness, so
/// intermediate names of concurrent inquiries cannot collide.
fn intermediate_name() -> String {
    let mut bytes = [0u8; 15];
    rand::rng().fill(&mut bytes);
    let mut name = String::with_capacity(4 + bytes.len() * 2);
    name.push_str("tbl_");
    for byte in bytes {
        name.push_str(&format!("{byte:02x}"));
    }
    name
}

/// The inner SELECT: granularity bucket, dimension columns, and every
/// metric's projection expressions, grouped by positional index.
fn compile_metrics_request(
    source: &Source,
    metrics: &[Arc<Metric>],
    dimensions: &[Arc<Dimension>],
    granularity: Option<Granularity>,
) -> MimirResult<Box<Query>> {
    let mut items: Vec<SelectItem> = Vec::new();
    if let Some(granularity) = granularity {
        items.push(granularity.expression(&source.time_col_alias)?);
    }
    for dimension in dimensions {
        items.push(ast::column_item(&dimension.name));
    }
    let group_count = items.len();

    for metric in metrics {
        let metric_query = ast::parse_select(&metric.sql).map_err(|e| {
            MimirError::config(format!(
                "metric '{}' has an unparseable sql body: {e}",
                metric.name
            ))
        })?;
        items.extend(ast::projections(&metric_query)?.to_vec());
    }

    let mut query = ast::parse_select("SELECT 1")?;
    ast::set_projections(&mut query, items)?;
    ast::set_from_table(&mut query, &source.name)?;
    if group_count > 0 {
        ast::group_by_positions(&mut query, group_count)?;
    }
    Ok(query)
}

#[allow(clippy::too_many_arguments)]
fn build_sql(
    source: &Source,
    metrics: &[Arc<Metric>],
    dimensions: &[Arc<Dimension>],
    required_dimensions: &[Arc<Dimension>],
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    granularity: Option<Granularity>,
    global_filter: Option<&Expr>,
) -> MimirResult<Box<Query>> {
    let mut compiled_dimensions: Vec<Arc<Dimension>> = dimensions.to_vec();
    compiled_dimensions.extend(required_dimensions.iter().cloned());
    let compiled_source = source.compile_source(&compiled_dimensions, start_date, end_date)?;

    let mut inner = compile_metrics_request(source, metrics, dimensions, granularity)?;
    if let Some(filter) = global_filter {
        ast::push_where(&mut inner, filter.clone())?;
    }

    ast::with_cte(inner, &source.name, compiled_source)
}
