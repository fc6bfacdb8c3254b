//! Inquiries: the user's logical request and its orchestration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Expr, OrderByExpr, Query};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::atomic::AtomicQuery;
use super::combine::CombineContext;
use crate::catalog::Catalog;
use crate::connections::ArrowTable;
use crate::error::{MimirError, MimirResult};
use crate::model::{Dimension, Granularity, Metric, Source};
use crate::sql::ast;

/// Upper bound on concurrently executing backend queries per inquiry.
const MAX_WORKERS: usize = 8;

/// The wire/API shape of an inquiry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InquiryRequest {
    pub metrics: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub granularity: Option<Granularity>,
    /// SQL WHERE body applied to every atomic query.
    #[serde(default)]
    pub global_filter: Option<String>,
    /// SQL order list applied to the combined result.
    #[serde(default)]
    pub order_by: Option<String>,
    /// Optional post-combination projection list.
    #[serde(default)]
    pub client_sql: Option<String>,
}

/// A validated, planned request for data across one or more sources.
pub struct Inquiry {
    catalog: Arc<Catalog>,
    metrics: Vec<Arc<Metric>>,
    dimensions: Vec<Arc<Dimension>>,
    granularity: Option<Granularity>,
    global_filter: Option<Expr>,
    order_by: Option<Vec<OrderByExpr>>,
    client_sql: Option<Box<Query>>,
    atomic_queries: Vec<AtomicQuery>,
}

impl Inquiry {
    /// Resolve, validate, and split a request into atomic queries.
    pub fn new(catalog: Arc<Catalog>, request: &InquiryRequest) -> MimirResult<Self> {
        if request.metrics.is_empty() {
            return Err(MimirError::config(
                "an inquiry requires at least one metric",
            ));
        }

        let global_filter = request
            .global_filter
            .as_deref()
            .map(ast::parse_where_body)
            .transpose()?;
        let order_by = request
            .order_by
            .as_deref()
            .map(ast::parse_order_body)
            .transpose()?;
        let client_sql = request
            .client_sql
            .as_deref()
            .map(ast::parse_select)
            .transpose()?;

        let dimensions = request
            .dimensions
            .iter()
            .map(|name| catalog.get_dimension(name))
            .collect::<MimirResult<Vec<_>>>()?;

        // The stable sort by owning source drives the group-by-source split.
        let mut metrics = request
            .metrics
            .iter()
            .map(|name| catalog.get_metric(name))
            .collect::<MimirResult<Vec<_>>>()?;
        metrics.sort_by(|a, b| a.source_name().cmp(b.source_name()));

        let start_date = parse_date(request.start_date.as_deref(), "start_date")?;
        let end_date = parse_date(request.end_date.as_deref(), "end_date")?;

        let inquiry = Inquiry {
            catalog,
            metrics,
            dimensions,
            granularity: request.granularity,
            global_filter,
            order_by,
            client_sql,
            atomic_queries: Vec::new(),
        };
        inquiry.validate()?;

        let atomic_queries = inquiry.split_queries(start_date, end_date)?;
        Ok(Inquiry {
            atomic_queries,
            ..inquiry
        })
    }

    pub fn metrics(&self) -> &[Arc<Metric>] {
        &self.metrics
    }

    pub fn dimensions(&self) -> &[Arc<Dimension>] {
        &self.dimensions
    }

    pub fn atomic_queries(&self) -> &[AtomicQuery] {
        &self.atomic_queries
    }

    /// Validate the requested columns against every source the metrics touch.
    fn validate(&self) -> MimirResult<()> {
        let metric_names: Vec<String> = self.metrics.iter().map(|m| m.name.clone()).collect();
        let granularity_alias = self.granularity.map(|g| g.alias());

        let mut seen: Vec<&str> = Vec::new();
        for metric in &self.metrics {
            let source: &Arc<Source> = &metric.source;
            if seen.contains(&source.name.as_str()) {
                continue;
            }
            seen.push(&source.name);
            source.validate_dimensions(&self.dimensions)?;
            source.validate_conditions(self.global_filter.as_ref(), &metric_names)?;
            source.validate_sort(
                self.order_by.as_deref(),
                &metric_names,
                granularity_alias,
            )?;
        }
        Ok(())
    }

    /// Run-length group the source-sorted metrics into atomic queries.
    fn split_queries(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> MimirResult<Vec<AtomicQuery>> {
        let mut queries = Vec::new();
        let mut group: Vec<Arc<Metric>> = Vec::new();

        for metric in &self.metrics {
            if let Some(last) = group.last() {
                if last.source_name() != metric.source_name() {
                    queries.push(self.atomic_query(std::mem::take(&mut group), start_date, end_date)?);
                }
            }
            group.push(metric.clone());
        }
        if !group.is_empty() {
            queries.push(self.atomic_query(group, start_date, end_date)?);
        }
        Ok(queries)
    }

    fn atomic_query(
        &self,
        metrics: Vec<Arc<Metric>>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> MimirResult<AtomicQuery> {
        let source = metrics
            .first()
            .map(|m| m.source.clone())
            .ok_or_else(|| MimirError::query("cannot build an atomic query with no metrics"))?;
        AtomicQuery::new(
            &self.catalog,
            source,
            metrics,
            self.dimensions.clone(),
            start_date,
            end_date,
            self.granularity,
            self.global_filter.as_ref(),
        )
    }

    /// The combined query over the registered intermediate tables: a full
    /// outer join on the shared dimension columns (so dimension values seen
    /// by only some sources survive), or a cross join when there are none.
    fn combine_queries(&self) -> MimirResult<Box<Query>> {
        let mut dim_columns: Vec<String> = Vec::new();
        if let Some(granularity) = self.granularity {
            dim_columns.push(granularity.alias().to_string());
        }
        dim_columns.extend(self.dimensions.iter().map(|d| d.name.clone()));

        let items = match &self.client_sql {
            Some(client) => ast::projections(client)?.to_vec(),
            None => dim_columns
                .iter()
                .map(String::as_str)
                .chain(self.metrics.iter().map(|m| m.name.as_str()))
                .map(ast::column_item)
                .collect(),
        };

        let mut names = self.atomic_queries.iter().map(|aq| aq.name.as_str());
        let first = names
            .next()
            .ok_or_else(|| MimirError::query("inquiry produced no atomic queries"))?;

        let mut query = ast::parse_select("SELECT 1")?;
        ast::set_projections(&mut query, items)?;
        ast::set_from_table(&mut query, first)?;
        for table in names {
            if dim_columns.is_empty() {
                ast::push_cross_join(&mut query, table)?;
            } else {
                ast::push_full_join_using(&mut query, table, &dim_columns)?;
            }
        }

        if let Some(order_by) = &self.order_by {
            ast::set_order_by(&mut query, order_by.clone())?;
        }
        Ok(query)
    }

    /// The combined SQL as text (the plan, without executing anything).
    pub fn combined_sql(&self) -> MimirResult<String> {
        Ok(self.combine_queries()?.to_string())
    }

    /// Execute every atomic query on a bounded worker pool, register the
    /// results, and return the combined columnar table.
    ///
    /// The first worker error cancels the rest (best-effort: running backend
    /// calls are discarded, not interrupted) and tears down the substrate.
    pub async fn dispatch(&self) -> MimirResult<ArrowTable> {
        info!(queries = self.atomic_queries.len(), "executing inquiry");
        let context = CombineContext::new()?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let permits = Arc::new(Semaphore::new(MAX_WORKERS));

        let mut workers: JoinSet<MimirResult<(String, ArrowTable)>> = JoinSet::new();
        for atomic_query in &self.atomic_queries {
            let atomic_query = atomic_query.clone();
            let cancelled = cancelled.clone();
            let permits = permits.clone();
            workers.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| MimirError::query("worker pool closed"))?;
                if cancelled.load(Ordering::SeqCst) {
                    return Err(MimirError::query(format!(
                        "atomic query {} cancelled",
                        atomic_query.name
                    )));
                }
                let name = atomic_query.name.clone();
                let table = tokio::task::spawn_blocking(move || atomic_query.execute())
                    .await
                    .map_err(|e| MimirError::query(format!("worker failed: {e}")))??;
                Ok((name, table))
            });
        }

        // Registration is serialized here; completion order does not matter
        // because combination happens after all registrations.
        while let Some(joined) = workers.join_next().await {
            let result =
                joined.map_err(|e| MimirError::query(format!("worker failed: {e}")))?;
            match result {
                Ok((name, table)) => {
                    info!(table = %name, rows = table.num_rows(), "registered intermediate result");
                    context.register(&name, &table)?;
                }
                Err(err) => {
                    error!(%err, "atomic query failed, cancelling inquiry");
                    cancelled.store(true, Ordering::SeqCst);
                    workers.abort_all();
                    return Err(err);
                }
            }
        }

        let sql = self.combined_sql()?;
        debug!(%sql, "combining intermediate results");
        context.execute(&sql)
    }

    /// Compile the full inquiry into a single SQL string without executing
    /// it. Registers each atomic query's limit-0 result so the combined SQL
    /// is planned against real schemas; requires live connections.
    pub fn compile(&self) -> MimirResult<String> {
        let context = CombineContext::new()?;
        for atomic_query in &self.atomic_queries {
            let connection = atomic_query.source.connection.as_ref().ok_or_else(|| {
                MimirError::query(format!(
                    "Source '{}' has no active connection for compilation.",
                    atomic_query.source.name
                ))
            })?;
            let schema_only = ast::with_limit_zero(&atomic_query.ast);
            let table = connection.execute(&schema_only.to_string())?;
            context.register(&atomic_query.name, &table)?;
        }
        self.combined_sql()
    }
}

fn parse_date(value: Option<&str>, field: &str) -> MimirResult<Option<NaiveDate>> {
    value
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                MimirError::config(format!("{field} '{raw}' is not a YYYY-MM-DD date"))
            })
        })
        .transpose()
}
