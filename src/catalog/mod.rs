//! The catalog: resolver plus cache over raw configuration.
//!
//! Resolution builds definition entities lazily on first request and caches
//! them in time-bucketed memoizers (60 s TTL), one per accessor, so
//! concurrent readers see bounded staleness without an invalidation
//! protocol. Connections are bound to sources at resolution time and reused
//! for the source's cache lifetime.

mod cache;
mod loader;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use cache::TtlCache;
pub use loader::{ConfigKind, ConfigLoader, FileConfigLoader};

use crate::connections::{ConnectionFactory, ConnectionSecret, DefaultConnectionFactory};
use crate::error::{MimirError, MimirResult};
use crate::model::{Dimension, DimensionConfig, Metric, MetricConfig, Source, SourceConfig};

/// How long resolved definitions stay cached.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Environment variable overriding the host of every connection secret,
/// for containerized deployments.
pub const CONNECTION_HOST_VAR: &str = "CONNECTION_HOST";

/// Per-source schema listing exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSchema {
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub time_dimension: String,
}

/// Resolves named definitions from a pluggable loader.
pub struct Catalog {
    loader: Arc<dyn ConfigLoader>,
    factory: Arc<dyn ConnectionFactory>,
    validate_connections: bool,
    sources: TtlCache<String, Arc<Source>>,
    dimensions: TtlCache<String, Arc<Dimension>>,
    metrics: TtlCache<String, Arc<Metric>>,
    all_sources: TtlCache<(), Vec<Arc<Source>>>,
    all_dimensions: TtlCache<(), Vec<Arc<Dimension>>>,
    all_metrics: TtlCache<(), Vec<Arc<Metric>>>,
    schema: TtlCache<(), BTreeMap<String, SourceSchema>>,
}

impl Catalog {
    /// A catalog using the built-in connection factory.
    ///
    /// With `validate_connections` off the catalog never touches secrets and
    /// sources resolve without a bound connection, which allows validating
    /// configuration in environments without credentials.
    pub fn new(loader: Arc<dyn ConfigLoader>, validate_connections: bool) -> Self {
        Self::with_factory(loader, Arc::new(DefaultConnectionFactory), validate_connections)
    }

    /// A catalog with a custom connection factory.
    pub fn with_factory(
        loader: Arc<dyn ConfigLoader>,
        factory: Arc<dyn ConnectionFactory>,
        validate_connections: bool,
    ) -> Self {
        Catalog {
            loader,
            factory,
            validate_connections,
            sources: TtlCache::new(CACHE_TTL),
            dimensions: TtlCache::new(CACHE_TTL),
            metrics: TtlCache::new(CACHE_TTL),
            all_sources: TtlCache::new(CACHE_TTL),
            all_dimensions: TtlCache::new(CACHE_TTL),
            all_metrics: TtlCache::new(CACHE_TTL),
            schema: TtlCache::new(CACHE_TTL),
        }
    }

    /// A connection secret by name.
    pub fn get_secret(&self, name: &str) -> MimirResult<Option<ConnectionSecret>> {
        let Some(value) = self.loader.get_secret(name)? else {
            return Ok(None);
        };
        let secret = serde_json::from_value(value)
            .map_err(|e| MimirError::config(format!("invalid secret '{name}': {e}")))?;
        Ok(Some(secret))
    }

    fn init_source(&self, name: &str, value: serde_json::Value) -> MimirResult<Arc<Source>> {
        let config: SourceConfig = serde_json::from_value(value).map_err(|e| {
            MimirError::config(format!(
                "Invalid or missing configuration for source '{name}': {e}"
            ))
        })?;
        let Some(connection_name) = config.connection_name.clone() else {
            return Err(MimirError::config(format!(
                "source '{name}' is missing the required parameter 'connection_name'"
            )));
        };

        let connection = if self.validate_connections {
            let mut secret = self.get_secret(&connection_name)?.ok_or_else(|| {
                MimirError::config(format!(
                    "Secret '{connection_name}' not found for source '{name}'"
                ))
            })?;
            if let Ok(host) = std::env::var(CONNECTION_HOST_VAR) {
                secret.host = Some(host);
            }
            Some(self.factory.create(&connection_name, &secret)?)
        } else {
            None
        };

        Ok(Arc::new(Source::from_config(name, config, connection)?))
    }

    fn init_dimension(&self, name: &str, value: serde_json::Value) -> MimirResult<Arc<Dimension>> {
        let config: DimensionConfig = serde_json::from_value(value).map_err(|e| {
            MimirError::config(format!(
                "Invalid or missing configuration for dimension '{name}': {e}"
            ))
        })?;
        Ok(Arc::new(Dimension::from_config(config)))
    }

    fn init_metric(&self, name: &str, value: serde_json::Value) -> MimirResult<Arc<Metric>> {
        let config: MetricConfig = serde_json::from_value(value).map_err(|e| {
            MimirError::config(format!(
                "Invalid or missing configuration for metric '{name}': {e}"
            ))
        })?;
        let Some(source_name) = config.source_name.clone() else {
            return Err(MimirError::config(format!(
                "metric '{name}' is missing the required parameter 'source_name'"
            )));
        };
        let source = self.get_source(&source_name)?;
        Ok(Arc::new(Metric::from_config(config, source)?))
    }

    /// A single source by name.
    pub fn get_source(&self, name: &str) -> MimirResult<Arc<Source>> {
        self.sources.get_or_try_insert(name.to_string(), || {
            let value = self.loader.get(ConfigKind::Source, name)?.ok_or_else(|| {
                MimirError::config(format!(
                    "Invalid or missing configuration for source '{name}'"
                ))
            })?;
            self.init_source(name, value)
        })
    }

    /// A single dimension by name. Dimensions with no configuration are
    /// synthesized as local stubs.
    pub fn get_dimension(&self, name: &str) -> MimirResult<Arc<Dimension>> {
        self.dimensions.get_or_try_insert(name.to_string(), || {
            match self.loader.get(ConfigKind::Dimension, name)? {
                Some(value) => self.init_dimension(name, value),
                None => Ok(Arc::new(Dimension::local(name))),
            }
        })
    }

    /// A single metric by name, with its owning source attached.
    pub fn get_metric(&self, name: &str) -> MimirResult<Arc<Metric>> {
        self.metrics.get_or_try_insert(name.to_string(), || {
            let value = self.loader.get(ConfigKind::Metric, name)?.ok_or_else(|| {
                MimirError::config(format!(
                    "Invalid or missing configuration for metric '{name}'"
                ))
            })?;
            self.init_metric(name, value)
        })
    }

    /// Every configured source.
    pub fn get_sources(&self) -> MimirResult<Vec<Arc<Source>>> {
        self.all_sources.get_or_try_insert((), || {
            self.loader
                .get_all(ConfigKind::Source)?
                .into_iter()
                .map(|(name, value)| self.init_source(&name, value))
                .collect()
        })
    }

    /// Every configured dimension.
    pub fn get_dimensions(&self) -> MimirResult<Vec<Arc<Dimension>>> {
        self.all_dimensions.get_or_try_insert((), || {
            self.loader
                .get_all(ConfigKind::Dimension)?
                .into_iter()
                .map(|(name, value)| self.init_dimension(&name, value))
                .collect()
        })
    }

    /// Every configured metric.
    pub fn get_metrics(&self) -> MimirResult<Vec<Arc<Metric>>> {
        self.all_metrics.get_or_try_insert((), || {
            self.loader
                .get_all(ConfigKind::Metric)?
                .into_iter()
                .map(|(name, value)| self.init_metric(&name, value))
                .collect()
        })
    }

    /// Per-source listing of dimensions, metrics, and the time dimension.
    pub fn get_schema(&self) -> MimirResult<BTreeMap<String, SourceSchema>> {
        self.schema.get_or_try_insert((), || {
            let metrics = self.get_metrics()?;
            self.get_sources()?
                .into_iter()
                .map(|source| {
                    let mut dimensions = source.local_dimensions.clone();
                    dimensions.extend(source.source_dimensions.iter().cloned());
                    let source_metrics = metrics
                        .iter()
                        .filter(|m| m.source_name() == source.name)
                        .map(|m| m.name.clone())
                        .collect();
                    Ok((
                        source.name.clone(),
                        SourceSchema {
                            dimensions,
                            metrics: source_metrics,
                            time_dimension: source.time_col_alias.clone(),
                        },
                    ))
                })
                .collect()
        })
    }
}
