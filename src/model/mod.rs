//! Definition entities: sources, dimensions, metrics, granularities.
//!
//! These are the objects the catalog resolves out of raw configuration.
//! Equality and ordering are by name within a kind; instances are built
//! once per cache window and shared behind `Arc`.

mod dimension;
mod granularity;
mod metric;
mod source;

pub use dimension::{Dimension, DimensionConfig, LOCAL_SOURCE};
pub use granularity::Granularity;
pub use metric::{Metric, MetricConfig};
pub use source::{Source, SourceConfig};
