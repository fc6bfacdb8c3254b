//! # Mimir
//!
//! A semantic layer that federates metric queries across SQL backends.
//!
//! ## Architecture
//!
//! Consumers name metrics and dimensions, never backend tables. The engine
//! resolves those names against a catalog of declarative definitions and
//! federates one logical inquiry across the sources that own the metrics:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        InquiryRequest (metrics, dimensions, ...)         │
//! │            HTTP / CLI / restricted SQL front              │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [catalog: resolve + TTL cache]
//! ┌─────────────────────────────────────────────────────────┐
//! │        Source / Dimension / Metric definitions            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [planner: validate + split]
//! ┌─────────────────────────────────────────────────────────┐
//! │        AtomicQuery per source (CTE + GROUP BY)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [parallel backend execution]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Combination substrate: FULL JOIN / CROSS JOIN merge     │
//! │              → unified columnar result                    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod connections;
pub mod engine;
pub mod error;
pub mod model;
pub mod planner;
pub mod server;
pub mod sql;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::catalog::{Catalog, ConfigLoader, FileConfigLoader, SourceSchema};
    pub use crate::connections::{
        ArrowTable, Connection, ConnectionFactory, ConnectionSecret, DefaultConnectionFactory,
    };
    pub use crate::engine::Engine;
    pub use crate::error::{MimirError, MimirResult};
    pub use crate::model::{Dimension, Granularity, Metric, Source};
    pub use crate::planner::{AtomicQuery, Inquiry, InquiryRequest};
    pub use crate::sql::RestrictedSql;
}

// Also export at crate root for convenience
pub use engine::Engine;
pub use error::{MimirError, MimirResult};
pub use planner::{Inquiry, InquiryRequest};
