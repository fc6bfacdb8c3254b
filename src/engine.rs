//! The engine facade: catalog plus connection factory composition.
//!
//! This is the entry point the HTTP adapter and the CLI build on: construct
//! an engine from a loader (or the environment), then turn requests into
//! planned inquiries.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::catalog::{Catalog, ConfigLoader, FileConfigLoader, SourceSchema};
use crate::connections::ConnectionFactory;
use crate::error::{MimirError, MimirResult};
use crate::planner::{Inquiry, InquiryRequest};

/// Environment variable naming the configs directory.
pub const CONFIGS_PATH_VAR: &str = "CONFIGS_PATH";
/// Environment variable naming the secrets directory.
pub const SECRETS_PATH_VAR: &str = "SECRETS_PATH";

/// The main entry point for interacting with the semantic layer.
#[derive(Clone)]
pub struct Engine {
    catalog: Arc<Catalog>,
}

impl Engine {
    /// An engine over a loader with the built-in connection factory.
    ///
    /// With `validate_connections` off, sources resolve without secrets or
    /// bound connections; inquiries can be planned and validated but not
    /// dispatched.
    pub fn new(loader: Arc<dyn ConfigLoader>, validate_connections: bool) -> Self {
        Engine {
            catalog: Arc::new(Catalog::new(loader, validate_connections)),
        }
    }

    /// An engine with a custom connection factory.
    pub fn with_factory(
        loader: Arc<dyn ConfigLoader>,
        factory: Arc<dyn ConnectionFactory>,
        validate_connections: bool,
    ) -> Self {
        Engine {
            catalog: Arc::new(Catalog::with_factory(loader, factory, validate_connections)),
        }
    }

    /// An engine reading the filesystem layout named by `CONFIGS_PATH` and
    /// `SECRETS_PATH`.
    pub fn from_env() -> MimirResult<Self> {
        let configs = std::env::var(CONFIGS_PATH_VAR).map_err(|_| {
            MimirError::config(format!("environment variable {CONFIGS_PATH_VAR} is not set"))
        })?;
        let secrets = std::env::var(SECRETS_PATH_VAR).map_err(|_| {
            MimirError::config(format!("environment variable {SECRETS_PATH_VAR} is not set"))
        })?;
        let loader = FileConfigLoader::new(configs, Some(secrets));
        Ok(Engine::new(Arc::new(loader), true))
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Plan an inquiry: resolve, validate, and split into atomic queries.
    pub fn inquiry(&self, request: &InquiryRequest) -> MimirResult<Inquiry> {
        Inquiry::new(self.catalog.clone(), request)
    }

    /// The per-source schema listing.
    pub fn schema(&self) -> MimirResult<BTreeMap<String, SourceSchema>> {
        self.catalog.get_schema()
    }
}
