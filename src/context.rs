// # Importer Context
//
// Everything the pipeline needs, wired once at startup. Startup validation
// is strict: a configuration that yields zero metadata backends aborts
// instead of importing everything into review.

use crate::config::ImporterConfig;
use crate::db::Database;
use crate::lookup::{BackendRegistry, GamesDbBackend, LookupError, OpenVgdbBackend};
use crate::storage::{StorageError, StorageManager};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("backend error: {0}")]
    Lookup(#[from] LookupError),
    #[error("no metadata backends configured")]
    NoBackends,
}

#[derive(Clone)]
pub struct ImporterContext {
    pub config: ImporterConfig,
    pub db: Database,
    pub storage: StorageManager,
    pub registry: Arc<BackendRegistry>,
}

impl ImporterContext {
    /// Wire the production context from configuration.
    pub async fn initialize(config: ImporterConfig) -> Result<Self, StartupError> {
        let db = Database::new(&config.database_path.to_string_lossy()).await?;
        let storage = StorageManager::local(config.storage_root.clone())?;

        let mut registry = BackendRegistry::new();
        if let Some(path) = &config.openvgdb_path {
            info!("Registering OpenVGDB backend from {}", path.display());
            registry.register(Arc::new(
                OpenVgdbBackend::open(&path.to_string_lossy(), 0).await?,
            ));
        }
        if let Some(url) = &config.gamesdb_url {
            info!("Registering remote games database backend at {}", url);
            registry.register(Arc::new(GamesDbBackend::new(
                url.clone(),
                config.gamesdb_api_key.clone(),
                config.backend_timeout,
                1,
            )?));
        }

        Self::new(config, db, storage, Arc::new(registry))
    }

    /// Assemble a context from prebuilt parts, enforcing the startup
    /// invariants. Tests use this to inject mock backends and storage.
    pub fn new(
        config: ImporterConfig,
        db: Database,
        storage: StorageManager,
        registry: Arc<BackendRegistry>,
    ) -> Result<Self, StartupError> {
        if registry.is_empty() {
            return Err(StartupError::NoBackends);
        }
        Ok(ImporterContext {
            config,
            db,
            storage,
            registry,
        })
    }
}

impl std::fmt::Debug for ImporterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImporterContext")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}
