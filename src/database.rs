//! Database management.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use sled::{Config as SledConfig, Db, IVec};

use crate::config::Config;
use crate::error::{ShutdownError, ShutdownResult};

pub type Tree = sled::Tree;

/// The default path to use for data storage.
pub const DEFAULT_DATA_PATH: &str = "/usr/local/pipehub/db";
/// The DB tree used for persisted listener entities.
const TREE_LISTENERS: &str = "listeners";
/// The DB tree used for persisted endpoint entities.
const TREE_ENDPOINTS: &str = "endpoints";
/// The DB tree used for persisted profile entities.
const TREE_PROFILES: &str = "profiles";
/// The DB tree used for persisted pipe configurations.
const TREE_PIPES: &str = "pipes";

/// The default path to use for data storage.
pub fn default_data_path() -> String {
    DEFAULT_DATA_PATH.to_string()
}

/// An abstraction over the pipehub database.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    /// System runtime config.
    #[allow(dead_code)]
    config: Arc<Config>,
    /// The underlying DB handle.
    db: Db,
}

impl Database {
    /// Open the database for usage.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        // Determine the database path, and ensure it exists.
        let dbpath = PathBuf::from(&config.storage_data_path);
        tokio::fs::create_dir_all(&dbpath)
            .await
            .context("error creating dir for pipehub database")?;

        Self::spawn_blocking(move || -> Result<Self> {
            let db = SledConfig::new().path(dbpath).mode(sled::Mode::HighThroughput).open()?;
            let inner = Arc::new(DatabaseInner { config, db });
            Ok(Self { inner })
        })
        .await?
    }

    /// Spawn a blocking database-related function, returning a ShutdownError if anything goes
    /// wrong related to spawning & joining.
    #[tracing::instrument(level = "trace", skip(f), err)]
    pub async fn spawn_blocking<F, R>(f: F) -> ShutdownResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|err| ShutdownError::from(anyhow::Error::from(err)))
    }

    /// Get a handle to the DB tree for persisted listener entities.
    pub async fn get_listeners_tree(&self) -> ShutdownResult<Tree> {
        self.get_tree(TREE_LISTENERS).await
    }

    /// Get a handle to the DB tree for persisted endpoint entities.
    pub async fn get_endpoints_tree(&self) -> ShutdownResult<Tree> {
        self.get_tree(TREE_ENDPOINTS).await
    }

    /// Get a handle to the DB tree for persisted profile entities.
    pub async fn get_profiles_tree(&self) -> ShutdownResult<Tree> {
        self.get_tree(TREE_PROFILES).await
    }

    /// Get a handle to the DB tree for persisted pipe configurations.
    pub async fn get_pipes_tree(&self) -> ShutdownResult<Tree> {
        self.get_tree(TREE_PIPES).await
    }

    async fn get_tree(&self, name: &'static str) -> ShutdownResult<Tree> {
        let (db, ivname) = (self.inner.db.clone(), IVec::from(name));
        let tree = Self::spawn_blocking(move || -> Result<Tree> { Ok(db.open_tree(ivname)?) })
            .await
            .and_then(|res| res.map_err(|err| ShutdownError(anyhow!("could not open DB tree {} {}", name, err))))?;
        Ok(tree)
    }
}
