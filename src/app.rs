use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::database::Database;
use crate::endpoint::register_endpoints;
use crate::listener::register_listeners;
use crate::registry::Registry;
use crate::runtime::Manager;
use crate::store::Repository;

/// The application object for when pipehub is running as a server.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,
    /// The application's database system.
    _db: Database,

    /// The pipe manager.
    manager: Arc<Manager>,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let (shutdown_tx, _) = broadcast::channel(100);

        // Initialize this node's storage.
        let db = Database::new(config.clone()).await.context("error opening database")?;
        let repository = Arc::new(Repository::new(&db).await.context("error opening storage buckets")?);

        // Register all built-in component kinds.
        let registry = Arc::new(Registry::new());
        register_listeners(&registry).context("error registering listener kinds")?;
        register_endpoints(&registry).context("error registering endpoint kinds")?;

        // Load persisted pipes and start them.
        let manager = Arc::new(Manager::new(config.clone(), repository, registry, shutdown_tx.clone())?);
        manager.start().await.context("error starting persisted pipes")?;

        Ok(Self {
            _config: config,
            _db: db,
            manager,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            shutdown_tx,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine.
        tracing::debug!("pipehub is shutting down");
        self.manager.shutdown().await;

        tracing::debug!("pipehub shutdown complete");
        Ok(())
    }
}
