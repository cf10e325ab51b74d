//! Pipe runtime management.
//!
//! The manager owns the table of live pipes. Control operations (start, delete,
//! status) go through the manager; the data path is handled entirely by each pipe's
//! processing loop, which reports through lock-free counters so status queries never
//! contend with message flow.

mod process;
#[cfg(test)]
mod process_test;

pub use process::ProcessLoop;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{AppError, ShutdownError};
use crate::registry::Registry;
use crate::store::{profile_from_entity, EntityType, PipeConfig, Repository};

/// The lifecycle state of a pipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipeState {
    Unknown,
    Running,
    Stopped,
}

/// A pipe state shared between the manager and the pipe's processing loop.
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: PipeState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn store(&self, state: PipeState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    pub fn load(&self) -> PipeState {
        match self.0.load(Ordering::SeqCst) {
            1 => PipeState::Running,
            2 => PipeState::Stopped,
            _ => PipeState::Unknown,
        }
    }
}

/// One message counter, updated by the processing loop without locking.
#[derive(Default)]
pub struct Counters {
    total: AtomicU64,
    ok: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    pub fn record_ok(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total: self.total.load(Ordering::Relaxed),
            ok: self.ok.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of one counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub total: u64,
    pub ok: u64,
    pub errors: u64,
}

/// Per-pipe message statistics: received from the transport, processed by the engine,
/// and sent per endpoint uid.
pub struct Statistics {
    pub received: Counters,
    pub processed: Counters,
    pub sent: HashMap<String, Counters>,
}

impl Statistics {
    fn new(config: &PipeConfig) -> Self {
        let sent = config
            .endpoints
            .iter()
            .map(|endpoint| (endpoint.uid.clone(), Counters::default()))
            .collect();
        Self {
            received: Counters::default(),
            processed: Counters::default(),
            sent,
        }
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            received: self.received.snapshot(),
            processed: self.processed.snapshot(),
            sent: self.sent.iter().map(|(uid, counters)| (uid.clone(), counters.snapshot())).collect(),
        }
    }
}

/// A point-in-time copy of one pipe's statistics.
#[derive(Clone, Debug, Serialize)]
pub struct StatisticsSnapshot {
    pub received: CounterSnapshot,
    pub processed: CounterSnapshot,
    pub sent: BTreeMap<String, CounterSnapshot>,
}

/// The status of one pipe as reported by the manager.
#[derive(Clone, Debug, Serialize)]
pub struct PipeStatus {
    pub uri: String,
    pub state: PipeState,
    pub started: Option<String>,
    pub statistics: StatisticsSnapshot,
}

/// One managed pipe.
struct Pipe {
    config: PipeConfig,
    state: Arc<StateCell>,
    statistics: Arc<Statistics>,
    started: Option<OffsetDateTime>,
    shutdown: Option<broadcast::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Pipe {
    fn new(config: PipeConfig) -> Self {
        let statistics = Arc::new(Statistics::new(&config));
        Self {
            config,
            state: Arc::new(StateCell::new(PipeState::Unknown)),
            statistics,
            started: None,
            shutdown: None,
            handle: None,
        }
    }

    /// Signal the pipe's loop to stop and wait for it to exit.
    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = ?err, uri = %self.config.uri, "error joining pipe processing loop");
            }
        }
    }
}

/// The pipe manager.
pub struct Manager {
    config: Arc<Config>,
    repository: Arc<Repository>,
    registry: Arc<Registry>,
    pipes: RwLock<HashMap<String, Pipe>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Manager {
    /// Create a new manager, loading all persisted pipe configurations. Loaded pipes
    /// are not started until [`Manager::start`] is called.
    pub fn new(
        config: Arc<Config>, repository: Arc<Repository>, registry: Arc<Registry>, shutdown_tx: broadcast::Sender<()>,
    ) -> Result<Self> {
        let mut pipes = HashMap::new();
        for pipe_config in repository.pipes.list().context("error loading persisted pipes")? {
            pipes.insert(pipe_config.uri.clone(), Pipe::new(pipe_config));
        }
        Ok(Self {
            config,
            repository,
            registry,
            pipes: RwLock::new(pipes),
            shutdown_tx,
        })
    }

    /// Start every pipe which is not already running, aborting on the first pipe
    /// which fails to resolve. Pipes started before the failure stay running.
    pub async fn start(&self) -> Result<()> {
        let mut pipes = self.pipes.write().await;
        for (uri, pipe) in pipes.iter_mut() {
            self.start_locked(pipe).with_context(|| format!("error starting pipe {}", uri))?;
        }
        Ok(())
    }

    /// Resolve a pipe's components and spawn its processing loop. Must be called with
    /// the pipe table locked for writing.
    fn start_locked(&self, pipe: &mut Pipe) -> Result<()> {
        if pipe.state.load() == PipeState::Running {
            return Ok(());
        }
        let config = &pipe.config;
        let listener = self
            .registry
            .resolve_listener(&config.listener.uid, &config.listener.kind, &config.listener.configuration)?;
        let mut endpoints = HashMap::new();
        for entity in &config.endpoints {
            let endpoint = self.registry.resolve_endpoint(&entity.uid, &entity.kind, &entity.configuration)?;
            endpoints.insert(entity.uid.clone(), endpoint);
        }
        let channel = listener.new_channel(&config.uri)?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let process = ProcessLoop::new(
            config.clone(),
            self.config.engine_timeout(),
            pipe.state.clone(),
            pipe.statistics.clone(),
            endpoints,
            channel,
            shutdown_rx,
            self.shutdown_tx.subscribe(),
        );
        pipe.handle = Some(process.spawn());
        pipe.shutdown = Some(shutdown_tx);
        pipe.started = Some(OffsetDateTime::now_utc());
        pipe.state.store(PipeState::Running);
        tracing::info!(uri = %pipe.config.uri, "pipe started");
        Ok(())
    }

    /// Assemble, persist and start a new pipe from stored entity references.
    ///
    /// If the pipe fails to start, its persisted record is rolled back; a failed
    /// rollback leaves storage inconsistent with the runtime and is fatal.
    pub async fn start_pipe(
        &self, uri: &str, listener_uid: &str, profile_uid: &str, endpoint_uids: &[String], tags: BTreeMap<String, String>,
    ) -> Result<()> {
        let listener = self.repository.listeners.one(listener_uid)?;
        let profile_entity = self.repository.profiles.one(profile_uid)?;
        if endpoint_uids.is_empty() {
            return Err(AppError::config("at least one endpoint is required").into());
        }
        let endpoints = self.repository.endpoints.many(endpoint_uids)?;
        let profile = profile_from_entity(&profile_entity)?;
        let config = PipeConfig {
            uri: uri.to_string(),
            listener,
            endpoints,
            profile,
            tags,
        };

        let mut pipes = self.pipes.write().await;
        if pipes.contains_key(uri) {
            return Err(AppError::config(format!("pipe with uri {} already exists", uri)).into());
        }
        self.repository.pipes.insert(&config)?;
        let mut pipe = Pipe::new(config);
        if let Err(err) = self.start_locked(&mut pipe) {
            if let Err(rollback_err) = self.repository.pipes.delete(uri) {
                let fatal = rollback_err.context("error rolling back pipe record after failed start");
                return Err(ShutdownError(fatal).into());
            }
            return Err(err);
        }
        pipes.insert(uri.to_string(), pipe);
        Ok(())
    }

    /// Stop and remove the first pipe matching the given predicate, deleting its
    /// persisted record. Matching nothing is a no-op.
    pub async fn delete_pipe<P: Fn(&PipeConfig) -> bool>(&self, predicate: P) -> Result<()> {
        let removed = {
            let mut pipes = self.pipes.write().await;
            let found = pipes
                .iter()
                .find(|(_, pipe)| predicate(&pipe.config))
                .map(|(uri, _)| uri.clone());
            match found {
                Some(uri) => {
                    self.repository.pipes.delete(&uri)?;
                    pipes.remove(&uri)
                }
                None => None,
            }
        };
        if let Some(pipe) = removed {
            tracing::info!(uri = %pipe.config.uri, "pipe deleted");
            pipe.stop().await;
        }
        Ok(())
    }

    /// Stop and remove the pipe with the given uri.
    pub async fn delete_pipe_by_uri(&self, uri: &str) -> Result<()> {
        self.delete_pipe(|config| config.uri == uri).await
    }

    /// Whether any live pipe matches the given predicate.
    pub async fn any<P: Fn(&PipeConfig) -> bool>(&self, predicate: P) -> bool {
        self.pipes.read().await.values().any(|pipe| predicate(&pipe.config))
    }

    /// Report the status of every managed pipe, ordered by uri.
    pub async fn status(&self) -> Vec<PipeStatus> {
        let pipes = self.pipes.read().await;
        let mut out: Vec<PipeStatus> = pipes
            .values()
            .map(|pipe| PipeStatus {
                uri: pipe.config.uri.clone(),
                state: pipe.state.load(),
                started: pipe.started.map(|started| started.format(&Rfc3339).unwrap_or_default()),
                statistics: pipe.statistics.snapshot(),
            })
            .collect();
        out.sort_by(|a, b| a.uri.cmp(&b.uri));
        out
    }

    /// Delete a stored entity, refusing while any live pipe still references it.
    pub async fn delete_entity(&self, entity_type: EntityType, uid: &str) -> Result<()> {
        let pipes = self.pipes.read().await;
        for (uri, pipe) in pipes.iter() {
            let referenced = match entity_type {
                EntityType::Listener => pipe.config.listener.uid == uid,
                EntityType::Endpoint => pipe.config.endpoints.iter().any(|endpoint| endpoint.uid == uid),
                EntityType::Profile => pipe.config.profile.uid == uid,
            };
            if referenced {
                return Err(AppError::config(format!("{} with uid : {} in use by pipe : {}", entity_type, uid, uri)).into());
            }
        }
        self.repository.bucket(entity_type).delete(uid)
    }

    /// Stop every pipe and wait for all processing loops to exit. Persisted records
    /// are kept so a restart resumes the same pipes.
    pub async fn shutdown(&self) {
        let drained: Vec<Pipe> = {
            let mut pipes = self.pipes.write().await;
            pipes.drain().map(|(_, pipe)| pipe).collect()
        };
        for pipe in drained {
            pipe.stop().await;
        }
        tracing::debug!("manager has shut down");
    }
}
